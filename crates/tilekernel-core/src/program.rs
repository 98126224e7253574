//! Program identity, kernel signatures and bound argument lists.
//!
//! A program variant is identified by its source name, its kernel entry point
//! and a canonical set of compile-time switches. Switches are kept in a
//! `BTreeSet`, so insertion order never changes the identity.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::error::{Result, TileKernelError};
use crate::memory::SurfaceHandle;

/// Canonical, order-independent set of compile-time switches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BuildOptions {
    switches: BTreeSet<String>,
}

impl BuildOptions {
    /// Creates an empty option set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `-D<name>`.
    pub fn define(&mut self, name: &str) -> &mut Self {
        self.switches.insert(format!("-D{}", name));
        self
    }

    /// Adds `-D<name>=<value>`.
    pub fn define_value(&mut self, name: &str, value: impl fmt::Display) -> &mut Self {
        self.switches.insert(format!("-D{}={}", name, value));
        self
    }

    /// Whether `name` is defined, with or without a value.
    pub fn is_defined(&self, name: &str) -> bool {
        let bare = format!("-D{}", name);
        let valued = format!("-D{}=", name);
        self.switches
            .iter()
            .any(|s| *s == bare || s.starts_with(&valued))
    }

    /// Value bound to `name`, if defined with one.
    pub fn value_of(&self, name: &str) -> Option<&str> {
        let prefix = format!("-D{}=", name);
        self.switches
            .iter()
            .find_map(|s| s.strip_prefix(prefix.as_str()))
    }

    /// Iterates switches in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.switches.iter().map(String::as_str)
    }

    /// Number of switches.
    pub fn len(&self) -> usize {
        self.switches.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.switches.is_empty()
    }
}

impl fmt::Display for BuildOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for switch in &self.switches {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(switch)?;
            first = false;
        }
        Ok(())
    }
}

/// Returns the exported symbol for `name`.
///
/// Obfuscated names are derived from a SHA-256 digest, so they are stable
/// across calls and processes.
pub fn obfuscate_symbol(name: &str, enabled: bool) -> String {
    if !enabled {
        return name.to_string();
    }
    let digest = Sha256::digest(name.as_bytes());
    let hex = format!("{:x}", digest);
    format!("k{}", &hex[..16])
}

/// Cache identity of a compiled program variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgramKey {
    program: String,
    kernel: String,
    options: BuildOptions,
}

impl ProgramKey {
    /// Create a key.
    pub fn new(program: impl Into<String>, kernel: impl Into<String>, options: BuildOptions) -> Self {
        Self {
            program: program.into(),
            kernel: kernel.into(),
            options,
        }
    }

    /// Program source name.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Kernel entry point.
    pub fn kernel(&self) -> &str {
        &self.kernel
    }

    /// Compile-time switches.
    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// SHA-256 of the canonical key text, as lowercase hex.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.program.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.kernel.as_bytes());
        for switch in self.options.iter() {
            hasher.update([0u8]);
            hasher.update(switch.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// A kernel parameter, optionally present only under a compile-time switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelParam {
    /// Parameter name.
    pub name: String,
    /// Define that must be set for the parameter to exist.
    pub requires: Option<String>,
}

impl KernelParam {
    /// Always-present parameter.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requires: None,
        }
    }

    /// Parameter compiled in only when `define` is set.
    pub fn when(name: impl Into<String>, define: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requires: Some(define.into()),
        }
    }
}

/// Declared parameter list of a kernel entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSignature {
    kernel: String,
    params: Vec<KernelParam>,
}

impl KernelSignature {
    /// Create a signature.
    pub fn new(kernel: impl Into<String>, params: Vec<KernelParam>) -> Self {
        Self {
            kernel: kernel.into(),
            params,
        }
    }

    /// Kernel entry point.
    pub fn kernel(&self) -> &str {
        &self.kernel
    }

    /// Parameter names that exist once compiled with `options`.
    pub fn resolve(&self, options: &BuildOptions) -> Vec<String> {
        self.params
            .iter()
            .filter(|p| p.requires.as_deref().map_or(true, |d| options.is_defined(d)))
            .map(|p| p.name.clone())
            .collect()
    }
}

/// A compiled program variant as returned by the runtime.
#[derive(Debug)]
pub struct Program {
    key: ProgramKey,
    params: Vec<String>,
}

impl Program {
    /// Create a program from its key and compiled parameter list.
    pub fn new(key: ProgramKey, params: Vec<String>) -> Self {
        Self { key, params }
    }

    /// Cache identity.
    pub fn key(&self) -> &ProgramKey {
        &self.key
    }

    /// Kernel entry point.
    pub fn kernel_name(&self) -> &str {
        self.key.kernel()
    }

    /// Parameter names in declaration order.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Number of parameters.
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// Value bound to a kernel parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArgValue {
    /// Device image or buffer.
    Surface(SurfaceHandle),
    /// 32-bit float scalar.
    F32(f32),
    /// 32-bit signed scalar.
    I32(i32),
}

/// Named kernel argument.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelArg {
    /// Parameter name.
    pub name: &'static str,
    /// Bound value.
    pub value: ArgValue,
}

/// Ordered argument list, built by appending only present arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArgumentList {
    args: Vec<KernelArg>,
}

impl ArgumentList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a surface argument.
    pub fn surface(&mut self, name: &'static str, handle: SurfaceHandle) -> &mut Self {
        self.push(name, ArgValue::Surface(handle))
    }

    /// Appends a float argument.
    pub fn f32(&mut self, name: &'static str, value: f32) -> &mut Self {
        self.push(name, ArgValue::F32(value))
    }

    /// Appends an integer argument.
    pub fn i32(&mut self, name: &'static str, value: i32) -> &mut Self {
        self.push(name, ArgValue::I32(value))
    }

    fn push(&mut self, name: &'static str, value: ArgValue) -> &mut Self {
        self.args.push(KernelArg { name, value });
        self
    }

    /// Slot index of `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.args.iter().position(|a| a.name == name)
    }

    /// Value bound to `name`.
    pub fn get(&self, name: &str) -> Option<ArgValue> {
        self.args.iter().find(|a| a.name == name).map(|a| a.value)
    }

    /// Argument names in slot order.
    pub fn names(&self) -> Vec<&'static str> {
        self.args.iter().map(|a| a.name).collect()
    }

    /// Iterates arguments in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &KernelArg> {
        self.args.iter()
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

/// A program together with its own argument instance.
///
/// Each dispatch binds a fresh `BoundKernel`, so concurrent calls sharing one
/// compiled program never overwrite each other's argument slots.
#[derive(Debug, Clone)]
pub struct BoundKernel {
    program: Arc<Program>,
    args: ArgumentList,
}

impl BoundKernel {
    /// Binds `args` to `program`, checking arity and slot names.
    pub fn bind(program: Arc<Program>, args: ArgumentList) -> Result<Self> {
        if args.len() != program.arity() {
            return Err(TileKernelError::ArgumentCountMismatch {
                kernel: program.kernel_name().to_string(),
                expected: program.arity(),
                actual: args.len(),
            });
        }
        for (index, (arg, param)) in args.iter().zip(program.params()).enumerate() {
            if arg.name != param.as_str() {
                return Err(TileKernelError::ArgumentNameMismatch {
                    kernel: program.kernel_name().to_string(),
                    index,
                    expected: param.clone(),
                    actual: arg.name.to_string(),
                });
            }
        }
        Ok(Self { program, args })
    }

    /// Compiled program.
    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    /// Bound arguments.
    pub fn args(&self) -> &ArgumentList {
        &self.args
    }
}
