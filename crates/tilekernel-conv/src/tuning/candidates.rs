//! Candidate local sizes for a 3D launch search.

use super::LocalWorkSize;

/// Candidate work-groups for a launch over `global` on a device accepting at
/// most `max_work_group_size` items per group.
///
/// The first candidate fills the work-group greedily from the first
/// dimension. The rest are shapes scaled from the device limit and a few
/// fixed shapes known to suit 5-column tiled kernels. Candidates with a zero
/// component or too many items are dropped; duplicates keep their first
/// position. All candidates use a single partition.
pub fn generate_candidates(global: [u32; 3], max_work_group_size: u32) -> Vec<LocalWorkSize> {
    let kwg = max_work_group_size;

    let fill_x = global[0].min(kwg).max(1);
    let fill_y = global[1].min(kwg / fill_x).max(1);
    let fill_z = global[2].min(kwg / (fill_x * fill_y)).max(1);

    let raw: [[u32; 3]; 18] = [
        [fill_x, fill_y, fill_z],
        [kwg / 16, 4, 4],
        [kwg / 32, 4, 8],
        [kwg / 32, 8, 4],
        [kwg / 64, 8, 8],
        [kwg / 64, 16, 4],
        [kwg / 128, 8, 16],
        [kwg / 128, 16, 8],
        [kwg / 128, 32, 4],
        [1, kwg / 32, 32],
        [1, kwg / 64, 64],
        [1, kwg / 128, 128],
        [3, 15, 9],
        [7, 15, 9],
        [9, 7, 15],
        [15, 7, 9],
        [1, kwg, 1],
        [4, 15, 8],
    ];

    let mut candidates: Vec<LocalWorkSize> = Vec::with_capacity(raw.len());
    for [x, y, z] in raw {
        let lws = LocalWorkSize::new(x, y, z, 1);
        if lws.local.contains(&0) || lws.work_group_size() > u64::from(kwg) {
            continue;
        }
        if !candidates.contains(&lws) {
            candidates.push(lws);
        }
    }
    candidates
}
