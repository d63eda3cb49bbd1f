//! Which unit runs next (priority, then age, under the per-user cap).

use crate::job::{JobId, Priority};

/// A dispatchable job's next pending unit.
#[derive(Debug, Clone)]
pub(crate) struct Candidate<'a> {
    pub job_id: JobId,
    pub user_id: &'a str,
    pub priority: Priority,
}

/// Index of the candidate to run next: highest priority first, older (lower
/// id) jobs first within a priority, skipping users already at `per_user`.
pub(crate) fn pick(
    candidates: &[Candidate<'_>],
    running_for: impl Fn(&str) -> usize,
    per_user: usize,
) -> Option<usize> {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| {
        let (a, b) = (&candidates[a], &candidates[b]);
        b.priority.cmp(&a.priority).then(a.job_id.cmp(&b.job_id))
    });
    order
        .into_iter()
        .find(|&i| running_for(candidates[i].user_id) < per_user)
}
