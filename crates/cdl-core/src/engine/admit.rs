//! Job admission: catalog lookup, item selection, quota check, registry insert.
//!
//! The quota check and the insert run under the user's admission turn, so a
//! burst of submissions from one user is decided one at a time.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::catalog::{destination_for, select_items, ContentFilter, CourseCatalog, Quality, Selection};
use crate::error::{ErrorKind, JobError, RejectReason, SubmitError};
use crate::job::{Job, Priority, TransferUnit, UnitStatus, UserId};
use crate::quota::{self, AccountLimits, Admission};
use crate::registry::{unix_timestamp, Registry};

/// A user's request to download (part of) a course.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub user_id: UserId,
    pub course_id: String,
    /// Empty selects every item.
    #[serde(default)]
    pub item_ids: Vec<String>,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub content: ContentFilter,
    #[serde(default)]
    pub subtitle_language: Option<String>,
}

/// Build a queued job for `req` (not yet quota-checked or recorded).
///
/// Encrypted items are kept as `Skipped` units so the job summary accounts
/// for them. Destinations are final once the registry assigns the job id.
pub async fn prepare_job(
    catalog: &dyn CourseCatalog,
    download_dir: &Path,
    max_attempts: u32,
    req: &SubmitRequest,
) -> Result<Job, SubmitError> {
    let course = catalog
        .course(&req.course_id)
        .await
        .map_err(SubmitError::Catalog)?;
    let selection = Selection {
        item_ids: &req.item_ids,
        quality: req.quality,
        content: req.content,
        subtitle_language: req.subtitle_language.as_deref(),
    };
    let items = select_items(&course, &selection);
    if items.is_empty() {
        return Err(SubmitError::NoItems(req.course_id.clone()));
    }

    let dir = crate::paths::course_dir(download_dir, &req.user_id, &course.title);
    let units = items
        .iter()
        .enumerate()
        .map(|(seq, item)| {
            let seq = seq as u32;
            let mut unit = TransferUnit::new(
                seq,
                item.item_id.clone(),
                item.title.clone(),
                item.kind,
                item.url.clone().unwrap_or_default(),
                destination_for(&dir, seq, item),
                item.size,
                max_attempts,
            );
            if item.is_encrypted() {
                unit.status = UnitStatus::Skipped;
                unit.last_error = Some(JobError::new(ErrorKind::PermanentSource, "encrypted content"));
            }
            unit
        })
        .collect();

    let mut job = Job::new(
        req.user_id.clone(),
        course.id.clone(),
        course.title.clone(),
        req.priority,
        units,
        unix_timestamp(),
    );
    job.request_headers = course.headers.clone();
    job.enqueue();
    Ok(job)
}

/// Bytes the job will add to the user's storage, as far as the catalog knows.
fn estimated_bytes(job: &Job) -> u64 {
    job.units
        .iter()
        .filter(|u| u.status != UnitStatus::Skipped)
        .filter_map(|u| u.expected_size)
        .sum()
}

/// [`prepare_job`], check the quota and record the job. Returns it with
/// registry ids assigned.
pub async fn admit_job(
    catalog: &dyn CourseCatalog,
    limits: &dyn AccountLimits,
    registry: &Registry,
    download_dir: &Path,
    max_attempts: u32,
    req: &SubmitRequest,
) -> Result<Job, SubmitError> {
    let mut job = prepare_job(catalog, download_dir, max_attempts, req).await?;

    let _turn = registry.admission_turn(&req.user_id).await;
    match quota::admit(limits, &req.user_id, estimated_bytes(&job))
        .await
        .map_err(SubmitError::Limits)?
    {
        Admission::Accept => {}
        Admission::Reject(reason) => return Err(rejected(req, reason)),
    }
    let inserted = registry
        .insert_job_capped(&mut job, limits.download_cap())
        .await
        .map_err(SubmitError::Registry)?;
    if inserted.is_none() {
        return Err(rejected(req, RejectReason::QuotaExceeded));
    }
    info!(
        job_id = job.id,
        user = %job.user_id,
        course = %job.course_id,
        items = job.units.len(),
        priority = %job.priority,
        "job admitted"
    );
    Ok(job)
}

fn rejected(req: &SubmitRequest, reason: RejectReason) -> SubmitError {
    info!(user = %req.user_id, course = %req.course_id, %reason, "submission rejected");
    SubmitError::Rejected(reason)
}
