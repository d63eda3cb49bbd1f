//! Registry tests (in-memory DB).

use crate::error::{ErrorKind, JobError};
use crate::job::{sample_unit, Job, JobStatus, Priority, UnitStatus};
use crate::quota::{DownloadCap, PERIOD_SECS};
use crate::registry::{open_memory, unix_timestamp};

fn new_job(user: &str, units: usize) -> Job {
    let units = (0..units as u32).map(|i| sample_unit(i, Some(100))).collect();
    let mut job = Job::new(user, "course-1", "Rust Basics", Priority::High, units, 1_000);
    job.enqueue();
    job
}

#[tokio::test]
async fn insert_assigns_ids_and_roundtrips() {
    let db = open_memory().await.unwrap();
    let mut job = new_job("ana", 2);
    job.request_headers.insert("Authorization".into(), "Bearer t0k".into());
    let id = db.insert_job(&mut job).await.unwrap();

    assert_eq!(job.id, id);
    assert!(job.units.iter().all(|u| u.job_id == id && u.id > 0));
    assert_ne!(job.units[0].id, job.units[1].id);

    let loaded = db.get_job(id).await.unwrap().unwrap();
    assert_eq!(loaded, job);
    assert_eq!(loaded.status, JobStatus::Queued);
    assert_eq!(loaded.priority, Priority::High);
    assert_eq!(loaded.total_bytes, 200);
    assert_eq!(loaded.request_headers.get("Authorization").map(String::as_str), Some("Bearer t0k"));
    assert!(db.get_job(id + 100).await.unwrap().is_none());
}

#[tokio::test]
async fn unit_and_job_updates_persist() {
    let db = open_memory().await.unwrap();
    let mut job = new_job("ana", 2);
    db.insert_job(&mut job).await.unwrap();

    let unit = &mut job.units[0];
    unit.status = UnitStatus::Failed;
    unit.attempts = 3;
    unit.bytes_transferred = 40;
    unit.resume_cursor = 40;
    unit.last_error = Some(JobError::new(ErrorKind::TransientNetwork, "HTTP 503"));
    db.update_unit(unit).await.unwrap();
    db.update_unit_progress(job.units[1].id, 70, 64).await.unwrap();
    // Progress never moves bytes backwards.
    db.update_unit_progress(job.units[1].id, 10, 64).await.unwrap();

    job.status = JobStatus::Running;
    job.started_at = Some(1_001);
    db.update_job(&job).await.unwrap();

    let loaded = db.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, JobStatus::Running);
    assert_eq!(loaded.started_at, Some(1_001));
    assert_eq!(loaded.units[0].status, UnitStatus::Failed);
    assert_eq!(loaded.units[0].retry_count(), 2);
    assert_eq!(
        loaded.units[0].last_error.as_ref().map(|e| e.kind),
        Some(ErrorKind::TransientNetwork)
    );
    assert_eq!(loaded.units[1].bytes_transferred, 70);
    assert_eq!(loaded.units[1].resume_cursor, 64);
    assert_eq!(loaded.failed_items, 1);
}

#[tokio::test]
async fn recover_resets_running_jobs_and_downloading_units() {
    let db = open_memory().await.unwrap();
    let mut job = new_job("ana", 1);
    db.insert_job(&mut job).await.unwrap();
    job.status = JobStatus::Running;
    db.update_job(&job).await.unwrap();
    job.units[0].status = UnitStatus::Downloading;
    job.units[0].resume_cursor = 30;
    db.update_unit(&job.units[0]).await.unwrap();

    assert_eq!(db.recover_interrupted().await.unwrap(), 1);
    let loaded = db.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, JobStatus::Queued);
    assert_eq!(loaded.units[0].status, UnitStatus::Pending);
    assert_eq!(loaded.units[0].resume_cursor, 30);
}

#[tokio::test]
async fn load_unfinished_skips_terminal_jobs() {
    let db = open_memory().await.unwrap();
    let mut a = new_job("ana", 1);
    let mut b = new_job("bob", 1);
    db.insert_job(&mut a).await.unwrap();
    db.insert_job(&mut b).await.unwrap();
    a.status = JobStatus::Completed;
    db.update_job(&a).await.unwrap();

    let unfinished = db.load_unfinished().await.unwrap();
    assert_eq!(unfinished.len(), 1);
    assert_eq!(unfinished[0].id, b.id);
    assert_eq!(unfinished[0].units.len(), 1);

    let all = db.list_jobs(None).await.unwrap();
    assert_eq!(all.len(), 2);
    let bobs = db.list_jobs(Some("bob")).await.unwrap();
    assert_eq!(bobs.len(), 1);
    assert_eq!(bobs[0].user_id, "bob");
}

#[tokio::test]
async fn usage_counts_jobs_and_finished_bytes() {
    let db = open_memory().await.unwrap();
    let mut old = new_job("ana", 1);
    old.created_at = 10;
    let mut recent = new_job("ana", 2);
    recent.created_at = 5_000;
    db.insert_job(&mut old).await.unwrap();
    db.insert_job(&mut recent).await.unwrap();

    recent.units[0].status = UnitStatus::Completed;
    recent.units[0].bytes_transferred = 100;
    db.update_unit(&recent.units[0]).await.unwrap();
    recent.units[1].bytes_transferred = 50;
    db.update_unit(&recent.units[1]).await.unwrap();

    assert_eq!(db.downloads_since("ana", 1_000).await.unwrap(), 1);
    assert_eq!(db.downloads_since("ana", 0).await.unwrap(), 2);
    assert_eq!(db.downloads_since("bob", 0).await.unwrap(), 0);
    assert_eq!(db.storage_used("ana").await.unwrap(), 100);
    assert_eq!(db.storage_used("bob").await.unwrap(), 0);
}

#[tokio::test]
async fn each_job_gets_its_own_directory() {
    let db = open_memory().await.unwrap();
    let mut first = new_job("ana", 1);
    let mut second = first.clone();
    let a = db.insert_job(&mut first).await.unwrap();
    let b = db.insert_job(&mut second).await.unwrap();

    let (one, two) = (&first.units[0].destination, &second.units[0].destination);
    assert_ne!(one, two);
    assert_eq!(one.file_name(), two.file_name());
    assert_eq!(one.parent().unwrap().file_name().unwrap(), format!("job-{a}").as_str());
    assert_eq!(two.parent().unwrap().file_name().unwrap(), format!("job-{b}").as_str());
    assert_eq!(db.get_job(b).await.unwrap().unwrap().units[0].destination, *two);
}

#[tokio::test]
async fn capped_insert_counts_inside_its_transaction() {
    let db = open_memory().await.unwrap();
    let cap = Some(DownloadCap {
        limit: 1,
        period_secs: PERIOD_SECS,
    });
    let now = unix_timestamp();
    let fresh = || {
        let mut job = new_job("ana", 1);
        job.created_at = now;
        job
    };

    let mut first = fresh();
    assert!(db.insert_job_capped(&mut first, cap).await.unwrap().is_some());
    let mut second = fresh();
    assert_eq!(db.insert_job_capped(&mut second, cap).await.unwrap(), None);
    assert_eq!(second.id, 0);
    assert_eq!(db.list_jobs(Some("ana")).await.unwrap().len(), 1);

    let mut other_user = new_job("bob", 1);
    other_user.created_at = now;
    assert!(db.insert_job_capped(&mut other_user, cap).await.unwrap().is_some());
    let mut uncapped = fresh();
    assert!(db.insert_job_capped(&mut uncapped, None).await.unwrap().is_some());
    assert_eq!(db.list_jobs(Some("ana")).await.unwrap().len(), 2);
}
