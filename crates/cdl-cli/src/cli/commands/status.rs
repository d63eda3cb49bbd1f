//! `cdl status` – list jobs, or show one job's items.

use anyhow::{Context, Result};
use cdl_core::job::{Job, JobId};
use cdl_core::registry::Registry;

pub async fn run_status(registry: &Registry, id: Option<JobId>, user: Option<&str>) -> Result<()> {
    match id {
        Some(id) => {
            let job = registry
                .get_job(id)
                .await?
                .with_context(|| format!("job {id} not found"))?;
            print!("{}", job_detail(&job));
        }
        None => {
            let jobs = registry.list_jobs(user).await?;
            if jobs.is_empty() {
                println!("No jobs in registry.");
            } else {
                println!(
                    "{:<6} {:<12} {:<10} {:<8} {:>7} {:>9} COURSE",
                    "ID", "USER", "STATUS", "PRIO", "DONE", "PROGRESS"
                );
                for job in &jobs {
                    println!("{}", job_row(job));
                }
            }
        }
    }
    Ok(())
}

pub fn job_row(job: &Job) -> String {
    format!(
        "{:<6} {:<12} {:<10} {:<8} {:>7} {:>8.1}% {}",
        job.id,
        job.user_id,
        job.status.as_str(),
        job.priority.as_str(),
        format!("{}/{}", job.completed_items, job.total_items()),
        job.percentage(),
        job.course_title
    )
}

fn job_detail(job: &Job) -> String {
    let mut out = format!(
        "Job {} ({}) for {}: {} [{}]\n",
        job.id,
        job.status,
        job.user_id,
        job.course_title,
        job.course_id
    );
    if let Some(e) = &job.last_error {
        out.push_str(&format!("  error: {} ({})\n", e.message, e.kind));
    }
    for unit in &job.units {
        let size = unit
            .expected_size
            .map(|s| s.to_string())
            .unwrap_or_else(|| "?".to_string());
        out.push_str(&format!(
            "  {:>3} {:<11} {:>10}/{:<10} try {} {}\n",
            unit.seq + 1,
            unit.status.as_str(),
            unit.bytes_transferred,
            size,
            unit.attempts,
            unit.destination.display()
        ));
        if let Some(e) = &unit.last_error {
            out.push_str(&format!("      {} ({})\n", e.message, e.kind));
        }
    }
    out
}
