//! CLI for the CDL course download engine.

mod commands;
mod control_socket;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cdl_core::catalog::{ContentFilter, Quality};
use cdl_core::config;
use cdl_core::engine::SubmitRequest;
use cdl_core::job::{JobId, Priority};
use cdl_core::registry::Registry;
use std::path::PathBuf;

use commands::{run_control, run_engine, run_status, run_submit};
use control_socket::Action;

/// Top-level CLI for the CDL course download engine.
#[derive(Debug, Parser)]
#[command(name = "cdl")]
#[command(about = "CDL: multi-user course download engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Submit a course download job from a JSON manifest.
    Submit {
        /// Course manifest (JSON).
        #[arg(long, value_name = "PATH")]
        manifest: PathBuf,
        /// Course to download.
        course_id: String,
        /// Submitting user.
        #[arg(long, default_value = "local")]
        user: String,
        /// Download only these items (repeatable). Default: every item.
        #[arg(long = "item", value_name = "ID")]
        items: Vec<String>,
        /// Video quality: auto, highest, lowest or a height such as 720p.
        #[arg(long, default_value = "auto")]
        quality: Quality,
        /// Scheduling priority: low, normal, high, urgent.
        #[arg(long, default_value = "normal", value_parser = parse_priority)]
        priority: Priority,
        /// Which items to include: all, lectures, attachments.
        #[arg(long, default_value = "all")]
        content: ContentFilter,
        /// Keep only subtitles in this language.
        #[arg(long, value_name = "LANG")]
        subtitles: Option<String>,
    },

    /// Run the engine: download queued jobs and accept control commands.
    Run {
        /// Exit once nothing is left to download instead of waiting for Ctrl-C.
        #[arg(long)]
        until_idle: bool,
        /// Print events as JSON lines.
        #[arg(long)]
        json: bool,
    },

    /// Show jobs, or one job's items.
    Status {
        /// Show the items of this job.
        id: Option<JobId>,
        /// Only jobs of this user.
        #[arg(long)]
        user: Option<String>,
    },

    /// Pause a job by its ID.
    Pause {
        /// Job identifier.
        id: JobId,
    },

    /// Resume a paused job by its ID.
    Resume {
        /// Job identifier.
        id: JobId,
    },

    /// Cancel a job by its ID.
    Cancel {
        /// Job identifier.
        id: JobId,
    },

    /// Retry the failed items of a job.
    Retry {
        /// Job identifier.
        id: JobId,
    },
}

fn parse_priority(s: &str) -> Result<Priority, String> {
    Priority::from_str(&s.to_ascii_lowercase()).ok_or_else(|| format!("invalid priority {:?}", s))
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let registry = Registry::open_default().await?;

        match cli.command {
            CliCommand::Submit {
                manifest,
                course_id,
                user,
                items,
                quality,
                priority,
                content,
                subtitles,
            } => {
                let req = SubmitRequest {
                    user_id: user,
                    course_id,
                    item_ids: items,
                    quality,
                    priority,
                    content,
                    subtitle_language: subtitles,
                };
                run_submit(&registry, &cfg, &manifest, &req).await?;
            }
            CliCommand::Run { until_idle, json } => run_engine(registry, &cfg, until_idle, json).await?,
            CliCommand::Status { id, user } => run_status(&registry, id, user.as_deref()).await?,
            CliCommand::Pause { id } => run_control(&registry, &cfg, Action::Pause, id).await?,
            CliCommand::Resume { id } => run_control(&registry, &cfg, Action::Resume, id).await?,
            CliCommand::Cancel { id } => run_control(&registry, &cfg, Action::Cancel, id).await?,
            CliCommand::Retry { id } => run_control(&registry, &cfg, Action::Retry, id).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
