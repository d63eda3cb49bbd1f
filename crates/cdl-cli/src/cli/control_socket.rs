//! Control socket: server (during `cdl run`) and client (for the control commands).
//! Protocol: one line per command, "<action> <id>", answered with one line,
//! "ok" or "error <message>".

use anyhow::{bail, Result};
use cdl_core::error::EngineError;
use cdl_core::job::JobId;
use cdl_core::Engine;
use std::fmt;
use std::io;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// A control command understood by a running engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Pause,
    Resume,
    Cancel,
    Retry,
    /// Pick up a job that was written to the registry by `cdl submit`.
    Load,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Pause => "pause",
            Action::Resume => "resume",
            Action::Cancel => "cancel",
            Action::Retry => "retry",
            Action::Load => "load",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "pause" => Action::Pause,
            "resume" => Action::Resume,
            "cancel" => Action::Cancel,
            "retry" => Action::Retry,
            "load" => Action::Load,
            _ => return None,
        })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses one "<action> <id>" line.
pub fn parse_line(line: &str) -> Option<(Action, JobId)> {
    let mut parts = line.split_whitespace();
    let action = Action::from_str(parts.next()?)?;
    let id = parts.next()?.parse::<JobId>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((action, id))
}

async fn apply(engine: &Engine, action: Action, id: JobId) -> Result<(), EngineError> {
    match action {
        Action::Pause => engine.pause_job(id).await,
        Action::Resume => engine.resume_job(id).await,
        Action::Cancel => engine.cancel_job(id).await,
        Action::Retry => engine.retry_failed_items(id).await,
        Action::Load => engine.load_job(id).await,
    }
}

async fn serve(engine: Engine, stream: UnixStream) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let reply = match parse_line(line.trim()) {
            Some((action, id)) => match apply(&engine, action, id).await {
                Ok(()) => {
                    tracing::info!(job_id = id, %action, "control command applied");
                    "ok\n".to_string()
                }
                Err(e) => {
                    tracing::debug!(job_id = id, %action, error = %e, "control command refused");
                    format!("error {}\n", e)
                }
            },
            None => format!("error malformed command {:?}\n", line.trim()),
        };
        if write.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

/// Binds `path` and serves control commands against `engine` until aborted.
/// A stale socket file from a previous run is replaced.
pub fn spawn_control_listener(engine: Engine, path: impl AsRef<Path>) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)?;
    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    tokio::spawn(serve(engine.clone(), stream));
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

/// Sends one command. Returns Ok(false) when no engine is listening
/// (no socket file, or a stale one), and an error if the engine refused it.
pub async fn send(socket_path: &Path, action: Action, job_id: JobId) -> Result<bool> {
    if !socket_path.exists() {
        return Ok(false);
    }
    let stream = match UnixStream::connect(socket_path).await {
        Ok(s) => s,
        Err(e) if matches!(e.kind(), io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound) => {
            return Ok(false)
        }
        Err(e) => return Err(e.into()),
    };
    let (read, mut write) = stream.into_split();
    write
        .write_all(format!("{} {}\n", action, job_id).as_bytes())
        .await?;
    let reply = BufReader::new(read).lines().next_line().await?.unwrap_or_default();
    match reply.trim() {
        "ok" => Ok(true),
        other => match other.strip_prefix("error ") {
            Some(msg) => bail!("{}", msg),
            None => bail!("unexpected reply from engine: {:?}", other),
        },
    }
}
