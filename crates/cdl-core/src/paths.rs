//! XDG locations and destination file naming.

use std::io;
use std::path::{Path, PathBuf};

/// `~/.local/state/cdl`: database, log file and control socket live here.
pub fn state_dir() -> io::Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("cdl")?;
    Ok(xdg_dirs.get_state_home())
}

/// Default path for the job registry database.
pub fn default_db_path() -> io::Result<PathBuf> {
    Ok(state_dir()?.join("jobs.db"))
}

/// Default path for the control socket (same XDG state dir as the DB).
pub fn default_control_socket_path() -> io::Result<PathBuf> {
    Ok(state_dir()?.join("control.sock"))
}

/// Sanitizes a title for use as a single path component.
///
/// - Drops characters that are invalid on common filesystems (`<>:"/\|?*`)
/// - Replaces control characters and whitespace runs with a single `_`
/// - Trims leading/trailing dots and underscores
/// - Limits length to 200 bytes
pub fn sanitize_component(name: &str) -> String {
    const MAX_LEN: usize = 200;

    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;

    for c in name.chars() {
        if matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') {
            continue;
        }
        let replacement = if c.is_control() || c.is_whitespace() {
            '_'
        } else {
            c
        };

        if replacement == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(replacement);
            prev_underscore = false;
        }
    }

    let trimmed = out.trim_matches(|c| c == '.' || c == '_');

    let trimmed = if trimmed.len() > MAX_LEN {
        let mut take = MAX_LEN;
        while take > 0 && !trimmed.is_char_boundary(take) {
            take -= 1;
        }
        &trimmed[..take]
    } else {
        trimmed
    };

    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Directory for one course of one user: `<root>/<user>/<course>`.
pub fn course_dir(root: &Path, user_id: &str, course_title: &str) -> PathBuf {
    root.join(sanitize_component(user_id))
        .join(sanitize_component(course_title))
}

/// Moves `<dir>/<file>` to `<dir>/job-<id>/<file>`. Two jobs for the same
/// course (or for courses whose titles sanitize alike) never share a file.
pub fn job_scoped(destination: &Path, job_id: i64) -> PathBuf {
    let dir = destination.parent().unwrap_or_else(|| Path::new(""));
    let scoped = dir.join(format!("job-{job_id}"));
    match destination.file_name() {
        Some(name) => scoped.join(name),
        None => scoped,
    }
}
