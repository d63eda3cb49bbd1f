use super::*;
use crate::control::Signal;
use crate::transport::scripted::{ScriptedTransport, Step};
use std::sync::Arc;

const URL: &str = "http://cdn.test/lecture.mp4";

fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

#[derive(Default)]
struct Recorder {
    updates: Vec<UnitUpdate>,
    /// Called with the byte count after every progress update.
    on_progress: Option<Box<dyn FnMut(u64)>>,
}

impl ProgressSink for Recorder {
    fn update(&mut self, update: UnitUpdate) {
        if let UnitUpdate::Progress(bytes) = update {
            if let Some(f) = self.on_progress.as_mut() {
                f(bytes);
            }
        }
        self.updates.push(update);
    }
}

impl Recorder {
    fn progress(&self) -> Vec<u64> {
        self.updates
            .iter()
            .filter_map(|u| match u {
                UnitUpdate::Progress(b) => Some(*b),
                _ => None,
            })
            .collect()
    }
}

struct Harness {
    transport: ScriptedTransport,
    limiter: RateLimiter,
    signal: Arc<JobSignal>,
    policy: RetryPolicy,
    headers: HashMap<String, String>,
    cleanup: CleanupPolicy,
    dir: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        Self {
            transport: ScriptedTransport::new(),
            limiter: RateLimiter::new(None),
            signal: Arc::new(JobSignal::new()),
            policy: fast_policy(),
            headers: HashMap::new(),
            cleanup: CleanupPolicy::Delete,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn ctx(&self) -> TransferContext<'_> {
        TransferContext {
            transport: &self.transport,
            limiter: &self.limiter,
            signal: &self.signal,
            policy: &self.policy,
            headers: &self.headers,
            chunk_size: 1000,
            checkpoint_interval: Duration::from_millis(0),
            cleanup: self.cleanup,
        }
    }

    fn task(&self, expected: Option<u64>) -> TransferTask {
        TransferTask {
            unit_id: 1,
            url: URL.to_string(),
            destination: self.dir.path().join("course").join("001-intro.mp4"),
            expected_size: expected,
            resume_cursor: 0,
            attempts: 0,
            max_attempts: 3,
        }
    }
}

#[test]
fn downloads_fresh_file() {
    let h = Harness::new();
    let data = body(10_500);
    h.transport.add(URL, data.clone());
    let task = h.task(None);
    let mut rec = Recorder::default();

    let out = execute(&task, &h.ctx(), &mut rec);
    assert_eq!(out, UnitOutcome::Completed { bytes: 10_500, attempts: 1 });
    assert_eq!(std::fs::read(&task.destination).unwrap(), data);
    assert!(!storage::temp_path(&task.destination).exists());
    assert_eq!(rec.updates[0], UnitUpdate::Started { offset: 0 });
    assert_eq!(rec.updates[1], UnitUpdate::Length(Some(10_500)));
    assert_eq!(rec.progress().last(), Some(&10_500));
}

#[test]
fn unknown_length_completes_when_stream_closes() {
    let h = Harness::new();
    let data = body(2_345);
    h.transport.add_unknown_length(URL, data.clone());
    let task = h.task(Some(9_999));
    let mut rec = Recorder::default();

    let out = execute(&task, &h.ctx(), &mut rec);
    assert_eq!(out, UnitOutcome::Completed { bytes: 2_345, attempts: 1 });
    assert!(rec.updates.contains(&UnitUpdate::Length(None)));
    assert_eq!(std::fs::read(&task.destination).unwrap(), data);
}

#[test]
fn resumes_from_matching_part_file() {
    let h = Harness::new();
    let data = body(5_000);
    h.transport.add(URL, data.clone());
    let mut task = h.task(Some(5_000));
    std::fs::create_dir_all(task.destination.parent().unwrap()).unwrap();
    std::fs::write(storage::temp_path(&task.destination), &data[..1_200]).unwrap();
    task.resume_cursor = 1_200;
    let mut rec = Recorder::default();

    let out = execute(&task, &h.ctx(), &mut rec);
    assert_eq!(out, UnitOutcome::Completed { bytes: 5_000, attempts: 1 });
    assert_eq!(h.transport.requests(URL), vec![1_200]);
    assert_eq!(rec.updates[0], UnitUpdate::Started { offset: 1_200 });
    assert_eq!(std::fs::read(&task.destination).unwrap(), data);
}

#[test]
fn stale_part_file_restarts_from_zero() {
    let h = Harness::new();
    let data = body(3_000);
    h.transport.add(URL, data.clone());
    let mut task = h.task(Some(3_000));
    std::fs::create_dir_all(task.destination.parent().unwrap()).unwrap();
    std::fs::write(storage::temp_path(&task.destination), b"garbage beyond the cursor").unwrap();
    task.resume_cursor = 4;
    let mut rec = Recorder::default();

    let out = execute(&task, &h.ctx(), &mut rec);
    assert_eq!(out, UnitOutcome::Completed { bytes: 3_000, attempts: 1 });
    assert_eq!(h.transport.requests(URL), vec![0]);
    assert_eq!(std::fs::read(&task.destination).unwrap(), data);
}

#[test]
fn transient_failures_are_retried() {
    let h = Harness::new();
    let data = body(4_000);
    h.transport.add(URL, data.clone());
    h.transport.script(URL, &[Step::Http(503), Step::NetworkError]);
    let task = h.task(Some(4_000));
    let mut rec = Recorder::default();

    let out = execute(&task, &h.ctx(), &mut rec);
    assert_eq!(out, UnitOutcome::Completed { bytes: 4_000, attempts: 3 });
    let retries: Vec<u32> = rec
        .updates
        .iter()
        .filter_map(|u| match u {
            UnitUpdate::Retrying { attempts, .. } => Some(*attempts),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![1, 2]);
    assert_eq!(std::fs::read(&task.destination).unwrap(), data);
}

#[test]
fn cut_stream_resumes_from_durable_offset() {
    let h = Harness::new();
    let data = body(6_000);
    h.transport.add(URL, data.clone());
    h.transport.script(URL, &[Step::CutAt(2_500)]);
    let task = h.task(Some(6_000));
    let mut rec = Recorder::default();

    let out = execute(&task, &h.ctx(), &mut rec);
    assert_eq!(out, UnitOutcome::Completed { bytes: 6_000, attempts: 2 });
    assert_eq!(h.transport.requests(URL), vec![0, 2_500]);
    let progress = rec.progress();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {progress:?}");
    assert_eq!(std::fs::read(&task.destination).unwrap(), data);
}

#[test]
fn ignored_range_discards_prefix_without_going_backwards() {
    let h = Harness::new();
    let data = body(6_000);
    h.transport.add(URL, data.clone());
    h.transport.script(URL, &[Step::CutAt(2_500), Step::IgnoreRange]);
    let task = h.task(Some(6_000));
    let mut rec = Recorder::default();

    let out = execute(&task, &h.ctx(), &mut rec);
    assert_eq!(out, UnitOutcome::Completed { bytes: 6_000, attempts: 2 });
    let progress = rec.progress();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {progress:?}");
    assert_eq!(std::fs::read(&task.destination).unwrap(), data);
}

#[test]
fn permanent_error_fails_without_retry() {
    let h = Harness::new();
    h.transport.add(URL, body(100));
    h.transport.script(URL, &[Step::Http(403)]);
    let task = h.task(None);

    let out = execute(&task, &h.ctx(), &mut Recorder::default());
    match out {
        UnitOutcome::Failed { error, attempts } => {
            assert_eq!(attempts, 1);
            assert_eq!(error.kind, ErrorKind::PermanentSource);
            assert!(error.message.contains("403"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(h.transport.requests(URL).len(), 1);
}

#[test]
fn exhausted_retries_fail_with_transient_kind() {
    let h = Harness::new();
    h.transport.add(URL, body(100));
    h.transport.script(URL, &[Step::NetworkError, Step::NetworkError, Step::NetworkError]);
    let task = h.task(None);

    let out = execute(&task, &h.ctx(), &mut Recorder::default());
    match out {
        UnitOutcome::Failed { error, attempts } => {
            assert_eq!(attempts, 3);
            assert_eq!(error.kind, ErrorKind::TransientNetwork);
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[test]
fn attempts_continue_from_previous_runs() {
    let h = Harness::new();
    h.transport.add(URL, body(100));
    h.transport.script(URL, &[Step::NetworkError, Step::NetworkError]);
    let mut task = h.task(None);
    task.attempts = 2;
    task.max_attempts = 5;

    let out = execute(&task, &h.ctx(), &mut Recorder::default());
    assert_eq!(out, UnitOutcome::Completed { bytes: 100, attempts: 5 });
}

#[test]
fn pause_parks_with_durable_cursor_and_resume_is_byte_identical() {
    let h = Harness::new();
    let data = body(20_000);
    h.transport.add(URL, data.clone());
    let task = h.task(Some(20_000));

    let signal = Arc::clone(&h.signal);
    let mut rec = Recorder {
        on_progress: Some(Box::new(move |bytes| {
            if bytes >= 8_000 {
                signal.set(Signal::Pause);
            }
        })),
        ..Default::default()
    };
    let out = execute(&task, &h.ctx(), &mut rec);
    let UnitOutcome::Paused { cursor, attempts } = out else {
        panic!("expected pause, got {out:?}");
    };
    assert_eq!(cursor, 8_000);
    assert_eq!(attempts, 0);
    let part = storage::temp_path(&task.destination);
    assert_eq!(std::fs::metadata(&part).unwrap().len(), cursor);
    assert_eq!(rec.updates.last(), Some(&UnitUpdate::Checkpoint(8_000)));

    h.signal.set(Signal::Run);
    let mut resumed = task.clone();
    resumed.resume_cursor = cursor;
    resumed.attempts = attempts;
    let out = execute(&resumed, &h.ctx(), &mut Recorder::default());
    assert_eq!(out, UnitOutcome::Completed { bytes: 20_000, attempts: 1 });
    assert_eq!(std::fs::read(&task.destination).unwrap(), data);
}

#[test]
fn cancel_removes_partial_file() {
    let h = Harness::new();
    h.transport.add(URL, body(10_000));
    let task = h.task(Some(10_000));
    let signal = Arc::clone(&h.signal);
    let mut rec = Recorder {
        on_progress: Some(Box::new(move |bytes| {
            if bytes >= 4_000 {
                signal.set(Signal::Cancel);
            }
        })),
        ..Default::default()
    };

    let out = execute(&task, &h.ctx(), &mut rec);
    assert_eq!(out, UnitOutcome::Cancelled { attempts: 0 });
    assert!(!storage::temp_path(&task.destination).exists());
    assert!(!task.destination.exists());
}

#[test]
fn cancel_keeps_partial_file_when_configured() {
    let mut h = Harness::new();
    h.cleanup = CleanupPolicy::Keep;
    h.transport.add(URL, body(10_000));
    let task = h.task(Some(10_000));
    let signal = Arc::clone(&h.signal);
    let mut rec = Recorder {
        on_progress: Some(Box::new(move |bytes| {
            if bytes >= 4_000 {
                signal.set(Signal::Cancel);
            }
        })),
        ..Default::default()
    };

    let out = execute(&task, &h.ctx(), &mut rec);
    assert_eq!(out, UnitOutcome::Cancelled { attempts: 0 });
    let part = storage::temp_path(&task.destination);
    assert_eq!(std::fs::metadata(part).unwrap().len(), 4_000);
}

#[test]
fn complete_part_file_is_finalized_on_416() {
    let h = Harness::new();
    let data = body(3_000);
    h.transport.add(URL, data.clone());
    let mut task = h.task(Some(3_000));
    std::fs::create_dir_all(task.destination.parent().unwrap()).unwrap();
    std::fs::write(storage::temp_path(&task.destination), &data).unwrap();
    task.resume_cursor = 3_000;

    let out = execute(&task, &h.ctx(), &mut Recorder::default());
    assert_eq!(out, UnitOutcome::Completed { bytes: 3_000, attempts: 1 });
    assert_eq!(std::fs::read(&task.destination).unwrap(), data);
}

#[test]
fn existing_destination_is_skipped() {
    let h = Harness::new();
    h.transport.add(URL, body(50));
    let task = h.task(Some(50));
    std::fs::create_dir_all(task.destination.parent().unwrap()).unwrap();
    std::fs::write(&task.destination, body(50)).unwrap();

    let out = execute(&task, &h.ctx(), &mut Recorder::default());
    assert_eq!(out, UnitOutcome::Skipped { bytes: 50 });
    assert!(h.transport.requests(URL).is_empty());
}

#[test]
fn unwritable_destination_is_local_storage_failure() {
    let h = Harness::new();
    h.transport.add(URL, body(50));
    let blocker = h.dir.path().join("course");
    std::fs::write(&blocker, b"a file where a directory should be").unwrap();
    let task = h.task(Some(50));

    match execute(&task, &h.ctx(), &mut Recorder::default()) {
        UnitOutcome::Failed { error, .. } => assert_eq!(error.kind, ErrorKind::LocalStorage),
        other => panic!("expected local storage failure, got {other:?}"),
    }
}
