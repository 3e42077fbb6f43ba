//! Full-lifecycle exercises of a run's on-disk artifacts through the public
//! `RunStore` API, the way the scheduler and a reading supervisor actually
//! use it across a run.

use attractor_store::{FinalOutcome, ProgressEvent, RunStore, TerminalStatus};

#[test]
fn final_json_is_written_at_most_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = RunStore::open(dir.path()).unwrap();

    let first = FinalOutcome::new("run-1", TerminalStatus::Success);
    assert!(store.save_final(&first).unwrap());

    let second = FinalOutcome::new("run-1", TerminalStatus::Fail).with_failure_reason("ignored");
    assert!(!store.save_final(&second).unwrap());

    let loaded = store.load_final().unwrap().unwrap();
    assert_eq!(loaded.status, TerminalStatus::Success);
}

#[test]
fn live_json_mirrors_the_last_emitted_progress_event() {
    let dir = tempfile::tempdir().unwrap();
    let store = RunStore::open(dir.path()).unwrap();

    store
        .emit_progress(&ProgressEvent::new("stage_attempt_start", "run-1").with_node("n1"))
        .unwrap();
    store
        .emit_progress(&ProgressEvent::new("stage_attempt_end", "run-1").with_node("n1"))
        .unwrap();

    let live = store.load_live().unwrap().unwrap();
    assert_eq!(live.event, "stage_attempt_end");
}

#[test]
fn missing_artifacts_are_absence_not_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = RunStore::open(dir.path()).unwrap();
    assert!(store.load_checkpoint().unwrap().is_none());
    assert!(store.load_final().unwrap().is_none());
    assert!(store.read_pid().unwrap().is_none());
}

#[test]
fn load_all_progress_skips_blank_and_malformed_lines() {
    let dir = tempfile::tempdir().unwrap();
    let store = RunStore::open(dir.path()).unwrap();
    store.emit_progress(&ProgressEvent::new("a", "run-1")).unwrap();
    store.emit_progress(&ProgressEvent::new("b", "run-1")).unwrap();

    let path = dir.path().join("progress.ndjson");
    let mut contents = std::fs::read_to_string(&path).unwrap();
    contents.push('\n');
    contents.push_str("{not valid json\n");
    std::fs::write(&path, contents).unwrap();

    let events = store.load_all_progress().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event, "a");
    assert_eq!(events[1].event, "b");
}
