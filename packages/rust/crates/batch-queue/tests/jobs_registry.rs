#![allow(missing_docs)]

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use batch_queue::{ExecutorRegistry, Job, RegistryError};

use common::{PickyExecutor, RecordingExecutor};

#[test]
fn resolve_matches_job_type_and_reports_unknown_types() {
    let registry = ExecutorRegistry::new();
    registry.register("render", RecordingExecutor::default());

    assert!(registry.resolve(&Job::new("render", "a.stl")).is_ok());
    assert_eq!(
        registry.resolve(&Job::new("video", "a.stl")).err(),
        Some(RegistryError::NotFound {
            job_type: "video".to_string()
        })
    );
}

#[test]
fn executor_can_refuse_a_job_with_a_matching_key() {
    let registry = ExecutorRegistry::new();
    registry.register("render", PickyExecutor);

    let job = Job::with_id("job-1", "render", "notes.txt");
    assert_eq!(
        registry.resolve(&job).err(),
        Some(RegistryError::Refused {
            job_type: "render".to_string(),
            job_id: "job-1".to_string(),
        })
    );
    assert!(registry.resolve(&Job::new("render", "chair.stl")).is_ok());
}

#[test]
fn re_registering_returns_the_replaced_executor_without_cleanup() {
    let registry = ExecutorRegistry::new();
    let first = Arc::new(RecordingExecutor::default());
    assert!(registry.register_shared("render", first.clone()).is_none());

    let replaced = registry.register("render", RecordingExecutor::default());
    assert!(replaced.is_some());
    assert_eq!(registry.len(), 1);
    assert_eq!(first.cleanups.load(Ordering::SeqCst), 0);
}

#[test]
fn unregister_runs_cleanup_once() {
    let registry = ExecutorRegistry::new();
    let executor = Arc::new(RecordingExecutor::default());
    registry.register_shared("render", executor.clone());
    registry.register("thumbnail", RecordingExecutor::default());
    assert_eq!(registry.job_types(), vec!["render", "thumbnail"]);

    assert!(registry.unregister("render"));
    assert!(!registry.unregister("render"));
    assert_eq!(executor.cleanups.load(Ordering::SeqCst), 1);
    assert!(!registry.contains("render"));
    assert_eq!(registry.job_types(), vec!["thumbnail"]);
}
