//! Whole-pipeline tests: load → render → threshold → reconcile → cache.

mod common;

use common::RecordingDispatcher;
use egil_scim_client::cache::codec;
use egil_scim_client::{
    resolve_plugins, run_with, AppConfig, AuditLogger, JsonFileLoader, Renderer, RunOptions,
    SyncError,
};
use serde_json::json;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn make_config(dir: &Path, extra: &str) -> AppConfig {
    let text = format!(
        r#"
            scim-url = "https://scim.example.com"
            cache-file = "objects.cache"
            scim-type-send-order = ["Student"]
            {extra}

            [types.Student]
            unique-identifier = "GUID"
            scim-url-endpoint = "Users"
            scim-json-template = '{{"externalId": "${{GUID}}", "userName": "${{userName}}"}}'
        "#
    );
    AppConfig::parse(&text, dir.to_path_buf()).unwrap()
}

fn student_loader(students: &[(&str, &str)]) -> JsonFileLoader {
    let entries: Vec<serde_json::Value> = students
        .iter()
        .map(|(uid, name)| json!({"GUID": uid, "userName": name}))
        .collect();
    JsonFileLoader::from_value(json!({ "Student": entries })).unwrap()
}

fn run(
    config: &AppConfig,
    students: &[(&str, &str)],
    dispatcher: &mut RecordingDispatcher,
    options: &RunOptions,
) -> Result<(), SyncError> {
    let mut loader = student_loader(students);
    let plugins = resolve_plugins(&config.plugins).unwrap();
    let mut renderer = Renderer::new(config.escape_template_values, plugins);
    let mut audit = AuditLogger::disabled();
    run_with(
        config,
        &mut loader,
        &mut renderer,
        dispatcher,
        &mut audit,
        options,
    )
}

fn cache_bytes(config: &AppConfig) -> Vec<u8> {
    std::fs::read(config.resolve_path(Path::new("objects.cache"))).unwrap_or_default()
}

#[test]
fn cold_start_creates_every_user() {
    let dir = TempDir::new().unwrap();
    let config = make_config(dir.path(), "");
    let mut dispatcher = RecordingDispatcher::new();

    run(
        &config,
        &[("u1", "a"), ("u2", "b"), ("u3", "c")],
        &mut dispatcher,
        &RunOptions::default(),
    )
    .unwrap();

    assert_eq!(dispatcher.call_count(), 3);
    assert!(dispatcher.calls.iter().all(|c| c.starts_with("create Users")));

    let cached = codec::read(&config.resolve_path(Path::new("objects.cache"))).unwrap();
    assert_eq!(cached.len(), 3);
    assert!(cached.contains("u1") && cached.contains("u2") && cached.contains("u3"));
}

#[test]
fn identical_second_run_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let config = make_config(dir.path(), "");
    let students = [("u1", "a"), ("u2", "b")];

    let mut first = RecordingDispatcher::new();
    run(&config, &students, &mut first, &RunOptions::default()).unwrap();
    let bytes_after_first = cache_bytes(&config);

    let mut second = RecordingDispatcher::new();
    run(&config, &students, &mut second, &RunOptions::default()).unwrap();

    assert_eq!(second.call_count(), 0);
    // Deterministic: the rewritten cache is byte-identical.
    assert_eq!(cache_bytes(&config), bytes_after_first);
}

#[test]
fn update_create_delete_mix() {
    let dir = TempDir::new().unwrap();
    let config = make_config(dir.path(), "");

    let mut seed = RecordingDispatcher::new();
    run(
        &config,
        &[("u1", "a"), ("u2", "b")],
        &mut seed,
        &RunOptions::default(),
    )
    .unwrap();

    let mut dispatcher = RecordingDispatcher::new();
    run(
        &config,
        &[("u1", "a2"), ("u3", "c")],
        &mut dispatcher,
        &RunOptions::default(),
    )
    .unwrap();

    assert_eq!(
        dispatcher.calls,
        [
            "update Users u1".to_string(),
            "create Users u3".to_string(),
            "delete Users u2".to_string(),
        ]
    );

    let cached = codec::read(&config.resolve_path(Path::new("objects.cache"))).unwrap();
    assert_eq!(cached.len(), 2);
    assert!(cached.get("u1").unwrap().json().contains("a2"));
    assert!(cached.contains("u3"));
    assert!(!cached.contains("u2"));
}

#[test]
fn failed_delete_is_retained_and_retried() {
    let dir = TempDir::new().unwrap();
    let config = make_config(dir.path(), "");

    let mut seed = RecordingDispatcher::new();
    run(&config, &[("u1", "x")], &mut seed, &RunOptions::default()).unwrap();

    // Delete fails with a 500: the record stays cached.
    let mut failing = RecordingDispatcher::new();
    failing.delete_failures.insert("u1".to_string(), 500);
    run(&config, &[], &mut failing, &RunOptions::default()).unwrap();

    let cached = codec::read(&config.resolve_path(Path::new("objects.cache"))).unwrap();
    assert!(cached.contains("u1"));

    // Next run retries the delete; on success the record is gone.
    let mut retry = RecordingDispatcher::new();
    run(&config, &[], &mut retry, &RunOptions::default()).unwrap();
    assert_eq!(retry.calls, ["delete Users u1".to_string()]);

    let cached = codec::read(&config.resolve_path(Path::new("objects.cache"))).unwrap();
    assert!(cached.is_empty());
}

#[test]
fn tripped_threshold_leaves_cache_untouched_and_sends_nothing() {
    let dir = TempDir::new().unwrap();
    let config = make_config(dir.path(), "");

    let seed_students: Vec<(String, String)> = (0..10)
        .map(|i| (format!("u{i}"), format!("name{i}")))
        .collect();
    let seed_refs: Vec<(&str, &str)> = seed_students
        .iter()
        .map(|(uid, name)| (uid.as_str(), name.as_str()))
        .collect();
    let mut seed = RecordingDispatcher::new();
    run(&config, &seed_refs, &mut seed, &RunOptions::default()).unwrap();
    let bytes_before = cache_bytes(&config);

    let guarded = make_config(
        dir.path(),
        r#"
            [types.Object]
            threshold = 5
        "#,
    );
    let mut dispatcher = RecordingDispatcher::new();
    let error = run(
        &guarded,
        &[("u1", "name1")],
        &mut dispatcher,
        &RunOptions::default(),
    )
    .unwrap_err();

    assert!(matches!(error, SyncError::Threshold(_)));
    assert_eq!(dispatcher.call_count(), 0);
    assert_eq!(cache_bytes(&guarded), bytes_before);
}

#[test]
fn multi_byte_json_round_trips_and_stays_quiet() {
    let dir = TempDir::new().unwrap();
    let config = make_config(dir.path(), "");
    let students = [("u1", "Åström")];

    let mut first = RecordingDispatcher::new();
    run(&config, &students, &mut first, &RunOptions::default()).unwrap();

    let cached = codec::read(&config.resolve_path(Path::new("objects.cache"))).unwrap();
    assert!(cached.get("u1").unwrap().json().contains("Åström"));

    let mut second = RecordingDispatcher::new();
    run(&config, &students, &mut second, &RunOptions::default()).unwrap();
    assert_eq!(second.call_count(), 0);
}

#[test]
fn rebuild_mode_recreates_current_and_drops_the_rest() {
    let dir = TempDir::new().unwrap();
    let config = make_config(dir.path(), "");

    let mut seed = RecordingDispatcher::new();
    run(
        &config,
        &[("u1", "a"), ("u2", "b")],
        &mut seed,
        &RunOptions::default(),
    )
    .unwrap();

    let mut dispatcher = RecordingDispatcher::new();
    let options = RunOptions {
        rebuild_cache: true,
        ..Default::default()
    };
    run(
        &config,
        &[("u1", "a2"), ("u3", "c")],
        &mut dispatcher,
        &options,
    )
    .unwrap();

    assert_eq!(
        dispatcher.calls,
        [
            "create Users u1".to_string(),
            "create Users u3".to_string(),
        ]
    );

    let cached = codec::read(&config.resolve_path(Path::new("objects.cache"))).unwrap();
    assert_eq!(cached.len(), 2);
    assert!(cached.contains("u1") && cached.contains("u3"));
    assert!(!cached.contains("u2"));
}

#[test]
fn transport_failure_aborts_without_touching_the_cache() {
    let dir = TempDir::new().unwrap();
    let config = make_config(dir.path(), "");

    let mut seed = RecordingDispatcher::new();
    run(&config, &[("u1", "a")], &mut seed, &RunOptions::default()).unwrap();
    let bytes_before = cache_bytes(&config);

    let mut dispatcher = RecordingDispatcher::new();
    dispatcher.fail_transport = true;
    let error = run(
        &config,
        &[("u1", "changed")],
        &mut dispatcher,
        &RunOptions::default(),
    )
    .unwrap_err();

    assert!(matches!(error, SyncError::Transport(_)));
    assert_eq!(cache_bytes(&config), bytes_before);
}

#[test]
fn audit_journal_records_every_operation() {
    #[derive(Clone)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    let dir = TempDir::new().unwrap();
    let config = make_config(dir.path(), "");
    let buffer = Shared(Arc::new(Mutex::new(Vec::new())));

    let mut loader = student_loader(&[("u1", "anna")]);
    let mut renderer = Renderer::new(true, Vec::new());
    let mut dispatcher = RecordingDispatcher::new();
    let mut audit = AuditLogger::to_writer(Box::new(buffer.clone()));
    run_with(
        &config,
        &mut loader,
        &mut renderer,
        &mut dispatcher,
        &mut audit,
        &RunOptions::default(),
    )
    .unwrap();

    let journal = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
    let lines: Vec<&str> = journal.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("Created Student anna (u1)"));
}

#[test]
fn block_plugin_drops_objects_and_keeps_cached_ones() {
    let dir = TempDir::new().unwrap();
    let config = make_config(dir.path(), "");

    // Seed the cache without any plugin.
    let mut seed = RecordingDispatcher::new();
    run(&config, &[("u1", "anna")], &mut seed, &RunOptions::default()).unwrap();

    // Students render under the User endpoint type; blocking it drops every
    // object before dispatch, and the cached renderings are neither sent
    // nor deleted.
    let blocking = make_config(dir.path(), r#"plugins = ["block:User"]"#);
    let mut dispatcher = RecordingDispatcher::new();
    run(
        &blocking,
        &[("u1", "anna"), ("u2", "berit")],
        &mut dispatcher,
        &RunOptions::default(),
    )
    .unwrap();

    assert_eq!(dispatcher.call_count(), 0);
    let cached = codec::read(&config.resolve_path(Path::new("objects.cache"))).unwrap();
    assert!(cached.contains("u1"));
    assert!(!cached.contains("u2"));
}

#[test]
fn process_plugin_transforms_dispatched_and_cached_json() {
    let dir = TempDir::new().unwrap();
    let config = make_config(dir.path(), r#"plugins = ["compact-json"]"#);

    let mut dispatcher = RecordingDispatcher::new();
    run(&config, &[("u1", "anna")], &mut dispatcher, &RunOptions::default()).unwrap();

    assert_eq!(dispatcher.calls, ["create Users u1".to_string()]);
    let cached = codec::read(&config.resolve_path(Path::new("objects.cache"))).unwrap();
    // The template's spacing is gone; members come back in serde_json's
    // sorted order.
    assert_eq!(
        cached.get("u1").unwrap().json(),
        r#"{"externalId":"u1","userName":"anna"}"#
    );
}

#[test]
fn skip_load_excludes_a_type_from_the_run() {
    let dir = TempDir::new().unwrap();
    let config = make_config(dir.path(), "");

    let mut dispatcher = RecordingDispatcher::new();
    let options = RunOptions {
        skip_types: vec!["Student".to_string()],
        ..Default::default()
    };
    run(&config, &[("u1", "a")], &mut dispatcher, &options).unwrap();

    assert_eq!(dispatcher.call_count(), 0);
    let cached = codec::read(&config.resolve_path(Path::new("objects.cache"))).unwrap();
    assert!(cached.is_empty());
}
