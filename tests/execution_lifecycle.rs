use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use plugforge::exec::{ExecutionKind, LaunchSpec, RunOutcome, RunRequest, StreamRules};
use plugforge::registry::ExecRecord;
use plugforge::types::{RecordKey, Status, TaskType};
use plugforge_test_utils::scripted_launcher::Script;
use plugforge_test_utils::{Harness, with_timeout};

fn spec(args: &[&str]) -> LaunchSpec {
    LaunchSpec {
        program: "yarn".to_string(),
        args: args.iter().map(|s| s.to_string()).collect(),
        cwd: PathBuf::from("."),
        env: BTreeMap::new(),
    }
}

fn seed_task(h: &Harness, name: &str, task_type: TaskType) -> RecordKey {
    let key = RecordKey::task("hello-world", name);
    h.registry
        .insert(ExecRecord::new(key.clone(), name, task_type, "skpm-build"));
    key
}

fn task_request(key: &RecordKey, task_type: TaskType) -> RunRequest {
    RunRequest {
        key: key.clone(),
        task_type,
        kind: ExecutionKind::Task,
        spec: spec(&["run", &key.identifier]),
        rules: StreamRules::task(),
    }
}

fn started(outcome: RunOutcome) -> plugforge::exec::ExecutionHandle {
    outcome.started().expect("run should have started")
}

#[tokio::test]
async fn short_term_stderr_then_clean_exit_ends_in_success() {
    let h = Harness::new();
    let key = seed_task(&h, "build", TaskType::ShortTerm);
    h.launcher.push(Script::new().stdout("a").stderr("b").exit(0));

    let handle = started(h.controller.run(task_request(&key, TaskType::ShortTerm)).unwrap());
    with_timeout(handle.wait()).await.unwrap();

    let record = h.registry.get(&key).unwrap();
    assert_eq!(record.status, Status::Success);
    assert_eq!(h.log_texts(&key), vec!["a", "b", "Task completed"]);
    assert_eq!(record.process_id, None);
    assert!(record.time_since_status_change.is_some());
}

#[tokio::test]
async fn short_term_status_follows_each_stream() {
    let h = Harness::new();
    let key = seed_task(&h, "build", TaskType::ShortTerm);
    let after_error = Arc::new(Notify::new());
    let after_recovery = Arc::new(Notify::new());
    h.launcher.push(
        Script::new()
            .stdout("a")
            .stderr("b")
            .wait_for(&after_error)
            .stdout("c")
            .wait_for(&after_recovery)
            .exit(0),
    );

    let handle = started(h.controller.run(task_request(&key, TaskType::ShortTerm)).unwrap());

    h.wait_for_status(&key, Status::Failed).await;
    assert_eq!(h.log_texts(&key), vec!["a", "b"]);
    assert!(h.registry.get(&key).unwrap().process_id.is_some());

    after_error.notify_one();
    h.wait_for_status(&key, Status::Pending).await;
    assert_eq!(h.log_texts(&key), vec!["a", "b", "c"]);

    after_recovery.notify_one();
    with_timeout(handle.wait()).await.unwrap();
    assert_eq!(h.registry.get(&key).unwrap().status, Status::Success);
}

#[tokio::test]
async fn short_term_non_zero_exit_fails() {
    let h = Harness::new();
    let key = seed_task(&h, "build", TaskType::ShortTerm);
    h.launcher.push(Script::new().stdout("compiling").exit(2));

    let handle = started(h.controller.run(task_request(&key, TaskType::ShortTerm)).unwrap());
    with_timeout(handle.wait()).await.unwrap();

    assert_eq!(h.registry.get(&key).unwrap().status, Status::Failed);
    assert_eq!(h.log_texts(&key), vec!["compiling", "Task failed"]);
}

#[tokio::test]
async fn run_sets_pending_and_attaches_pid() {
    let h = Harness::new();
    let key = seed_task(&h, "build", TaskType::ShortTerm);
    h.launcher.push(Script::new().until_terminated().exit(0));

    let handle = started(h.controller.run(task_request(&key, TaskType::ShortTerm)).unwrap());
    let record = h.registry.get(&key).unwrap();
    assert_eq!(record.status, Status::Pending);
    assert_eq!(record.process_id, handle.pid());
    assert_eq!(h.tracker.snapshot(), vec![handle.pid().unwrap()]);

    assert!(h.controller.abort(&key).unwrap());
    with_timeout(handle.wait()).await.unwrap();
    assert!(h.tracker.snapshot().is_empty());
}

#[tokio::test]
async fn second_run_while_attached_is_a_noop() {
    let h = Harness::new();
    let key = seed_task(&h, "watch", TaskType::Sustained);
    h.launcher.push(Script::new().stdout("watching").until_terminated());

    let handle = started(h.controller.run(task_request(&key, TaskType::Sustained)).unwrap());
    let pid = h.registry.get(&key).unwrap().process_id;
    assert!(pid.is_some());

    let again = h.controller.run(task_request(&key, TaskType::Sustained)).unwrap();
    assert!(matches!(again, RunOutcome::AlreadyRunning));
    assert_eq!(h.registry.get(&key).unwrap().process_id, pid);
    assert_eq!(h.launcher.launched().len(), 1);

    h.controller.abort(&key).unwrap();
    with_timeout(handle.wait()).await.unwrap();
}

#[tokio::test]
async fn sustained_abort_then_non_zero_exit_ends_idle() {
    let h = Harness::new();
    let key = seed_task(&h, "watch", TaskType::Sustained);
    h.launcher.push(Script::new().until_terminated().exit(143));

    let handle = started(h.controller.run(task_request(&key, TaskType::Sustained)).unwrap());
    assert_eq!(h.registry.get(&key).unwrap().status, Status::Success);

    let pid = handle.pid().unwrap();
    assert!(h.controller.abort(&key).unwrap());
    with_timeout(handle.wait()).await.unwrap();

    let record = h.registry.get(&key).unwrap();
    assert_eq!(record.status, Status::Idle);
    assert_eq!(record.process_id, None);
    assert_eq!(h.launcher.terminated(), vec![pid]);
    assert_eq!(h.log_texts(&key), vec!["Task aborted"]);
}

#[tokio::test]
async fn output_after_abort_is_logged_without_status_change() {
    let h = Harness::new();
    let key = seed_task(&h, "build", TaskType::ShortTerm);
    h.launcher.push(
        Script::new()
            .stdout("started")
            .until_terminated()
            .stderr("shutting down")
            .exit(1),
    );

    let handle = started(h.controller.run(task_request(&key, TaskType::ShortTerm)).unwrap());
    h.wait_for_log(&key, "started").await;
    h.controller.abort(&key).unwrap();
    with_timeout(handle.wait()).await.unwrap();

    assert_eq!(h.registry.get(&key).unwrap().status, Status::Idle);
    assert_eq!(
        h.log_texts(&key),
        vec!["started", "Task aborted", "shutting down"]
    );
}

#[tokio::test]
async fn abort_without_process_is_a_noop() {
    let h = Harness::new();
    let key = seed_task(&h, "build", TaskType::ShortTerm);

    assert!(!h.controller.abort(&key).unwrap());
    assert!(h.log_texts(&key).is_empty());
    assert!(h.launcher.terminated().is_empty());
}

#[tokio::test]
async fn second_abort_is_harmless() {
    let h = Harness::new();
    let key = seed_task(&h, "watch", TaskType::Sustained);
    h.launcher.push(Script::new().until_terminated().exit(1));

    let handle = started(h.controller.run(task_request(&key, TaskType::Sustained)).unwrap());
    assert!(h.controller.abort(&key).unwrap());
    assert!(!h.controller.abort(&key).unwrap());
    with_timeout(handle.wait()).await.unwrap();

    assert_eq!(h.log_texts(&key), vec!["Task aborted"]);
}

#[tokio::test]
async fn spawn_failure_logs_error_and_fails() {
    let h = Harness::new();
    let key = seed_task(&h, "build", TaskType::ShortTerm);
    h.launcher.push(Script::spawn_failure("spawn yarn ENOENT"));

    let handle = started(h.controller.run(task_request(&key, TaskType::ShortTerm)).unwrap());
    assert_eq!(handle.pid(), None);
    with_timeout(handle.wait()).await.unwrap();

    let record = h.registry.get(&key).unwrap();
    assert_eq!(record.status, Status::Failed);
    assert_eq!(record.process_id, None);
    assert_eq!(h.log_texts(&key), vec!["spawn yarn ENOENT", "Task failed"]);
}

#[tokio::test]
async fn sustained_spawn_failure_ends_idle() {
    let h = Harness::new();
    let key = seed_task(&h, "start", TaskType::Sustained);
    h.launcher.push(Script::spawn_failure("spawn yarn ENOENT"));

    let handle = started(h.controller.run(task_request(&key, TaskType::Sustained)).unwrap());
    with_timeout(handle.wait()).await.unwrap();

    assert_eq!(h.registry.get(&key).unwrap().status, Status::Idle);
    assert_eq!(h.log_texts(&key), vec!["spawn yarn ENOENT", "Task failed"]);
}

#[tokio::test]
async fn control_sequences_are_stripped_from_logs() {
    let h = Harness::new();
    let key = seed_task(&h, "build", TaskType::ShortTerm);
    h.launcher
        .push(Script::new().stdout("\x1b[1Gbuilding\x1b[32m ok\x1b[39m").exit(0));

    let handle = started(h.controller.run(task_request(&key, TaskType::ShortTerm)).unwrap());
    with_timeout(handle.wait()).await.unwrap();

    assert_eq!(
        h.log_texts(&key)[0],
        "building\x1b[32m ok\x1b[39m",
        "only ESC[1G is removed"
    );
}

#[tokio::test]
async fn unclean_repository_marker_ends_run_successfully() {
    let h = Harness::new();
    let key = seed_task(&h, "publish", TaskType::ShortTerm);
    h.launcher.push(
        Script::new()
            .stderr("Your git repository has untracked files or uncommitted changes.")
            .stderr("npm ERR! more noise")
            .exit(1),
    );

    let handle = started(h.controller.run(task_request(&key, TaskType::ShortTerm)).unwrap());
    with_timeout(handle.wait()).await.unwrap();

    assert_eq!(h.registry.get(&key).unwrap().status, Status::Success);
    assert_eq!(
        h.log_texts(&key),
        vec![
            "Your git repository has untracked files or uncommitted changes.",
            "Task completed"
        ]
    );
}

#[tokio::test]
async fn commands_use_command_messages() {
    let h = Harness::new();
    let key = RecordKey::command("hello-world", "my-command");
    h.registry.insert(ExecRecord::new(
        key.clone(),
        "My Command",
        TaskType::ShortTerm,
        "./my-command.js",
    ));
    h.launcher.push(Script::new().exit(0));

    let request = RunRequest {
        key: key.clone(),
        task_type: TaskType::ShortTerm,
        kind: ExecutionKind::Command,
        spec: spec(&["run", "hello.sketchplugin", "my-command", "--without-activating"]),
        rules: StreamRules::plain(),
    };
    let handle = started(h.controller.run(request).unwrap());
    with_timeout(handle.wait()).await.unwrap();

    assert_eq!(h.log_texts(&key), vec!["Command completed"]);
    assert_eq!(h.registry.get(&key).unwrap().status, Status::Success);
}

#[tokio::test]
async fn run_for_unknown_record_is_an_error() {
    let h = Harness::new();
    let key = RecordKey::task("hello-world", "missing");
    assert!(h.controller.run(task_request(&key, TaskType::ShortTerm)).is_err());
    assert!(h.launcher.launched().is_empty());
}

#[tokio::test]
async fn clear_log_keeps_ids_increasing() {
    let h = Harness::new();
    let key = seed_task(&h, "build", TaskType::ShortTerm);
    h.launcher.push(Script::new().stdout("one").exit(0));
    h.launcher.push(Script::new().stdout("two").exit(0));

    let handle = started(h.controller.run(task_request(&key, TaskType::ShortTerm)).unwrap());
    with_timeout(handle.wait()).await.unwrap();
    let last_id = h.registry.get(&key).unwrap().logs.last().unwrap().id;

    h.controller.clear_log(&key).unwrap();
    assert!(h.registry.get(&key).unwrap().logs.is_empty());

    let handle = started(h.controller.run(task_request(&key, TaskType::ShortTerm)).unwrap());
    with_timeout(handle.wait()).await.unwrap();

    let logs = h.registry.get(&key).unwrap().logs.clone();
    assert_eq!(logs[0].text, "two");
    assert!(logs[0].id > last_id);
}

#[tokio::test]
async fn abort_all_stops_every_live_run() {
    let h = Harness::new();
    let watch = seed_task(&h, "watch", TaskType::Sustained);
    let start = seed_task(&h, "start", TaskType::Sustained);
    h.launcher.push(Script::new().until_terminated().exit(1));
    h.launcher.push(Script::new().until_terminated().exit(1));

    let a = started(h.controller.run(task_request(&watch, TaskType::Sustained)).unwrap());
    let b = started(h.controller.run(task_request(&start, TaskType::Sustained)).unwrap());

    assert_eq!(h.controller.abort_all(), 2);
    with_timeout(a.wait()).await.unwrap();
    with_timeout(b.wait()).await.unwrap();

    assert!(!h.controller.is_active(&watch));
    assert!(!h.controller.is_active(&start));
    assert_eq!(h.registry.get(&watch).unwrap().status, Status::Idle);
    assert_eq!(h.registry.get(&start).unwrap().status, Status::Idle);
}

#[tokio::test]
async fn abort_after_completion_is_a_noop() {
    let h = Harness::new();
    let key = seed_task(&h, "build", TaskType::ShortTerm);
    h.launcher.push(Script::new().stdout("done").exit(0));

    let handle = started(h.controller.run(task_request(&key, TaskType::ShortTerm)).unwrap());
    with_timeout(handle.wait()).await.unwrap();

    assert!(!h.controller.abort(&key).unwrap());
    assert_eq!(h.registry.get(&key).unwrap().status, Status::Success);
    assert_eq!(h.log_texts(&key), vec!["done", "Task completed"]);
    assert!(h.launcher.terminated().is_empty());
}

#[tokio::test]
async fn run_refuses_records_being_changed() {
    let h = Harness::new();
    let key = RecordKey::command("hello-world", "hello");
    h.registry.insert(
        ExecRecord::new(key.clone(), "Hello", TaskType::ShortTerm, "./hello.js")
            .with_status(Status::Updating),
    );

    let request = RunRequest {
        key: key.clone(),
        task_type: TaskType::ShortTerm,
        kind: ExecutionKind::Command,
        spec: spec(&["run", "hello"]),
        rules: StreamRules::plain(),
    };
    assert!(h.controller.run(request).is_err());
    assert!(h.launcher.launched().is_empty());
    assert_eq!(h.registry.get(&key).unwrap().status, Status::Updating);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn abort_during_streaming_output_always_ends_idle() {
    for iteration in 0..300usize {
        let h = Harness::new();
        let key = seed_task(&h, "build", TaskType::ShortTerm);
        let mut script = Script::new();
        for i in 0..200 {
            script = if i % 2 == 0 {
                script.stderr(&format!("err {i}"))
            } else {
                script.stdout(&format!("out {i}"))
            };
        }
        h.launcher.push(script.exit(0));

        let handle = started(h.controller.run(task_request(&key, TaskType::ShortTerm)).unwrap());
        let threshold = iteration % 60;
        with_timeout(async {
            while h.log_texts(&key).len() < threshold {
                tokio::task::yield_now().await;
            }
        })
        .await;

        let aborted = h.controller.abort(&key).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("run did not finish")
            .unwrap();

        let record = h.registry.get(&key).unwrap();
        assert_eq!(record.process_id, None, "iteration {iteration}");
        let logs = h.log_texts(&key);
        if aborted {
            assert_eq!(record.status, Status::Idle, "iteration {iteration}");
            assert!(logs.iter().any(|t| t == "Task aborted"), "iteration {iteration}");
            assert!(!logs.iter().any(|t| t == "Task completed"), "iteration {iteration}");
        } else {
            assert_eq!(record.status, Status::Success, "iteration {iteration}");
            assert_eq!(logs.last().map(String::as_str), Some("Task completed"));
            assert!(!logs.iter().any(|t| t == "Task aborted"), "iteration {iteration}");
        }
    }
}
