#![cfg(unix)]

use std::collections::BTreeMap;
use std::sync::Arc;

use plugforge::exec::{
    ExecutionController, ExecutionKind, ExitPolicy, LaunchSpec, Launcher, ProcessEvent,
    RealLauncher, RunRequest, Stream, StreamRules, TrackedProcesses,
};
use plugforge::registry::{ExecRecord, Registry};
use plugforge::types::{RecordKey, Status, TaskType};
use plugforge_test_utils::{init_tracing, with_timeout};

fn sh(script: &str) -> LaunchSpec {
    LaunchSpec {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        cwd: std::env::temp_dir(),
        env: BTreeMap::new(),
    }
}

async fn collect(launcher: &RealLauncher, spec: LaunchSpec) -> (String, String, Vec<ProcessEvent>) {
    let mut handle = launcher.launch(spec);
    let mut stdout = String::new();
    let mut stderr = String::new();
    let mut exits = Vec::new();
    while let Some(event) = handle.events.recv().await {
        match &event {
            ProcessEvent::Output { stream: Stream::Stdout, chunk } => {
                stdout.push_str(&String::from_utf8_lossy(chunk))
            }
            ProcessEvent::Output { stream: Stream::Stderr, chunk } => {
                stderr.push_str(&String::from_utf8_lossy(chunk))
            }
            ProcessEvent::Exit(_) => exits.push(event.clone()),
        }
    }
    (stdout, stderr, exits)
}

#[tokio::test]
async fn streams_both_pipes_and_exits_once() {
    init_tracing();
    let launcher = RealLauncher::new();
    let (stdout, stderr, exits) =
        with_timeout(collect(&launcher, sh("printf a; printf b >&2; exit 3"))).await;

    assert_eq!(stdout, "a");
    assert_eq!(stderr, "b");
    assert_eq!(exits.len(), 1);
    match &exits[0] {
        ProcessEvent::Exit(info) => {
            assert_eq!(info.code, Some(3));
            assert!(info.error.is_none());
        }
        other => panic!("expected exit, got {:?}", other),
    }
}

#[tokio::test]
async fn environment_overrides_are_applied() {
    init_tracing();
    let launcher = RealLauncher::new();
    let mut spec = sh("printf \"$FORCE_COLOR\"");
    spec.env.insert("FORCE_COLOR".into(), "true".into());

    let (stdout, _, _) = with_timeout(collect(&launcher, spec)).await;
    assert_eq!(stdout, "true");
}

#[tokio::test]
async fn missing_program_is_a_synthesized_exit() {
    init_tracing();
    let launcher = RealLauncher::new();
    let spec = LaunchSpec {
        program: "definitely-not-a-real-program-plugforge".into(),
        args: Vec::new(),
        cwd: std::env::temp_dir(),
        env: BTreeMap::new(),
    };

    let mut handle = launcher.launch(spec);
    assert!(handle.pid.is_none());
    let exits = with_timeout(async {
        let mut exits = Vec::new();
        while let Some(event) = handle.events.recv().await {
            exits.push(event);
        }
        exits
    })
    .await;

    assert_eq!(exits.len(), 1);
    match &exits[0] {
        ProcessEvent::Exit(info) => {
            assert_eq!(info.code, Some(-1));
            assert!(info.error.is_some());
        }
        other => panic!("expected exit, got {:?}", other),
    }
}

#[tokio::test]
async fn terminate_stops_the_process_group() {
    init_tracing();
    let launcher = RealLauncher::new();
    // The child shell keeps a grandchild; both share the new process group.
    let mut handle = launcher.launch(sh("sleep 30 & wait"));
    let pid = handle.pid.expect("sh should start");

    launcher.terminate(pid).unwrap();

    let exit = with_timeout(async {
        loop {
            match handle.events.recv().await {
                Some(ProcessEvent::Exit(info)) => break info,
                Some(_) => continue,
                None => panic!("channel closed without exit"),
            }
        }
    })
    .await;
    assert_eq!(exit.code, None);
    assert_eq!(exit.signal, Some(15));

    // Terminating again is fine.
    launcher.terminate(pid).unwrap();
}

#[tokio::test]
async fn controller_with_real_processes() {
    init_tracing();
    let registry = Arc::new(Registry::new());
    let launcher = Arc::new(RealLauncher::new());
    let tracker = Arc::new(TrackedProcesses::new());
    let controller =
        ExecutionController::new(Arc::clone(&registry), launcher, tracker, ExitPolicy::default());

    let key = RecordKey::task("real", "build");
    registry.insert(ExecRecord::new(key.clone(), "build", TaskType::ShortTerm, "sh"));

    let request = RunRequest {
        key: key.clone(),
        task_type: TaskType::ShortTerm,
        kind: ExecutionKind::Task,
        spec: sh("printf done"),
        rules: StreamRules::task(),
    };
    let handle = controller.run(request).unwrap().started().unwrap();
    with_timeout(handle.wait()).await.unwrap();

    let record = registry.get(&key).unwrap();
    assert_eq!(record.status, Status::Success);
    let texts: Vec<&str> = record.logs.iter().map(|e| e.text.as_str()).collect();
    assert_eq!(texts, vec!["done", "Task completed"]);
}
