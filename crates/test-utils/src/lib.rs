pub mod builders;
pub mod scripted_launcher;

use std::sync::{Arc, Once};
use std::time::Duration;

use plugforge::exec::{ExecutionController, ExitPolicy, TrackedProcesses};
use plugforge::registry::Registry;
use plugforge::types::Status;
use tracing_subscriber::{EnvFilter, fmt};

use crate::scripted_launcher::ScriptedLauncher;

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// A controller wired to a [`ScriptedLauncher`].
pub struct Harness {
    pub registry: Arc<Registry>,
    pub launcher: Arc<ScriptedLauncher>,
    pub tracker: Arc<TrackedProcesses>,
    pub controller: ExecutionController,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(ExitPolicy::default())
    }

    pub fn with_policy(policy: ExitPolicy) -> Self {
        init_tracing();
        let registry = Arc::new(Registry::new());
        let launcher = ScriptedLauncher::new();
        let tracker = Arc::new(TrackedProcesses::new());
        let controller = ExecutionController::new(
            Arc::clone(&registry),
            launcher.clone(),
            tracker.clone(),
            policy,
        );
        Self {
            registry,
            launcher,
            tracker,
            controller,
        }
    }

    /// Log texts of a record, in order.
    pub fn log_texts(&self, key: &plugforge::types::RecordKey) -> Vec<String> {
        self.registry
            .get(key)
            .map(|r| r.logs.iter().map(|e| e.text.clone()).collect())
            .unwrap_or_default()
    }

    /// Poll until `text` shows up in the record's log.
    pub async fn wait_for_log(&self, key: &plugforge::types::RecordKey, text: &str) {
        with_timeout(async {
            while !self.log_texts(key).iter().any(|t| t == text) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
    }

    /// Poll until the record reaches `status`.
    pub async fn wait_for_status(&self, key: &plugforge::types::RecordKey, status: Status) {
        with_timeout(async {
            while self.registry.get(key).map(|r| r.status) != Some(status) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
