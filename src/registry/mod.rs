// src/registry/mod.rs

//! In-memory store of task and command records.
//!
//! The registry is the single owner of [`ExecRecord`]s. It is constructed
//! explicitly and shared as `Arc<Registry>`; there is no global instance.
//!
//! Records are stored as `Arc<ExecRecord>`. Mutations go through
//! `Arc::make_mut` under the write lock, which copies a record whenever a
//! snapshot of it is still held elsewhere. A snapshot returned by
//! [`Registry::get`] is therefore never observed half-updated.

pub mod record;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::errors::{PlugforgeError, Result};
use crate::project::manifest::CommandDefinition;
use crate::types::{LogEntry, RecordKey, Scope, Status, TaskType};

pub use record::{ExecRecord, RegistryEvent, TaskDefinition};

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug)]
pub struct Registry {
    records: RwLock<BTreeMap<RecordKey, Arc<ExecRecord>>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            records: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    pub fn get(&self, key: &RecordKey) -> Option<Arc<ExecRecord>> {
        self.records.read().get(key).cloned()
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.records.read().contains_key(key)
    }

    /// Snapshot of all records of one project and scope, ordered by
    /// identifier.
    pub fn records_for(&self, project_id: &str, scope: Scope) -> Vec<Arc<ExecRecord>> {
        self.records
            .read()
            .iter()
            .filter(|(k, _)| k.project_id == project_id && k.scope == scope)
            .map(|(_, r)| Arc::clone(r))
            .collect()
    }

    /// Reconcile command records of `project_id` with the manifest.
    ///
    /// - new identifiers are inserted as `Idle`;
    /// - identifiers no longer declared are removed, logs included;
    /// - common identifiers keep their runtime state and only take over the
    ///   declarative fields (`name`, `shortcut`, `script`).
    pub fn upsert_from_manifest(&self, project_id: &str, definitions: &[CommandDefinition]) {
        let declared: Vec<ExecRecord> = definitions
            .iter()
            .map(|def| {
                ExecRecord::new(
                    RecordKey::command(project_id, &def.identifier),
                    &def.name,
                    TaskType::ShortTerm,
                    &def.script,
                )
                .with_shortcut(def.shortcut.clone())
            })
            .collect();

        self.reconcile(project_id, Scope::Command, declared, |existing, declared| {
            existing.name = declared.name;
            existing.shortcut = declared.shortcut;
            existing.script = declared.script;
        });
    }

    /// Reconcile task records of `project_id` with the package.json scripts.
    pub fn upsert_tasks(&self, project_id: &str, definitions: &[TaskDefinition]) {
        let declared: Vec<ExecRecord> = definitions
            .iter()
            .map(|def| {
                ExecRecord::new(
                    RecordKey::task(project_id, &def.name),
                    &def.name,
                    def.task_type,
                    &def.script,
                )
            })
            .collect();

        self.reconcile(project_id, Scope::Task, declared, |existing, declared| {
            existing.script = declared.script;
        });
    }

    fn reconcile<F>(&self, project_id: &str, scope: Scope, declared: Vec<ExecRecord>, merge: F)
    where
        F: Fn(&mut ExecRecord, ExecRecord),
    {
        let mut notifications = Vec::new();
        {
            let mut records = self.records.write();

            let wanted: BTreeSet<&str> = declared.iter().map(|r| r.key.identifier.as_str()).collect();
            let stale: Vec<RecordKey> = records
                .keys()
                .filter(|k| {
                    k.project_id == project_id
                        && k.scope == scope
                        && !wanted.contains(k.identifier.as_str())
                })
                .cloned()
                .collect();

            for key in stale {
                records.remove(&key);
                notifications.push(RegistryEvent::Removed(key));
            }

            for record in declared {
                let key = record.key.clone();
                match records.get_mut(&key) {
                    Some(slot) => {
                        let mut merged = ExecRecord::clone(slot);
                        merge(&mut merged, record);
                        if merged != **slot {
                            *slot = Arc::new(merged);
                            notifications.push(RegistryEvent::Upserted(key));
                        }
                    }
                    None => {
                        records.insert(key.clone(), Arc::new(record));
                        notifications.push(RegistryEvent::Upserted(key));
                    }
                }
            }
        }

        debug!(project = %project_id, ?scope, changes = notifications.len(), "reconciled records");
        self.publish_all(notifications);
    }

    /// Insert or replace a whole record.
    pub fn insert(&self, record: ExecRecord) {
        let key = record.key.clone();
        self.records.write().insert(key.clone(), Arc::new(record));
        self.publish(RegistryEvent::Upserted(key));
    }

    /// Remove one record. Returns whether it existed.
    pub fn remove(&self, key: &RecordKey) -> bool {
        let removed = self.records.write().remove(key).is_some();
        if removed {
            self.publish(RegistryEvent::Removed(key.clone()));
        }
        removed
    }

    /// Remove every record of a project.
    pub fn remove_project(&self, project_id: &str) {
        let removed: Vec<RecordKey> = {
            let mut records = self.records.write();
            let keys: Vec<RecordKey> = records
                .keys()
                .filter(|k| k.project_id == project_id)
                .cloned()
                .collect();
            for key in &keys {
                records.remove(key);
            }
            keys
        };
        self.publish_all(removed.into_iter().map(RegistryEvent::Removed).collect());
    }

    /// Move every record of `old` to `new`, keeping runtime state.
    pub fn rename_project(&self, old: &str, new: &str) {
        let mut notifications = Vec::new();
        {
            let mut records = self.records.write();
            let keys: Vec<RecordKey> = records.keys().filter(|k| k.project_id == old).cloned().collect();
            for key in keys {
                if let Some(record) = records.remove(&key) {
                    let mut moved = ExecRecord::clone(&record);
                    moved.key.project_id = new.to_string();
                    notifications.push(RegistryEvent::Removed(key));
                    notifications.push(RegistryEvent::Upserted(moved.key.clone()));
                    records.insert(moved.key.clone(), Arc::new(moved));
                }
            }
        }
        self.publish_all(notifications);
    }

    pub fn set_status(&self, key: &RecordKey, status: Status, timestamp: Option<DateTime<Utc>>) -> Result<()> {
        self.update(key, |record| {
            record.status = status;
            if timestamp.is_some() {
                record.time_since_status_change = timestamp;
            }
        })?;
        self.publish(RegistryEvent::StatusChanged {
            key: key.clone(),
            status,
        });
        Ok(())
    }

    /// Move a record into a command-definition state such as `Updating`.
    ///
    /// The check and the write happen under one lock: a record with an
    /// attached process, or one that is already being changed, is refused.
    pub fn claim(&self, key: &RecordKey, status: Status) -> Result<()> {
        self.update(key, |record| {
            if record.is_running() {
                return Err(format!("'{}' is running; abort it first", key.identifier));
            }
            if record.status.is_transient() {
                return Err(format!("'{}' is already {}", key.identifier, record.status));
            }
            record.status = status;
            Ok(())
        })?
        .map_err(PlugforgeError::ProjectError)?;
        self.publish(RegistryEvent::StatusChanged {
            key: key.clone(),
            status,
        });
        Ok(())
    }

    pub fn attach_process_id(&self, key: &RecordKey, pid: u32) -> Result<()> {
        self.update(key, |record| record.process_id = Some(pid))?;
        self.publish(RegistryEvent::Upserted(key.clone()));
        Ok(())
    }

    /// Clear the process id; returns the one that was attached.
    pub fn detach_process_id(&self, key: &RecordKey) -> Result<Option<u32>> {
        let previous = self.update(key, |record| record.process_id.take())?;
        if previous.is_some() {
            self.publish(RegistryEvent::Upserted(key.clone()));
        }
        Ok(previous)
    }

    pub fn set_port(&self, key: &RecordKey, port: u16) -> Result<()> {
        self.update(key, |record| record.port = Some(port))?;
        self.publish(RegistryEvent::PortAttached {
            key: key.clone(),
            port,
        });
        Ok(())
    }

    pub fn append_log(&self, key: &RecordKey, text: impl Into<String>) -> Result<LogEntry> {
        let text = text.into();
        let entry = self.update(key, |record| record.push_log(text))?;
        trace!(key = %key, id = entry.id, "log appended");
        self.publish(RegistryEvent::LogAppended {
            key: key.clone(),
            entry: entry.clone(),
        });
        Ok(entry)
    }

    pub fn clear_logs(&self, key: &RecordKey) -> Result<()> {
        self.update(key, ExecRecord::clear_logs)?;
        self.publish(RegistryEvent::LogsCleared(key.clone()));
        Ok(())
    }

    /// Apply `f` to one record under the write lock.
    fn update<T>(&self, key: &RecordKey, f: impl FnOnce(&mut ExecRecord) -> T) -> Result<T> {
        let mut records = self.records.write();
        let slot = records
            .get_mut(key)
            .ok_or_else(|| PlugforgeError::RecordNotFound(key.to_string()))?;
        Ok(f(Arc::make_mut(slot)))
    }

    fn publish(&self, event: RegistryEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn publish_all(&self, events: Vec<RegistryEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(identifier: &str, name: &str) -> CommandDefinition {
        CommandDefinition::new(identifier, name, format!("./{identifier}.js"))
    }

    #[test]
    fn upsert_inserts_idle_records() {
        let registry = Registry::new();
        registry.upsert_from_manifest("p", &[def("hello", "Hello"), def("bye", "Bye")]);

        let records = registry.records_for("p", Scope::Command);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.status == Status::Idle));
        assert!(records.iter().all(|r| r.time_since_status_change.is_none()));
    }

    #[test]
    fn upsert_keeps_runtime_state_and_updates_declarative_fields() {
        let registry = Registry::new();
        let key = RecordKey::command("p", "hello");
        registry.upsert_from_manifest("p", &[def("hello", "Hello")]);

        let now = Utc::now();
        registry.set_status(&key, Status::Failed, Some(now)).unwrap();
        registry.append_log(&key, "boom").unwrap();

        let mut renamed = def("hello", "Hello again");
        renamed.shortcut = Some("cmd shift h".to_string());
        registry.upsert_from_manifest("p", &[renamed]);

        let record = registry.get(&key).unwrap();
        assert_eq!(record.name, "Hello again");
        assert_eq!(record.shortcut.as_deref(), Some("cmd shift h"));
        assert_eq!(record.status, Status::Failed);
        assert_eq!(record.time_since_status_change, Some(now));
        assert_eq!(record.logs.len(), 1);
    }

    #[test]
    fn upsert_removes_undeclared_identifiers_only_in_that_project() {
        let registry = Registry::new();
        registry.upsert_from_manifest("p", &[def("a", "A"), def("b", "B")]);
        registry.upsert_from_manifest("q", &[def("a", "A")]);
        registry.append_log(&RecordKey::command("p", "b"), "old output").unwrap();

        registry.upsert_from_manifest("p", &[def("a", "A")]);

        assert!(registry.get(&RecordKey::command("p", "b")).is_none());
        assert!(registry.get(&RecordKey::command("p", "a")).is_some());
        assert!(registry.get(&RecordKey::command("q", "a")).is_some());
    }

    #[test]
    fn tasks_and_commands_do_not_collide() {
        let registry = Registry::new();
        registry.upsert_from_manifest("p", &[def("build", "Build")]);
        registry.upsert_tasks(
            "p",
            &[TaskDefinition {
                name: "build".into(),
                script: "skpm-build".into(),
                task_type: TaskType::ShortTerm,
            }],
        );

        assert_eq!(registry.records_for("p", Scope::Command).len(), 1);
        assert_eq!(registry.records_for("p", Scope::Task).len(), 1);
    }

    #[test]
    fn snapshot_is_not_affected_by_later_mutation() {
        let registry = Registry::new();
        let key = RecordKey::command("p", "hello");
        registry.upsert_from_manifest("p", &[def("hello", "Hello")]);

        let before = registry.get(&key).unwrap();
        registry.append_log(&key, "one").unwrap();

        assert!(before.logs.is_empty());
        assert_eq!(registry.get(&key).unwrap().logs.len(), 1);
    }

    #[test]
    fn unknown_key_is_an_error() {
        let registry = Registry::new();
        let key = RecordKey::task("p", "missing");
        match registry.append_log(&key, "x") {
            Err(PlugforgeError::RecordNotFound(k)) => assert!(k.contains("missing")),
            other => panic!("expected RecordNotFound, got {:?}", other),
        }
    }

    #[test]
    fn rename_project_moves_records() {
        let registry = Registry::new();
        registry.upsert_from_manifest("old", &[def("a", "A")]);
        registry.append_log(&RecordKey::command("old", "a"), "kept").unwrap();

        registry.rename_project("old", "new");

        assert!(registry.records_for("old", Scope::Command).is_empty());
        let moved = registry.get(&RecordKey::command("new", "a")).unwrap();
        assert_eq!(moved.logs[0].text, "kept");
    }

    #[test]
    fn claim_refuses_running_and_busy_records() {
        let registry = Registry::new();
        let key = RecordKey::command("p", "a");
        registry.upsert_from_manifest("p", &[def("a", "A")]);

        registry.claim(&key, Status::Updating).unwrap();
        assert!(matches!(
            registry.claim(&key, Status::Deleting),
            Err(PlugforgeError::ProjectError(_))
        ));
        assert_eq!(registry.get(&key).unwrap().status, Status::Updating);

        registry.set_status(&key, Status::Idle, None).unwrap();
        registry.attach_process_id(&key, 7).unwrap();
        assert!(registry.claim(&key, Status::Deleting).is_err());
        assert_eq!(registry.get(&key).unwrap().status, Status::Idle);
    }

    #[test]
    fn remove_project_leaves_other_projects() {
        let registry = Registry::new();
        registry.upsert_from_manifest("p", &[def("a", "A")]);
        registry.upsert_from_manifest("q", &[def("a", "A")]);

        registry.remove_project("p");

        assert!(registry.records_for("p", Scope::Command).is_empty());
        assert!(registry.contains(&RecordKey::command("q", "a")));
    }

    #[tokio::test]
    async fn mutations_are_published() {
        let registry = Registry::new();
        let mut rx = registry.subscribe();
        let key = RecordKey::command("p", "a");
        registry.upsert_from_manifest("p", &[def("a", "A")]);
        registry.append_log(&key, "hi").unwrap();

        assert_eq!(rx.recv().await.unwrap(), RegistryEvent::Upserted(key.clone()));
        match rx.recv().await.unwrap() {
            RegistryEvent::LogAppended { entry, .. } => assert_eq!(entry.text, "hi"),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
