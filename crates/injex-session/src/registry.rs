//! Session registry: handles, metadata, queues, resident scripts.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::Serialize;
use uuid::Uuid;

use injex_core::{
    event::EngineMessage,
    msg_store::MessageStore,
    traits::{ScriptHandle, ScriptSession},
};

/// Session identifier, `session_{pid}_{8-hex}`.
pub type SessionId = String;

/// Generate a fresh, never-reused session id for a pid.
#[must_use]
pub fn generate_session_id(pid: u32) -> SessionId {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("session_{pid}_{}", &suffix[..8])
}

/// Registry error.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("session {0} not found")]
    NotFound(String),
    #[error(
        "session {id} is detached (reason: {}); close it with detach and create a new one",
        .reason.as_deref().unwrap_or("unknown")
    )]
    Detached { id: String, reason: Option<String> },
    #[error("session {0} already registered")]
    DuplicateId(String),
}

/// Point-in-time metadata for one session.
#[derive(Debug, Clone)]
pub struct SessionMeta {
    pub pid: u32,
    pub device_id: Option<String>,
    pub created_at: i64,
    pub detached: bool,
    pub detach_reason: Option<String>,
}

/// Diagnostic summary of one session, for enumeration.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub pid: u32,
    pub device_id: Option<String>,
    pub created_at: i64,
    pub detached: bool,
    pub resident_scripts: usize,
    pub pending_messages: usize,
}

#[derive(Default)]
struct Liveness {
    detached: bool,
    reason: Option<String>,
}

struct SessionEntry {
    handle: Arc<dyn ScriptSession>,
    pid: u32,
    device_id: Option<String>,
    created_at: i64,
    liveness: Mutex<Liveness>,
    resident: Mutex<Vec<Arc<dyn ScriptHandle>>>,
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Registry of live sessions.
///
/// The outer map lock guards only lookups and insert/remove; liveness,
/// resident scripts, and the message queue each sit behind their own
/// per-session lock, so traffic on different sessions never contends.
/// `mark_detached` is called from the engine's callback thread and takes no
/// lock other than the map read lock and the session's liveness lock.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<SessionEntry>>>,
    store: MessageStore,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            store: MessageStore::new(),
        }
    }

    /// Register a new session with fresh metadata and an empty queue.
    ///
    /// # Errors
    /// Returns `DuplicateId` if the id is already registered; use
    /// [`generate_session_id`] for fresh ids.
    pub fn create(
        &self,
        session_id: &str,
        handle: Arc<dyn ScriptSession>,
        pid: u32,
        device_id: Option<String>,
    ) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.write().unwrap();
        if sessions.contains_key(session_id) {
            return Err(RegistryError::DuplicateId(session_id.to_owned()));
        }
        sessions.insert(
            session_id.to_owned(),
            Arc::new(SessionEntry {
                handle,
                pid,
                device_id,
                created_at: now(),
                liveness: Mutex::new(Liveness::default()),
                resident: Mutex::new(Vec::new()),
            }),
        );
        drop(sessions);
        self.store.provision(session_id);
        tracing::debug!("Registered session {session_id} (pid {pid})");
        Ok(())
    }

    fn entry(&self, session_id: &str) -> Result<Arc<SessionEntry>, RegistryError> {
        self.sessions
            .read()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(session_id.to_owned()))
    }

    /// Get the live engine handle for a session.
    ///
    /// # Errors
    /// `NotFound` for unknown ids; `Detached` (with the stored reason) once
    /// the session has been marked dead — callers must create a new session
    /// rather than retry the same id.
    pub fn get(&self, session_id: &str) -> Result<Arc<dyn ScriptSession>, RegistryError> {
        let entry = self.entry(session_id)?;
        let liveness = entry.liveness.lock().unwrap();
        if liveness.detached {
            return Err(RegistryError::Detached {
                id: session_id.to_owned(),
                reason: liveness.reason.clone(),
            });
        }
        drop(liveness);
        Ok(Arc::clone(&entry.handle))
    }

    /// Metadata snapshot; available for detached sessions too.
    ///
    /// # Errors
    /// `NotFound` for unknown ids.
    pub fn meta(&self, session_id: &str) -> Result<SessionMeta, RegistryError> {
        let entry = self.entry(session_id)?;
        let liveness = entry.liveness.lock().unwrap();
        Ok(SessionMeta {
            pid: entry.pid,
            device_id: entry.device_id.clone(),
            created_at: entry.created_at,
            detached: liveness.detached,
            detach_reason: liveness.reason.clone(),
        })
    }

    /// Whether a session id is registered (live or detached).
    #[must_use]
    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().unwrap().contains_key(session_id)
    }

    /// Mark a session detached. Idempotent; the first reason wins. Unknown
    /// ids are ignored (the notification may race with removal).
    pub fn mark_detached(&self, session_id: &str, reason: Option<String>) {
        let Ok(entry) = self.entry(session_id) else {
            return;
        };
        let mut liveness = entry.liveness.lock().unwrap();
        if !liveness.detached {
            tracing::debug!("Session {session_id} detached: {reason:?}");
            liveness.detached = true;
            liveness.reason = reason;
        }
    }

    /// Track a keep-alive script as resident on its session.
    ///
    /// # Errors
    /// `NotFound` for unknown ids.
    pub fn add_resident(
        &self,
        session_id: &str,
        script: Arc<dyn ScriptHandle>,
    ) -> Result<(), RegistryError> {
        let entry = self.entry(session_id)?;
        entry.resident.lock().unwrap().push(script);
        Ok(())
    }

    /// Number of resident scripts on a session (0 for unknown ids).
    #[must_use]
    pub fn resident_count(&self, session_id: &str) -> usize {
        self.entry(session_id)
            .map_or(0, |e| e.resident.lock().unwrap().len())
    }

    /// Unload every resident script of a session, best-effort. Individual
    /// unload failures are swallowed; returns how many unloaded cleanly.
    /// The session itself stays registered.
    pub async fn unload_resident(&self, session_id: &str) -> usize {
        let Ok(entry) = self.entry(session_id) else {
            return 0;
        };
        let scripts = std::mem::take(&mut *entry.resident.lock().unwrap());
        unload_all(session_id, scripts).await
    }

    /// Full teardown: unload residents (best-effort), detach the engine
    /// handle (best-effort), purge metadata and queue. The id becomes
    /// permanently unknown.
    pub async fn remove(&self, session_id: &str) {
        let entry = self.sessions.write().unwrap().remove(session_id);
        let Some(entry) = entry else { return };

        let scripts = std::mem::take(&mut *entry.resident.lock().unwrap());
        unload_all(session_id, scripts).await;

        if let Err(e) = entry.handle.detach().await {
            tracing::warn!("Detach failed for session {session_id}: {e}");
        }
        self.store.remove(session_id);
        tracing::debug!("Removed session {session_id}");
    }

    /// Read-only snapshot of every session's summary.
    #[must_use]
    pub fn list(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.read().unwrap();
        let mut result: Vec<SessionSummary> = sessions
            .iter()
            .map(|(id, entry)| {
                let liveness = entry.liveness.lock().unwrap();
                SessionSummary {
                    session_id: id.clone(),
                    pid: entry.pid,
                    device_id: entry.device_id.clone(),
                    created_at: entry.created_at,
                    detached: liveness.detached,
                    resident_scripts: entry.resident.lock().unwrap().len(),
                    pending_messages: self.store.pending(id),
                }
            })
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        result
    }

    /// Append a message to a session's queue. Never fails; messages for
    /// unknown sessions are dropped.
    pub fn append_message(&self, session_id: &str, msg: EngineMessage) {
        self.store.append(session_id, msg);
    }

    /// Atomically drain a session's queue in arrival order.
    #[must_use]
    pub fn drain_messages(&self, session_id: &str) -> Vec<EngineMessage> {
        self.store.drain(session_id)
    }

    /// Whether a queue was provisioned for this session.
    #[must_use]
    pub fn has_queue(&self, session_id: &str) -> bool {
        self.store.exists(session_id)
    }

    /// Messages currently pending for a session.
    #[must_use]
    pub fn pending_messages(&self, session_id: &str) -> usize {
        self.store.pending(session_id)
    }
}

async fn unload_all(session_id: &str, scripts: Vec<Arc<dyn ScriptHandle>>) -> usize {
    let mut count = 0;
    for script in scripts {
        match script.unload().await {
            Ok(()) => count += 1,
            Err(e) => tracing::warn!("Script unload failed for session {session_id}: {e}"),
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use injex_core::testing::{MockRuntime, ScriptResponse};
    use injex_core::traits::{Device, ScriptSession, TargetRuntime};
    use serde_json::json;

    async fn attach_one(runtime: &MockRuntime, registry: &SessionRegistry, pid: u32) -> SessionId {
        let device = runtime.resolve_device(None).await.unwrap();
        let handle = device.attach(pid).await.unwrap();
        let id = generate_session_id(pid);
        registry
            .create(&id, handle, pid, Some("mock-usb".to_owned()))
            .unwrap();
        id
    }

    #[test]
    fn test_session_id_format_and_uniqueness() {
        let a = generate_session_id(4321);
        let b = generate_session_id(4321);
        assert!(a.starts_with("session_4321_"));
        assert_eq!(a.len(), "session_4321_".len() + 8);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_create_get_and_duplicate() {
        let runtime = MockRuntime::new();
        let registry = SessionRegistry::new();
        let id = attach_one(&runtime, &registry, 42).await;

        assert!(registry.get(&id).is_ok());
        assert!(registry.has_queue(&id));
        assert_eq!(registry.meta(&id).unwrap().pid, 42);

        let device = runtime.resolve_device(None).await.unwrap();
        let handle = device.attach(42).await.unwrap();
        assert!(matches!(
            registry.create(&id, handle, 42, None),
            Err(RegistryError::DuplicateId(_))
        ));
    }

    #[tokio::test]
    async fn test_get_unknown_session() {
        let registry = SessionRegistry::new();
        assert!(matches!(
            registry.get("session_1_deadbeef"),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_detached_is_terminal_and_keeps_first_reason() {
        let runtime = MockRuntime::new();
        let registry = SessionRegistry::new();
        let id = attach_one(&runtime, &registry, 7).await;

        registry.mark_detached(&id, Some("process-terminated".to_owned()));
        registry.mark_detached(&id, Some("some-later-reason".to_owned()));

        for _ in 0..2 {
            match registry.get(&id).map(|_| ()) {
                Err(RegistryError::Detached { reason, .. }) => {
                    assert_eq!(reason.as_deref(), Some("process-terminated"));
                }
                other => panic!("expected Detached, got {other:?}"),
            }
        }
        assert!(registry.meta(&id).unwrap().detached);
    }

    #[tokio::test]
    async fn test_remove_unloads_residents_best_effort() {
        let runtime = MockRuntime::new();
        runtime.device().set_script_response(ScriptResponse::Silent);
        let registry = SessionRegistry::new();
        let id = attach_one(&runtime, &registry, 7).await;

        let session = runtime.device().last_session().unwrap();
        for _ in 0..3 {
            let script = session.create_script("hook()").await.unwrap();
            registry.add_resident(&id, script).unwrap();
        }
        assert_eq!(registry.resident_count(&id), 3);

        // One stubborn script must not abort the teardown.
        runtime.device().fail_unload(true);
        registry.remove(&id).await;

        assert!(!registry.contains(&id));
        assert!(!registry.has_queue(&id));
        assert!(matches!(registry.get(&id), Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unload_resident_keeps_session_open() {
        let runtime = MockRuntime::new();
        let registry = SessionRegistry::new();
        let id = attach_one(&runtime, &registry, 9).await;

        let session = runtime.device().last_session().unwrap();
        let script = session.create_script("hook()").await.unwrap();
        registry.add_resident(&id, script).unwrap();

        assert_eq!(registry.unload_resident(&id).await, 1);
        assert_eq!(registry.resident_count(&id), 0);
        assert!(registry.get(&id).is_ok());
    }

    #[tokio::test]
    async fn test_list_snapshots_sessions() {
        let runtime = MockRuntime::new();
        let registry = SessionRegistry::new();
        let a = attach_one(&runtime, &registry, 1).await;
        let b = attach_one(&runtime, &registry, 2).await;

        registry.append_message(&b, EngineMessage::send(json!({"n": 1})));
        registry.mark_detached(&a, None);

        let summaries = registry.list();
        assert_eq!(summaries.len(), 2);

        let sa = summaries.iter().find(|s| s.session_id == a).unwrap();
        let sb = summaries.iter().find(|s| s.session_id == b).unwrap();
        assert!(sa.detached);
        assert_eq!(sb.pending_messages, 1);
        assert_eq!(sb.device_id.as_deref(), Some("mock-usb"));
    }

    #[tokio::test]
    async fn test_messages_survive_detach_until_removal() {
        let runtime = MockRuntime::new();
        let registry = SessionRegistry::new();
        let id = attach_one(&runtime, &registry, 3).await;

        registry.append_message(&id, EngineMessage::send(json!({"n": 1})));
        registry.mark_detached(&id, Some("crashed".to_owned()));

        // The queue still exists (drained via explicit removal paths), but
        // `get` refuses the handle.
        assert!(registry.has_queue(&id));
        assert_eq!(registry.pending_messages(&id), 1);
        assert!(registry.get(&id).is_err());
    }
}
