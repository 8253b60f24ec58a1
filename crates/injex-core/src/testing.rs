//! Scriptable mock target runtime for tests.
//!
//! `MockRuntime` ships one default device whose sessions hand out scripts
//! driven by a configurable [`ScriptResponse`]: on load a script emits its
//! configured receipt (or fault, or nothing), then any configured follow-up
//! messages. Tests can also push events by hand via [`MockScript::emit`] and
//! kill the target with [`MockSession::trigger_detach`].

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use async_trait::async_trait;
use serde_json::json;

use crate::{
    event::{EngineMessage, KIND_ERROR, RECEIPT_TYPE},
    traits::{
        ApplicationInfo, DetachHandler, Device, DeviceInfo, EngineError, MessageHandler,
        ProcessInfo, ScriptHandle, ScriptSession, TargetRuntime,
    },
};

/// What a mock script does when loaded.
#[derive(Debug, Clone)]
pub enum ScriptResponse {
    /// Emit a success receipt with the given stringified result and captured logs.
    Success { result: String, logs: Vec<String> },
    /// Emit a receipt describing a thrown evaluation error.
    Thrown { message: String, stack: String },
    /// Emit an engine-level fault instead of a receipt.
    Fatal { description: String },
    /// Emit nothing; the handshake times out.
    Silent,
}

#[derive(Default)]
struct DeviceLedger {
    spawned: Vec<(String, Vec<String>)>,
    resumed: Vec<u32>,
    killed: Vec<u32>,
}

/// Mock device: records spawn/resume/kill calls, hands out mock sessions.
pub struct MockDevice {
    info: DeviceInfo,
    processes: Mutex<Vec<ProcessInfo>>,
    applications: Mutex<Vec<ApplicationInfo>>,
    next_pid: AtomicU32,
    ledger: Mutex<DeviceLedger>,
    fail_resume: AtomicBool,
    fail_unload: Arc<AtomicBool>,
    response: Arc<Mutex<ScriptResponse>>,
    followups: Arc<Mutex<Vec<EngineMessage>>>,
    sessions: Mutex<Vec<Arc<MockSession>>>,
}

impl MockDevice {
    #[must_use]
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            info: DeviceInfo {
                id: id.to_owned(),
                name: format!("Mock {id}"),
                device_type: "usb".to_owned(),
            },
            processes: Mutex::new(Vec::new()),
            applications: Mutex::new(Vec::new()),
            next_pid: AtomicU32::new(5000),
            ledger: Mutex::new(DeviceLedger::default()),
            fail_resume: AtomicBool::new(false),
            fail_unload: Arc::new(AtomicBool::new(false)),
            response: Arc::new(Mutex::new(ScriptResponse::Success {
                result: "undefined".to_owned(),
                logs: Vec::new(),
            })),
            followups: Arc::new(Mutex::new(Vec::new())),
            sessions: Mutex::new(Vec::new()),
        })
    }

    /// Configure what the next loaded scripts emit.
    pub fn set_script_response(&self, response: ScriptResponse) {
        *self.response.lock().unwrap() = response;
    }

    /// Messages emitted right after the receipt on every load.
    pub fn set_followups(&self, msgs: Vec<EngineMessage>) {
        *self.followups.lock().unwrap() = msgs;
    }

    pub fn set_processes(&self, processes: Vec<ProcessInfo>) {
        *self.processes.lock().unwrap() = processes;
    }

    pub fn set_applications(&self, applications: Vec<ApplicationInfo>) {
        *self.applications.lock().unwrap() = applications;
    }

    pub fn fail_resume(&self, fail: bool) {
        self.fail_resume.store(fail, Ordering::SeqCst);
    }

    pub fn fail_unload(&self, fail: bool) {
        self.fail_unload.store(fail, Ordering::SeqCst);
    }

    #[must_use]
    pub fn resumed_pids(&self) -> Vec<u32> {
        self.ledger.lock().unwrap().resumed.clone()
    }

    #[must_use]
    pub fn killed_pids(&self) -> Vec<u32> {
        self.ledger.lock().unwrap().killed.clone()
    }

    #[must_use]
    pub fn spawned(&self) -> Vec<(String, Vec<String>)> {
        self.ledger.lock().unwrap().spawned.clone()
    }

    /// The most recently attached session.
    #[must_use]
    pub fn last_session(&self) -> Option<Arc<MockSession>> {
        self.sessions.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Device for MockDevice {
    fn info(&self) -> DeviceInfo {
        self.info.clone()
    }

    async fn attach(&self, pid: u32) -> Result<Arc<dyn ScriptSession>, EngineError> {
        let session = Arc::new(MockSession {
            pid,
            detached: AtomicBool::new(false),
            detach_handlers: Mutex::new(Vec::new()),
            scripts: Mutex::new(Vec::new()),
            response: Arc::clone(&self.response),
            followups: Arc::clone(&self.followups),
            fail_unload: Arc::clone(&self.fail_unload),
        });
        self.sessions.lock().unwrap().push(Arc::clone(&session));
        Ok(session)
    }

    async fn spawn(&self, program: &str, args: Option<&[String]>) -> Result<u32, EngineError> {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.ledger
            .lock()
            .unwrap()
            .spawned
            .push((program.to_owned(), args.unwrap_or_default().to_vec()));
        Ok(pid)
    }

    async fn resume(&self, pid: u32) -> Result<(), EngineError> {
        if self.fail_resume.load(Ordering::SeqCst) {
            return Err(EngineError::Failed(format!("unable to resume pid {pid}")));
        }
        self.ledger.lock().unwrap().resumed.push(pid);
        Ok(())
    }

    async fn kill(&self, pid: u32) -> Result<(), EngineError> {
        self.ledger.lock().unwrap().killed.push(pid);
        Ok(())
    }

    async fn enumerate_processes(&self) -> Result<Vec<ProcessInfo>, EngineError> {
        Ok(self.processes.lock().unwrap().clone())
    }

    async fn enumerate_applications(&self) -> Result<Vec<ApplicationInfo>, EngineError> {
        Ok(self.applications.lock().unwrap().clone())
    }
}

/// Mock attachment to one (pretend) process.
pub struct MockSession {
    pid: u32,
    detached: AtomicBool,
    detach_handlers: Mutex<Vec<DetachHandler>>,
    scripts: Mutex<Vec<Arc<MockScript>>>,
    response: Arc<Mutex<ScriptResponse>>,
    followups: Arc<Mutex<Vec<EngineMessage>>>,
    fail_unload: Arc<AtomicBool>,
}

impl MockSession {
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Simulate the target process dying: every registered detach handler
    /// fires with `reason`, and further script operations are rejected.
    pub fn trigger_detach(&self, reason: &str) {
        self.detached.store(true, Ordering::SeqCst);
        for handler in self.detach_handlers.lock().unwrap().iter() {
            handler(reason);
        }
    }

    /// Scripts created on this session, in creation order.
    #[must_use]
    pub fn scripts(&self) -> Vec<Arc<MockScript>> {
        self.scripts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScriptSession for MockSession {
    async fn create_script(&self, source: &str) -> Result<Arc<dyn ScriptHandle>, EngineError> {
        if self.detached.load(Ordering::SeqCst) {
            return Err(EngineError::InvalidOperation("session is detached".to_owned()));
        }
        let script = Arc::new(MockScript {
            source: source.to_owned(),
            handler: Mutex::new(None),
            loaded: AtomicBool::new(false),
            unloaded: AtomicBool::new(false),
            response: self.response.lock().unwrap().clone(),
            followups: self.followups.lock().unwrap().clone(),
            fail_unload: Arc::clone(&self.fail_unload),
        });
        self.scripts.lock().unwrap().push(Arc::clone(&script));
        Ok(script)
    }

    fn on_detached(&self, handler: DetachHandler) {
        self.detach_handlers.lock().unwrap().push(handler);
    }

    async fn detach(&self) -> Result<(), EngineError> {
        self.detached.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Mock script: emits its configured response synchronously on load.
pub struct MockScript {
    source: String,
    handler: Mutex<Option<MessageHandler>>,
    loaded: AtomicBool,
    unloaded: AtomicBool,
    response: ScriptResponse,
    followups: Vec<EngineMessage>,
    fail_unload: Arc<AtomicBool>,
}

impl MockScript {
    /// The (wrapped) source this script was created with.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_unloaded(&self) -> bool {
        self.unloaded.load(Ordering::SeqCst)
    }

    /// Deliver an event to the registered handler, as the engine's delivery
    /// thread would.
    pub fn emit(&self, msg: EngineMessage) {
        if let Some(handler) = self.handler.lock().unwrap().clone() {
            handler(msg);
        }
    }

    fn receipt(&self) -> Option<EngineMessage> {
        match &self.response {
            ScriptResponse::Success { result, logs } => Some(EngineMessage::send(json!({
                "type": RECEIPT_TYPE,
                "result": result,
                "initial_logs": logs,
            }))),
            ScriptResponse::Thrown { message, stack } => Some(EngineMessage::send(json!({
                "type": RECEIPT_TYPE,
                "error": { "message": message, "stack": stack },
                "initial_logs": [],
            }))),
            ScriptResponse::Fatal { description } => Some(EngineMessage {
                kind: KIND_ERROR.to_owned(),
                payload: json!({ "description": description }),
                data: None,
            }),
            ScriptResponse::Silent => None,
        }
    }
}

#[async_trait]
impl ScriptHandle for MockScript {
    fn on_message(&self, handler: MessageHandler) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    async fn load(&self) -> Result<(), EngineError> {
        self.loaded.store(true, Ordering::SeqCst);
        if let Some(receipt) = self.receipt() {
            self.emit(receipt);
            for msg in self.followups.clone() {
                self.emit(msg);
            }
        }
        Ok(())
    }

    async fn unload(&self) -> Result<(), EngineError> {
        if self.fail_unload.load(Ordering::SeqCst) {
            return Err(EngineError::Failed("unload refused".to_owned()));
        }
        self.unloaded.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Mock target runtime holding one or more mock devices; the first is the
/// default returned for `resolve_device(None)`.
pub struct MockRuntime {
    devices: Vec<Arc<MockDevice>>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self {
            devices: vec![MockDevice::new("mock-usb")],
        }
    }

    #[must_use]
    pub fn with_devices(devices: Vec<Arc<MockDevice>>) -> Self {
        Self { devices }
    }

    /// The default device, for test configuration.
    #[must_use]
    pub fn device(&self) -> &Arc<MockDevice> {
        &self.devices[0]
    }
}

#[async_trait]
impl TargetRuntime for MockRuntime {
    async fn resolve_device(
        &self,
        device_id: Option<&str>,
    ) -> Result<Arc<dyn Device>, EngineError> {
        match device_id {
            None => Ok(Arc::clone(&self.devices[0]) as Arc<dyn Device>),
            Some(id) => self
                .devices
                .iter()
                .find(|d| d.info.id == id)
                .map(|d| Arc::clone(d) as Arc<dyn Device>)
                .ok_or_else(|| EngineError::DeviceNotFound(id.to_owned())),
        }
    }

    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, EngineError> {
        Ok(self.devices.iter().map(|d| d.info.clone()).collect())
    }
}
