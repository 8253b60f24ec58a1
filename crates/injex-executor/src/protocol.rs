//! The execution state machine: inject, await the receipt handshake under a
//! deadline, classify the outcome, manage residency and resume.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use injex_core::{
    event::{EngineMessage, EventClass, Receipt},
    traits::{EngineError, MessageHandler, ScriptSession, TargetRuntime},
};
use injex_session::{RegistryError, SessionMeta, SessionRegistry};

use crate::wrapper::wrap_source;

/// How long to wait for the first receipt after loading a script.
pub const SCRIPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Terminal status of one execution attempt.
///
/// `Timeout` is not an error: the script is still live, it just produced no
/// receipt in time; its messages keep accumulating in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Error,
    Timeout,
}

/// Execution options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    /// Leave the script loaded for later asynchronous delivery.
    pub keep_alive: bool,
    /// Resume the owning process after a successful injection.
    pub resume_after: bool,
}

/// Structured verdict of one execution attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub initial_logs: Vec<String>,
    pub script_unloaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resumed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_error: Option<String>,
}

impl ExecutionOutcome {
    fn base(status: ExecutionStatus) -> Self {
        Self {
            status,
            result: None,
            error: None,
            stack: None,
            details: None,
            message: None,
            initial_logs: Vec::new(),
            script_unloaded: false,
            resumed: None,
            resume_error: None,
        }
    }

    fn from_receipt(receipt: Receipt) -> Self {
        match receipt.error {
            Some(err) => Self {
                error: Some(err.message),
                stack: err.stack,
                initial_logs: receipt.initial_logs,
                ..Self::base(ExecutionStatus::Error)
            },
            None => Self {
                result: receipt.result,
                initial_logs: receipt.initial_logs,
                ..Self::base(ExecutionStatus::Success)
            },
        }
    }

    fn engine_fault(description: String) -> Self {
        Self {
            error: Some("Script execution error".to_owned()),
            details: Some(description),
            ..Self::base(ExecutionStatus::Error)
        }
    }

    fn timed_out() -> Self {
        Self {
            message: Some(format!(
                "Script sent no execution receipt within {}s.",
                SCRIPT_TIMEOUT.as_secs()
            )),
            ..Self::base(ExecutionStatus::Timeout)
        }
    }

    fn from_engine_error(e: &EngineError) -> Self {
        let error = match e {
            EngineError::InvalidOperation(_) => {
                format!("Engine operation error: {e} (session may be detached)")
            }
            _ => e.to_string(),
        };
        Self {
            error: Some(error),
            ..Self::base(ExecutionStatus::Error)
        }
    }
}

/// The handshake payload: first receipt, or a fatal fault seen before one.
enum Handshake {
    Receipt(Receipt),
    Fatal { description: String },
}

/// Runs scripts against registered sessions.
pub struct ScriptExecutor {
    runtime: Arc<dyn TargetRuntime>,
    registry: Arc<SessionRegistry>,
}

impl ScriptExecutor {
    #[must_use]
    pub fn new(runtime: Arc<dyn TargetRuntime>, registry: Arc<SessionRegistry>) -> Self {
        Self { runtime, registry }
    }

    /// Execute source against a session.
    ///
    /// Engine-level failures anywhere in the protocol are folded into an
    /// error outcome, never raised.
    ///
    /// # Errors
    /// Only session-resolution failures (`NotFound` / `Detached`) propagate;
    /// callers must create a new session rather than retry.
    pub async fn execute(
        &self,
        session_id: &str,
        source: &str,
        opts: ExecuteOptions,
    ) -> Result<ExecutionOutcome, RegistryError> {
        let session = self.registry.get(session_id)?;
        let meta = self.registry.meta(session_id)?;

        match self.run(session_id, &session, &meta, source, opts).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::error!("Execution failed for session {session_id}: {e}");
                Ok(ExecutionOutcome::from_engine_error(&e))
            }
        }
    }

    async fn run(
        &self,
        session_id: &str,
        session: &Arc<dyn ScriptSession>,
        meta: &SessionMeta,
        source: &str,
        opts: ExecuteOptions,
    ) -> Result<ExecutionOutcome, EngineError> {
        let wrapped = wrap_source(source);
        let script = session.create_script(&wrapped).await?;

        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Mutex::new(Some(tx)));

        // Registered before load so an early receipt cannot race past us.
        script.on_message(self.make_handler(session_id, opts.keep_alive, &slot));

        if opts.keep_alive {
            // Resident before load: a crash during load still leaves the
            // script discoverable for cleanup.
            if let Err(e) = self.registry.add_resident(session_id, Arc::clone(&script)) {
                tracing::warn!("Could not register resident script: {e}");
            }
        }

        script.load().await?;

        let mut outcome = match tokio::time::timeout(SCRIPT_TIMEOUT, rx).await {
            Ok(Ok(Handshake::Receipt(receipt))) => ExecutionOutcome::from_receipt(receipt),
            Ok(Ok(Handshake::Fatal { description })) => ExecutionOutcome::engine_fault(description),
            Ok(Err(_)) => ExecutionOutcome::engine_fault("receipt channel closed".to_owned()),
            Err(_) => ExecutionOutcome::timed_out(),
        };

        if opts.keep_alive {
            outcome.script_unloaded = false;
        } else {
            script.unload().await?;
            outcome.script_unloaded = true;
        }

        if opts.resume_after && outcome.status == ExecutionStatus::Success {
            match self.resume_target(meta).await {
                Ok(()) => outcome.resumed = Some(true),
                Err(e) => {
                    outcome.resumed = Some(false);
                    outcome.resume_error = Some(e.to_string());
                }
            }
        }

        Ok(outcome)
    }

    /// Build the event callback: first receipt (or first fault) wins the
    /// handshake; everything else is queued when the script is resident,
    /// dropped otherwise.
    fn make_handler(
        &self,
        session_id: &str,
        keep_alive: bool,
        slot: &Arc<Mutex<Option<oneshot::Sender<Handshake>>>>,
    ) -> MessageHandler {
        let slot = Arc::clone(slot);
        let registry = Arc::clone(&self.registry);
        let session_id = session_id.to_owned();

        Arc::new(move |msg: EngineMessage| {
            let handshake = match EventClass::classify(&msg) {
                EventClass::Receipt(receipt) => Some(Handshake::Receipt(receipt)),
                EventClass::FatalError { description } => Some(Handshake::Fatal { description }),
                EventClass::Other => None,
            };

            match handshake {
                Some(payload) => {
                    if let Some(tx) = slot.lock().unwrap().take() {
                        let _ = tx.send(payload);
                    } else if keep_alive {
                        // Late receipts and faults are ordinary traffic for
                        // a resident script.
                        registry.append_message(&session_id, msg);
                    }
                }
                None if keep_alive => registry.append_message(&session_id, msg),
                None => {}
            }
        })
    }

    async fn resume_target(&self, meta: &SessionMeta) -> Result<(), EngineError> {
        let device = self
            .runtime
            .resolve_device(meta.device_id.as_deref())
            .await?;
        device.resume(meta.pid).await
    }
}
