//! Session lifecycle: attach/spawn, execute, message retrieval, detach.

use std::{sync::Arc, time::Duration};

use injex_core::traits::{EngineError, ScriptSession, TargetRuntime};
use injex_executor::{ExecuteOptions, ExecutionOutcome, ExecutionStatus, ScriptExecutor};
use injex_session::{RegistryError, SessionRegistry, SessionSummary, generate_session_id};

use crate::responses::{AttachResponse, ControlAck, DetachResponse, MessagesResponse};

/// Controller error: the raised channel for caller-input failures.
///
/// Everything else — engine faults mid-protocol, script errors, timeouts —
/// is folded into structured results instead.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error(transparent)]
    Session(#[from] RegistryError),
    #[error("failed to resume process {pid}: {source}")]
    Resume {
        pid: u32,
        #[source]
        source: EngineError,
    },
    #[error("failed to kill process {pid}: {source}")]
    Kill {
        pid: u32,
        #[source]
        source: EngineError,
    },
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// An attach request.
///
/// `target` is either a pid rendered as a string (attach to a running
/// process) or a program/bundle identifier (spawn suspended, with optional
/// `args`).
#[derive(Debug, Clone, Default)]
pub struct AttachRequest {
    pub target: String,
    pub script: Option<String>,
    pub args: Option<Vec<String>>,
    pub device_id: Option<String>,
}

impl AttachRequest {
    #[must_use]
    pub fn target(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }
}

/// The controller an RPC front end drives.
pub struct SessionController {
    pub(crate) runtime: Arc<dyn TargetRuntime>,
    pub(crate) registry: Arc<SessionRegistry>,
    executor: ScriptExecutor,
}

impl SessionController {
    #[must_use]
    pub fn new(runtime: Arc<dyn TargetRuntime>) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let executor = ScriptExecutor::new(Arc::clone(&runtime), Arc::clone(&registry));
        Self {
            runtime,
            registry,
            executor,
        }
    }

    /// The session registry, for diagnostics and tests.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Attach to a running pid or spawn a target suspended, register a fresh
    /// session, and optionally inject an initial keep-alive script (with
    /// auto-resume iff the target was spawned).
    ///
    /// Never fails: every error in the path is surfaced as a structured
    /// error response.
    pub async fn attach(&self, req: AttachRequest) -> AttachResponse {
        match self.try_attach(req).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!("Attach failed: {e}");
                AttachResponse::failed(e.to_string())
            }
        }
    }

    async fn try_attach(&self, req: AttachRequest) -> Result<AttachResponse, ControlError> {
        let device = self.runtime.resolve_device(req.device_id.as_deref()).await?;

        let (pid, spawned) = match req.target.parse::<u32>() {
            Ok(pid) => (pid, false),
            Err(_) => {
                let pid = device.spawn(&req.target, req.args.as_deref()).await?;
                (pid, true)
            }
        };

        let handle = device.attach(pid).await?;
        let session_id = generate_session_id(pid);
        self.registry
            .create(&session_id, Arc::clone(&handle), pid, req.device_id.clone())?;
        self.install_detach_hook(&session_id, &handle);

        if let Some(source) = req.script {
            let script_result = self
                .executor
                .execute(
                    &session_id,
                    &source,
                    ExecuteOptions {
                        keep_alive: true,
                        resume_after: spawned,
                    },
                )
                .await?;
            // A spawned target whose injection did not succeed stays
            // suspended for the caller to inspect, retry, resume, or kill.
            let suspended = spawned && script_result.status != ExecutionStatus::Success;
            return Ok(AttachResponse {
                status: script_result.status,
                pid: Some(pid),
                session_id: Some(session_id),
                suspended: Some(suspended),
                message: None,
                script_result: Some(script_result),
                error: None,
            });
        }

        let message = if spawned {
            format!(
                "Spawned {} (PID {pid}) in suspended state. \
                 Inject hooks with execute, then call resume.",
                req.target
            )
        } else {
            format!("Attached to PID {pid}. Session ready for execute.")
        };
        Ok(AttachResponse {
            status: ExecutionStatus::Success,
            pid: Some(pid),
            session_id: Some(session_id),
            suspended: Some(spawned),
            message: Some(message),
            script_result: None,
            error: None,
        })
    }

    /// Detach notifications arrive on the engine's callback thread; the hook
    /// only flips the liveness flag.
    fn install_detach_hook(&self, session_id: &str, handle: &Arc<dyn ScriptSession>) {
        let registry = Arc::clone(&self.registry);
        let session_id = session_id.to_owned();
        handle.on_detached(Box::new(move |reason| {
            registry.mark_detached(&session_id, Some(reason.to_owned()));
        }));
    }

    /// Execute source against a session.
    ///
    /// # Errors
    /// Unknown or detached session ids are raised; every other failure mode
    /// is a structured outcome.
    pub async fn execute(
        &self,
        session_id: &str,
        source: &str,
        keep_alive: bool,
        resume_after: bool,
    ) -> Result<ExecutionOutcome, ControlError> {
        Ok(self
            .executor
            .execute(
                session_id,
                source,
                ExecuteOptions {
                    keep_alive,
                    resume_after,
                },
            )
            .await?)
    }

    /// Drain a session's pending messages, optionally sleeping `wait` first
    /// to trade latency for batch size.
    ///
    /// # Errors
    /// Unknown or detached session ids are raised.
    pub async fn get_messages(
        &self,
        session_id: &str,
        wait: Option<Duration>,
    ) -> Result<MessagesResponse, ControlError> {
        drop(self.registry.get(session_id)?);

        if let Some(wait) = wait.filter(|w| !w.is_zero()) {
            tokio::time::sleep(wait).await;
        }

        let messages = self.registry.drain_messages(session_id);
        Ok(MessagesResponse {
            status: ExecutionStatus::Success,
            session_id: session_id.to_owned(),
            messages_retrieved: messages.len(),
            messages,
        })
    }

    /// Detach from a session: with `unload_only`, resident scripts are
    /// unloaded and the session stays usable; otherwise the session is fully
    /// torn down (best-effort unload + detach, then purge). The target
    /// process keeps running either way.
    ///
    /// # Errors
    /// Unknown session ids are raised.
    pub async fn detach(
        &self,
        session_id: &str,
        unload_only: bool,
    ) -> Result<DetachResponse, ControlError> {
        if !self.registry.contains(session_id) {
            return Err(RegistryError::NotFound(session_id.to_owned()).into());
        }

        if unload_only {
            let count = self.registry.unload_resident(session_id).await;
            return Ok(DetachResponse {
                status: ExecutionStatus::Success,
                session_id: session_id.to_owned(),
                scripts_unloaded: Some(count),
                pid: None,
                message: "Scripts unloaded. Session still open.".to_owned(),
            });
        }

        let meta = self.registry.meta(session_id)?;
        self.registry.remove(session_id).await;
        Ok(DetachResponse {
            status: ExecutionStatus::Success,
            session_id: session_id.to_owned(),
            scripts_unloaded: None,
            pid: Some(meta.pid),
            message: "Session closed. Process is still running.".to_owned(),
        })
    }

    /// Resume a suspended process.
    ///
    /// # Errors
    /// Runtime failures are reported, not retried.
    pub async fn resume(
        &self,
        pid: u32,
        device_id: Option<&str>,
    ) -> Result<ControlAck, ControlError> {
        let device = self
            .runtime
            .resolve_device(device_id)
            .await
            .map_err(|source| ControlError::Resume { pid, source })?;
        device
            .resume(pid)
            .await
            .map_err(|source| ControlError::Resume { pid, source })?;
        Ok(ControlAck { success: true, pid })
    }

    /// Kill a process by pid.
    ///
    /// # Errors
    /// Runtime failures are reported, not retried.
    pub async fn kill(&self, pid: u32, device_id: Option<&str>) -> Result<ControlAck, ControlError> {
        let device = self
            .runtime
            .resolve_device(device_id)
            .await
            .map_err(|source| ControlError::Kill { pid, source })?;
        device
            .kill(pid)
            .await
            .map_err(|source| ControlError::Kill { pid, source })?;
        Ok(ControlAck { success: true, pid })
    }

    /// Diagnostic snapshot of every session.
    #[must_use]
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        self.registry.list()
    }
}
