//! Boundary traits for the opaque target runtime and script engine.
//!
//! The control plane never touches process internals itself: device and
//! process operations go through [`TargetRuntime`] / [`Device`], and injected
//! code runs behind [`ScriptSession`] / [`ScriptHandle`]. Real backends wrap
//! an instrumentation toolkit; tests use the mock in [`crate::testing`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::EngineMessage;

/// Error surfaced by the target runtime or script engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine rejected an operation, typically because the session
    /// became invalid mid-call.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("process not found: {0}")]
    ProcessNotFound(String),
    #[error("runtime transport failure: {0}")]
    Transport(String),
    #[error("{0}")]
    Failed(String),
}

/// A device reachable through the target runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
}

/// A running process on a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
}

/// An installed application on a device.
///
/// `pid` is 0 when the application is not currently running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationInfo {
    pub identifier: String,
    pub name: String,
    pub pid: u32,
}

/// Callback invoked for every event a loaded script emits.
///
/// The engine calls this on its own delivery thread; implementations must
/// not block on slow consumers.
pub type MessageHandler = Arc<dyn Fn(EngineMessage) + Send + Sync>;

/// Callback invoked once when the underlying session detaches, with the
/// engine's detach reason.
pub type DetachHandler = Box<dyn Fn(&str) + Send + Sync>;

/// A script created inside a target process.
#[async_trait]
pub trait ScriptHandle: Send + Sync {
    /// Register the message callback. Must be registered before [`Self::load`]
    /// so no early event is lost.
    fn on_message(&self, handler: MessageHandler);

    /// Load the script into the target; engine-side execution starts here.
    async fn load(&self) -> Result<(), EngineError>;

    /// Unload the script from the target.
    async fn unload(&self) -> Result<(), EngineError>;
}

/// A live attachment to one target process.
#[async_trait]
pub trait ScriptSession: Send + Sync {
    /// Create (but do not load) a script from source text.
    async fn create_script(&self, source: &str) -> Result<Arc<dyn ScriptHandle>, EngineError>;

    /// Register a handler for the engine's asynchronous detach notification.
    fn on_detached(&self, handler: DetachHandler);

    /// Detach from the target process.
    async fn detach(&self) -> Result<(), EngineError>;
}

/// Process-level operations on one device.
#[async_trait]
pub trait Device: Send + Sync {
    fn info(&self) -> DeviceInfo;

    /// Attach to an already-running process.
    async fn attach(&self, pid: u32) -> Result<Arc<dyn ScriptSession>, EngineError>;

    /// Spawn a process suspended; returns the new pid.
    async fn spawn(&self, program: &str, args: Option<&[String]>) -> Result<u32, EngineError>;

    async fn resume(&self, pid: u32) -> Result<(), EngineError>;

    async fn kill(&self, pid: u32) -> Result<(), EngineError>;

    async fn enumerate_processes(&self) -> Result<Vec<ProcessInfo>, EngineError>;

    async fn enumerate_applications(&self) -> Result<Vec<ApplicationInfo>, EngineError>;
}

/// The opaque target runtime: device discovery and resolution.
#[async_trait]
pub trait TargetRuntime: Send + Sync {
    /// Resolve a device by id, or the default device when `None`.
    async fn resolve_device(&self, device_id: Option<&str>)
    -> Result<Arc<dyn Device>, EngineError>;

    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, EngineError>;
}
