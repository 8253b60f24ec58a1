//! Core abstractions for the injex script-injection control plane.
//!
//! This crate provides the fundamental building blocks:
//! - `EngineMessage` / `EventClass` - Typed engine event model
//! - `MessageStore` - Per-session bounded message queues
//! - `TargetRuntime` / `Device` / `ScriptSession` / `ScriptHandle` traits -
//!   the boundary to the opaque target runtime and script engine

pub mod event;
pub mod msg_store;
pub mod traits;

#[cfg(feature = "testing")]
pub mod testing;

pub use event::{EngineMessage, EventClass, Receipt, ScriptError};
pub use msg_store::{MAX_MESSAGES, MessageStore};
pub use traits::{
    ApplicationInfo, Device, DeviceInfo, EngineError, ProcessInfo, ScriptHandle, ScriptSession,
    TargetRuntime,
};
