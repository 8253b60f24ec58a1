//! Session registry for the injex control plane.
//!
//! Tracks every live attachment: the engine session handle, metadata
//! (pid, device, age, liveness), the per-session message queue, and the set
//! of resident scripts.

pub mod registry;

pub use registry::{
    RegistryError, SessionId, SessionMeta, SessionRegistry, SessionSummary, generate_session_id,
};
