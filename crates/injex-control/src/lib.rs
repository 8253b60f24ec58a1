//! Lifecycle controller and boundary operations for the injex control plane.
//!
//! `SessionController` is the surface an RPC front end wires its verbs to:
//! attach/resume/kill, execute, get_messages, detach, and the device/process
//! enumeration operations. Every response is a typed serde-serializable
//! struct; caller-input errors (unknown or detached session ids) surface as
//! `ControlError`, everything else folds into structured results.

pub mod controller;
pub mod enumerate;
pub mod responses;

pub use controller::{AttachRequest, ControlError, SessionController};
pub use responses::{
    AttachResponse, ControlAck, DetachResponse, MessagesResponse, ProcessList,
};
