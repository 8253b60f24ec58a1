//! Script execution protocol for the injex control plane.
//!
//! Provides:
//! - Source wrapping (log capture + terminal receipt)
//! - `ScriptExecutor` - inject, handshake under a deadline, classify the
//!   outcome, keep scripts resident, optionally resume the target

pub mod protocol;
pub mod wrapper;

pub use protocol::{
    ExecuteOptions, ExecutionOutcome, ExecutionStatus, SCRIPT_TIMEOUT, ScriptExecutor,
};
pub use wrapper::wrap_source;
