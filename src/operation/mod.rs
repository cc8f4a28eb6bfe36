// operation/mod.rs
//! Pending socket operations: the pooled token that describes one, the
//! bridge that awaits it, and the progress/result types it produces.

pub mod bridge;
pub mod token;
pub mod transmission;

pub use bridge::{Completed, Completion, start};
pub use token::{OperationKind, OperationToken, Signals};
pub use transmission::{Progress, TransmissionResult, TransmissionState};
