//! Long-running parts of the service and the runtime that drives them.

pub mod comms;
pub mod runtime;
