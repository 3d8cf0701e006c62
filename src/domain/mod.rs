//! Usage: Session use-cases exposed to UI callers.

pub mod session;
