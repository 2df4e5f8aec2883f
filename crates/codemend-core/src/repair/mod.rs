//! The self-repair loop and its session record.

pub mod engine;
pub mod session;

pub use engine::{RepairContext, RepairLoop, RepairPolicy, StagnationCheck};
pub use session::{FinalStatus, RepairSession, SessionEntry};
