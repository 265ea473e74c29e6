//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Start (pipeline):
//!     Build engines → spawn_supervised(each loop) → state INITIALIZING
//!
//! Panic in a loop (supervisor.rs):
//!     catch → state ERROR → sleep restart delay → rebuild loop
//!
//! Stop (shutdown.rs + supervisor.rs):
//!     trigger flag → join with grace deadline → abort stragglers
//! ```
//!
//! # Design Decisions
//! - One owner for every spawned loop; no orphaned tasks survive stop
//! - Shutdown is level-triggered so late subscribers still exit
//! - Stop has a deadline: forced abort after the grace period

pub mod shutdown;
pub mod supervisor;

pub use shutdown::{Shutdown, ShutdownSignal};
pub use supervisor::{ShutdownReport, TaskSupervisor};
