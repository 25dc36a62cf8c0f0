//! Shared types between the coordinator and the operator console
//!
//! Operator actions coming in and status reports going out.

pub mod messages;
pub mod state;

pub use messages::{ConsoleCommand, OperatorAction};
pub use state::StatusReport;
