//! The bounded ReAct iteration driver.

pub mod driver;
pub mod situation;

pub use driver::{AgentDriver, DriverStatus, RunOutcome};
