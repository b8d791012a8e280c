//! Trigger persistence and scheduling: durable trigger records, RRULE
//! recurrence evaluation, and the poll loop that wakes execution agents.

pub mod error;
pub mod rrule;
pub mod scheduler;
pub mod store;
pub mod types;

pub use error::{Result, TriggerError};
pub use rrule::RecurrenceRule;
pub use scheduler::{AgentRunner, TriggerScheduler};
pub use store::{NewTrigger, TriggerStore, TriggerUpdate};
pub use types::{TriggerRecord, TriggerStatus};
