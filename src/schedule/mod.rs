//! Reminder scheduling: frequency translation, dispatch, poll loop.

pub mod dispatch;
pub mod scheduler;
pub mod translate;

pub use dispatch::{dispatch, reminder_message};
pub use scheduler::{start_scheduler, tick, SchedulerHandle, TickSummary};
pub use translate::translate;
