pub mod config;
pub mod models;
pub mod db;
pub mod notify; // Notification sink boundary
pub mod pipeline; // OCR text -> medication records
pub mod schedule; // Slot translation + reminder loop
pub mod medications; // Intake and schedule management
pub mod compliance; // Acknowledgments + adherence reports

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::db::DatabaseError;
use crate::notify::Notifier;
use crate::schedule::SchedulerHandle;

/// Install the global tracing subscriber. Call once at startup.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();
}

/// Open the database at its default location and start the reminder
/// loop against it. The embedding application keeps the returned handle
/// alive for as long as reminders should fire; dropping it stops the
/// loop.
pub fn run(notifier: Arc<dyn Notifier>) -> Result<SchedulerHandle, DatabaseError> {
    tracing::info!("Adhera starting v{}", config::APP_VERSION);

    let path = config::db_path();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    // Open once up front so a broken database fails here instead of
    // silently inside the scheduler thread.
    db::open_database(&path)?;
    Ok(schedule::start_scheduler(path, notifier))
}
