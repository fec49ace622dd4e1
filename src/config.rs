use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "Adhera";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the application data directory
/// ~/Adhera/ on all platforms (user-visible, owners can back it up)
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join("Adhera")
}

/// Path of the SQLite database holding medications, reminder slots and
/// the delivery log.
pub fn db_path() -> PathBuf {
    app_data_dir().join("adhera.db")
}

/// Fallback tracing filter when RUST_LOG is unset.
pub fn default_log_filter() -> &'static str {
    "info"
}
