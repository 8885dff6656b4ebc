use std::path::PathBuf;
use std::time::Duration;

/// Application-level constants
pub const APP_NAME: &str = "Dosekeeper";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A dose may be postponed at most this many times.
pub const POSTPONE_LIMIT: u32 = 2;

/// Each postpone pushes the dose by this many minutes.
pub const POSTPONE_MINUTES: i64 = 15;

/// Cadence of the missed-dose sweep.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Cadence of the outbox drain worker.
pub const OUTBOX_INTERVAL: Duration = Duration::from_secs(30);

/// An outbox entry is dropped after this many failed delivery attempts.
pub const OUTBOX_MAX_ATTEMPTS: u32 = 8;

pub fn default_log_filter() -> &'static str {
    "dosekeeper=info"
}

/// Get the application data directory
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join("Dosekeeper")
}

/// Path of the local treatment database
pub fn db_path() -> PathBuf {
    app_data_dir().join("dosekeeper.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_path_under_app_data() {
        let path = db_path();
        assert!(path.starts_with(app_data_dir()));
        assert!(path.ends_with("dosekeeper.db"));
    }

    #[test]
    fn app_data_dir_under_home() {
        let dir = app_data_dir();
        let home = dirs::home_dir().unwrap();
        assert!(dir.starts_with(home));
        assert!(dir.ends_with("Dosekeeper"));
    }

    #[test]
    fn postpone_policy_constants() {
        assert_eq!(POSTPONE_LIMIT, 2);
        assert_eq!(POSTPONE_MINUTES, 15);
    }
}
