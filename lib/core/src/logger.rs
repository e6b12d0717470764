use anyhow::Result;
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

const LOG_FILE_NAME: &str = "checkout.log";

/// Targets from the HTTP stack that are only kept at warn and above
const QUIET_TARGETS: [&str; 4] = ["hyper", "reqwest", "rustls", "h2"];

/// File logger for the checkout flow, optionally forwarding to an app logger
pub struct CheckoutLogger {
    app_logger: Option<Box<dyn Log>>,
    log_file: Mutex<Option<File>>,
}

impl CheckoutLogger {
    /// Creates a new logger appending to `checkout.log` in `log_dir`
    pub fn new(log_dir: &str, app_logger: Option<Box<dyn Log>>) -> Result<Self> {
        let log_path = Path::new(log_dir);
        if !log_path.exists() {
            create_dir_all(log_path)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path.join(LOG_FILE_NAME))?;

        Ok(Self {
            app_logger,
            log_file: Mutex::new(Some(file)),
        })
    }

    /// Initializes the logger as the global logger
    pub fn init(log_dir: &str, app_logger: Option<Box<dyn Log>>) -> Result<()> {
        let logger = Self::new(log_dir, app_logger)?;
        log::set_boxed_logger(Box::new(logger))?;
        log::set_max_level(LevelFilter::Debug);
        Ok(())
    }

    fn format_record(record: &Record) -> String {
        format!(
            "{} [{}] {}: {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.target(),
            record.args()
        )
    }
}

impl Log for CheckoutLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        let quiet = QUIET_TARGETS
            .iter()
            .any(|target| metadata.target().starts_with(target));
        if quiet && metadata.level() > Level::Warn {
            return false;
        }
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let message = Self::format_record(record);
        if let Ok(mut file_guard) = self.log_file.lock() {
            if let Some(file) = file_guard.as_mut() {
                let _ = file.write_all(message.as_bytes());
                let _ = file.flush();
            }
        }

        if let Some(app_logger) = &self.app_logger {
            app_logger.log(record);
        }
    }

    fn flush(&self) {
        if let Ok(mut file_guard) = self.log_file.lock() {
            if let Some(file) = file_guard.as_mut() {
                let _ = file.flush();
            }
        }

        if let Some(app_logger) = &self.app_logger {
            app_logger.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_lines_are_appended_to_file() {
        let dir = std::env::temp_dir().join(format!("unihive-log-{}", uuid::Uuid::new_v4()));
        let logger = CheckoutLogger::new(&dir.to_string_lossy(), None).unwrap();
        log::set_max_level(LevelFilter::Debug);

        logger.log(
            &Record::builder()
                .args(format_args!("verify pending for ref_1"))
                .level(Level::Error)
                .target("unihive_checkout::reconciler")
                .build(),
        );
        logger.flush();

        logger.log(
            &Record::builder()
                .args(format_args!("connection pooled"))
                .level(Level::Debug)
                .target("hyper_util::client")
                .build(),
        );
        logger.flush();

        let contents = std::fs::read_to_string(dir.join(LOG_FILE_NAME)).unwrap();
        assert!(contents.contains("[ERROR] unihive_checkout::reconciler: verify pending for ref_1"));
        assert!(!contents.contains("connection pooled"));
        let _ = std::fs::remove_dir_all(dir);
    }
}
