use flexi_logger::{DeferredNow, FlexiLoggerError, Logger, LoggerHandle};
use log::Record;
use std::io::Write;
use std::thread;

/// Initializes stderr logging with custom formatting. `RUST_LOG` overrides
/// the default level.
pub fn init_logger() -> Result<LoggerHandle, FlexiLoggerError> {
    Logger::try_with_env_or_str("info")?
        .log_to_stderr()
        .format(log_format)
        .start()
}

/// Custom log line format: timestamp, level, thread name, and message.
fn log_format(w: &mut dyn Write, now: &mut DeferredNow, record: &Record) -> std::io::Result<()> {
    write!(
        w,
        "{} [{:<5}] [{}] {}",
        now.format("%H:%M:%S%.3f"),
        record.level(),
        thread::current().name().unwrap_or("<unnamed>"),
        &record.args()
    )
}
