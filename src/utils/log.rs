//! Minimal leveled logging.
//!
//! The VM core never logs (execution must stay deterministic and silent);
//! the emulator and the pruner report progress through [`Logger`] handles
//! carrying a component id. Messages are stamped with time since process
//! start, which keeps the output readable without pulling in calendar math.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// Verbosity levels, most severe first.
///
/// A message is emitted when its level is at or below the configured
/// verbosity: `Error` always prints, `Info` only at full verbosity.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Error = 0,
    Warn = 1,
    Info = 2,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
        })
    }
}

static VERBOSITY: AtomicU8 = AtomicU8::new(Level::Info as u8);

/// Sets the maximum level that still prints.
pub fn set_verbosity(level: Level) {
    VERBOSITY.store(level as u8, Ordering::Relaxed);
}

fn emits(level: Level) -> bool {
    level as u8 <= VERBOSITY.load(Ordering::Relaxed)
}

/// Milliseconds since the first log call of this process.
fn uptime_ms() -> u128 {
    static STARTED: OnceLock<Instant> = OnceLock::new();
    STARTED.get_or_init(Instant::now).elapsed().as_millis()
}

/// A named logging handle.
///
/// Cloning is cheap; every component keeps its own handle and the id shows
/// up in front of each message.
#[derive(Clone)]
pub struct Logger {
    id: Arc<str>,
}

impl Logger {
    /// A handle stamping messages with `id`.
    pub fn new(id: impl Into<Arc<str>>) -> Logger {
        Logger { id: id.into() }
    }

    fn emit(&self, level: Level, message: &str) {
        if !emits(level) {
            return;
        }
        let elapsed = uptime_ms();
        eprintln!(
            "+{}.{:03}s [{:5}] [{}] {}",
            elapsed / 1000,
            elapsed % 1000,
            level,
            self.id,
            message
        );
    }

    /// Reports normal progress.
    pub fn info(&self, message: &str) {
        self.emit(Level::Info, message);
    }

    /// Reports something suspicious but survivable.
    pub fn warn(&self, message: &str) {
        self.emit(Level::Warn, message);
    }

    /// Reports a failure.
    pub fn error(&self, message: &str) {
        self.emit(Level::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_error_first() {
        assert!(Level::Error < Level::Warn);
        assert!(Level::Warn < Level::Info);
    }

    #[test]
    fn verbosity_gates_lower_severities() {
        set_verbosity(Level::Warn);
        assert!(emits(Level::Error));
        assert!(emits(Level::Warn));
        assert!(!emits(Level::Info));

        set_verbosity(Level::Info);
        assert!(emits(Level::Info));
    }

    #[test]
    fn handles_clone_and_share_their_id() {
        let a = Logger::new("pruner");
        let b = a.clone();
        a.info("from a");
        b.warn("from b");
    }

    #[test]
    fn uptime_is_monotonic() {
        let first = uptime_ms();
        let second = uptime_ms();
        assert!(second >= first);
    }
}
