//! Leveled logging for `gdbridge`.
//!
//! Records are filtered by a global atomic level and, by default, printed to
//! stdout with the calling module path and an ANSI color per level. An
//! extension running inside the engine can install a [`Sink`] so that records
//! land in the engine's own console instead.
//!
//! # Example
//!
//! ```
//! use gdbridge_log::{debug, info, warn, Level};
//!
//! gdbridge_log::set_level(Level::Debug);
//!
//! let class = "Node";
//! info!("registered {}", class);
//! debug!("cache size {}", 3);
//! warn!("engine is older than expected");
//! ```

use std::fmt::Arguments;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{OnceLock, RwLock};

/// Severity of a log record, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Failures the caller cannot recover from.
    Error = 0,
    /// Suspicious but survivable situations.
    Warn = 1,
    /// Lifecycle milestones.
    Info = 2,
    /// Resolution and registration detail.
    Debug = 3,
    /// Per-call detail.
    Trace = 4,
}

impl Level {
    const fn color_code(self) -> &'static str {
        match self {
            Level::Error => "\x1b[31m",
            Level::Warn => "\x1b[33m",
            Level::Info => "\x1b[32m",
            Level::Debug => "\x1b[36m",
            Level::Trace => "\x1b[35m",
        }
    }

    /// Upper-case name of the level.
    pub const fn as_str(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    const fn from_u8(raw: u8) -> Level {
        match raw {
            0 => Level::Error,
            1 => Level::Warn,
            2 => Level::Info,
            3 => Level::Debug,
            _ => Level::Trace,
        }
    }
}

impl FromStr for Level {
    type Err = String;

    /// Parses a level name, ignoring case.
    ///
    /// ```
    /// use gdbridge_log::Level;
    ///
    /// assert_eq!("warn".parse::<Level>(), Ok(Level::Warn));
    /// assert!("loud".parse::<Level>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ERROR" => Ok(Level::Error),
            "WARN" | "WARNING" => Ok(Level::Warn),
            "INFO" => Ok(Level::Info),
            "DEBUG" => Ok(Level::Debug),
            "TRACE" => Ok(Level::Trace),
            _ => Err(format!("Invalid log level: {s}")),
        }
    }
}

/// Destination for records that pass the level filter.
///
/// Receives the level, the module path of the call site and the formatted
/// arguments.
pub type Sink = fn(Level, &str, &Arguments<'_>);

/// Global filter state.
pub struct Logger {
    level: AtomicU8,
    emitted: AtomicUsize,
    sink: RwLock<Option<Sink>>,
}

impl Logger {
    const fn new(level: Level) -> Self {
        Logger {
            level: AtomicU8::new(level as u8),
            emitted: AtomicUsize::new(0),
            sink: RwLock::new(None),
        }
    }

    /// Sets the least severe level that is still logged.
    pub fn set_level(&self, level: Level) {
        self.level.store(level as u8, Ordering::SeqCst);
    }

    /// Returns the current level.
    pub fn level(&self) -> Level {
        Level::from_u8(self.level.load(Ordering::Relaxed))
    }

    /// Returns true if a record at `level` would be emitted.
    pub fn enabled(&self, level: Level) -> bool {
        level as u8 <= self.level.load(Ordering::Relaxed)
    }

    /// Number of records emitted since process start.
    pub fn emitted(&self) -> usize {
        self.emitted.load(Ordering::Relaxed)
    }

    fn sink(&self) -> Option<Sink> {
        // A poisoned lock only means a sink panicked mid-write; the stored
        // fn pointer is still intact.
        match self.sink.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

static LOGGER: OnceLock<Logger> = OnceLock::new();

/// Returns the global logger, creating it at `Level::Info` on first use.
pub fn get_logger() -> &'static Logger {
    LOGGER.get_or_init(|| Logger::new(Level::Info))
}

/// Sets the global level.
pub fn set_level(level: Level) {
    get_logger().set_level(level);
}

/// Sets the global level from a name such as `"debug"`.
pub fn set_level_from_str(s: &str) -> Result<(), String> {
    set_level(s.parse()?);
    Ok(())
}

/// Reads the level from environment variable `var`.
///
/// Returns the level that was applied, or `None` if the variable is unset.
/// An unparsable value is reported as an error and leaves the level alone.
pub fn init_from_env(var: &str) -> Result<Option<Level>, String> {
    match std::env::var(var) {
        Ok(value) => {
            let level: Level = value.parse()?;
            set_level(level);
            Ok(Some(level))
        }
        Err(_) => Ok(None),
    }
}

/// Installs or removes the record sink.
///
/// With no sink installed, records go to stdout.
pub fn set_sink(sink: Option<Sink>) {
    let logger = get_logger();
    let mut slot = match logger.sink.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    *slot = sink;
}

#[doc(hidden)]
pub fn __log_with_target(level: Level, target: &str, args: Arguments<'_>) {
    static RESET: &str = "\x1b[0m";

    let logger = get_logger();
    if !logger.enabled(level) {
        return;
    }
    logger.emitted.fetch_add(1, Ordering::Relaxed);

    if let Some(sink) = logger.sink() {
        sink(level, target, &args);
        return;
    }

    let color = level.color_code();
    let level_str = level.as_str();
    println!("{color}[{level_str}]{RESET} {target}: {args}");
}

/// Logs at an explicit level.
///
/// ```
/// use gdbridge_log::{log, Level};
///
/// log!(level: Level::Info, "frame {} done", 7);
/// ```
#[macro_export]
macro_rules! log {
    (level: $level:expr, $($arg:tt)*) => {
        {
            if $crate::get_logger().enabled($level) {
                $crate::__log_with_target(
                    $level,
                    module_path!(),
                    format_args!($($arg)*)
                );
            }
        }
    };
}

/// Logs at [`Level::Error`].
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Error, $($arg)*)
    };
}

/// Logs at [`Level::Warn`].
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Warn, $($arg)*)
    };
}

/// Logs at [`Level::Info`].
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Info, $($arg)*)
    };
}

/// Logs at [`Level::Debug`].
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Debug, $($arg)*)
    };
}

/// Logs at [`Level::Trace`].
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Trace, $($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests in this module share the global logger.
    static SERIAL: Mutex<()> = Mutex::new(());

    #[test]
    fn test_level_ordering() {
        assert!(Level::Error < Level::Warn);
        assert!(Level::Warn < Level::Info);
        assert!(Level::Info < Level::Debug);
        assert!(Level::Debug < Level::Trace);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!("error".parse::<Level>(), Ok(Level::Error));
        assert_eq!("Warning".parse::<Level>(), Ok(Level::Warn));
        assert_eq!(" info ".parse::<Level>(), Ok(Level::Info));
        assert_eq!("DEBUG".parse::<Level>(), Ok(Level::Debug));
        assert_eq!("trace".parse::<Level>(), Ok(Level::Trace));
        assert!("verbose".parse::<Level>().is_err());
    }

    #[test]
    fn test_logger_level_filtering() {
        let logger = Logger::new(Level::Info);

        assert!(logger.enabled(Level::Error));
        assert!(logger.enabled(Level::Info));
        assert!(!logger.enabled(Level::Debug));

        logger.set_level(Level::Trace);
        assert!(logger.enabled(Level::Trace));
        assert_eq!(logger.level(), Level::Trace);
    }

    #[test]
    fn test_set_level_from_str() {
        let _guard = SERIAL.lock().unwrap();

        set_level_from_str("debug").unwrap();
        assert_eq!(get_logger().level(), Level::Debug);
        assert!(set_level_from_str("nope").is_err());
        assert_eq!(get_logger().level(), Level::Debug);

        set_level(Level::Info);
    }

    static CAPTURED: Mutex<Vec<String>> = Mutex::new(Vec::new());

    fn capture(level: Level, target: &str, args: &Arguments<'_>) {
        CAPTURED
            .lock()
            .unwrap()
            .push(format!("{}|{}|{}", level.as_str(), target, args));
    }

    #[test]
    fn test_sink_receives_filtered_records() {
        let _guard = SERIAL.lock().unwrap();
        CAPTURED.lock().unwrap().clear();

        set_level(Level::Warn);
        set_sink(Some(capture));
        warn!("refcount {}", 0);
        info!("dropped by filter");
        set_sink(None);
        set_level(Level::Info);

        let captured = CAPTURED.lock().unwrap();
        assert_eq!(captured.len(), 1);
        assert!(captured[0].starts_with("WARN|gdbridge_log::tests|"));
        assert!(captured[0].ends_with("refcount 0"));
    }

    #[test]
    fn test_emitted_counter_advances() {
        let _guard = SERIAL.lock().unwrap();
        set_level(Level::Info);

        let before = get_logger().emitted();
        info!("counted");
        trace!("not counted");
        assert_eq!(get_logger().emitted(), before + 1);
    }

    #[test]
    fn test_thread_safety() {
        let handles: Vec<_> = (0..8)
            .map(|i| std::thread::spawn(move || debug!("thread {}", i)))
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
