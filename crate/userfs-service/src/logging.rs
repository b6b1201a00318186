//! Log setup for processes hosting a filesystem.

use env_logger::Builder;
use std::io::Write;

/// Log target of service events.
pub const SERVICE_TARGET: &str = "userfs::service";

/// Severity of a service event, as an event log classifies it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventSeverity {
    Error,
    Warning,
    Information,
}

impl EventSeverity {
    pub fn level(self) -> log::Level {
        match self {
            EventSeverity::Error => log::Level::Error,
            EventSeverity::Warning => log::Level::Warn,
            EventSeverity::Information => log::Level::Info,
        }
    }
}

/// Report a service event.
pub fn log_event(severity: EventSeverity, message: &str) {
    log::log!(target: SERVICE_TARGET, severity.level(), "{message}");
}

/// Initialize logging with process-wide defaults.
///
/// Level defaults to WARN, except for service events, which are shown
/// from INFO. RUST_LOG overrides this.
///
/// Set RUST_LOG_FORMAT to SYSTEMD for output that a syslog-like
/// facility can classify.
pub fn init() {
    init_with_info_modules(vec![])
}

/// Like [init], also showing the INFO logs of `info_modules`.
pub fn init_with_info_modules(info_modules: Vec<&str>) {
    let _ = builder(info_modules).try_init();
}

fn builder(info_modules: Vec<&str>) -> Builder {
    let mut builder = Builder::new();
    if let Ok(format) = std::env::var("RUST_LOG_FORMAT")
        && format == "SYSTEMD"
    {
        systemd_format(&mut builder);
    }

    builder.filter_level(log::LevelFilter::Warn);
    builder.filter_module(SERVICE_TARGET, log::LevelFilter::Info);
    for module in info_modules {
        builder.filter_module(module, log::LevelFilter::Info);
    }
    builder.parse_default_env();

    builder
}

/// Prefix lines with their syslog priority (RFC 5424). No timestamp,
/// the facility adds its own.
fn systemd_format(builder: &mut Builder) {
    builder.format(|fmt, record| {
        let priority = match record.level() {
            log::Level::Error => 3,
            log::Level::Warn => 4,
            log::Level::Info => 5,
            log::Level::Debug | log::Level::Trace => 7,
        };

        writeln!(fmt, "<{priority}>{}: {}", record.target(), record.args())
    });
}
