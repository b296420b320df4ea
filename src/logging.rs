use anyhow::Result;
use regex::Regex;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize console logging plus a JSON log file in `log_dir`
///
/// `RUST_LOG` takes precedence over `log_level`. The returned guard flushes the
/// file writer and must be kept alive for the duration of the program.
pub fn init_logging(log_dir: PathBuf, log_level: &str) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix("stratus")
        .filename_suffix("log")
        .max_log_files(5)
        .build(log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let level = parse_level(log_level);
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    // JSON for the file, plain text for the terminal
    let file_layer = fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()?;

    tracing::debug!("Logging initialized at level: {}", level);

    Ok(guard)
}

/// Console-only logging, used when the log directory is unusable
pub fn init_console_logging(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(parse_level(log_level).as_str()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn parse_level(log_level: &str) -> Level {
    match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

struct Redactions {
    envelope: Regex,
    key: Regex,
    url_password: Regex,
    fields: Vec<(Regex, &'static str)>,
}

fn redactions() -> &'static Redactions {
    static REDACTIONS: OnceLock<Redactions> = OnceLock::new();
    REDACTIONS.get_or_init(|| Redactions {
        envelope: Regex::new(r"enc-v1:[0-9A-Fa-f]+").unwrap(),
        key: Regex::new(r"([A-Za-z0-9+/]{32,}={0,2})").unwrap(),
        url_password: Regex::new(r"://([^:/@\s]+):([^@\s]+)@").unwrap(),
        fields: vec![
            (Regex::new(r"(auth-password|aws-secret-access-key|passphrase)=[^&\s]+").unwrap(), "$1=[REDACTED]"),
            (Regex::new(r#""(password|token)"\s*:\s*"[^"]*""#).unwrap(), r#""$1": "[REDACTED]""#),
            (Regex::new(r"Authorization:\s*(Basic|AWS4-HMAC-SHA256)\s+.+").unwrap(), "Authorization: $1 [REDACTED]"),
        ],
    })
}

/// Mask secrets in a string before it is logged
///
/// Covers settings envelopes, long key-like strings, URL userinfo passwords,
/// secret query options, password/token fields and Authorization headers.
pub fn sanitize_for_logging(input: &str) -> String {
    let r = redactions();

    let mut sanitized = r.envelope.replace_all(input, "enc-v1:[REDACTED]").to_string();
    sanitized = r.key.replace_all(&sanitized, "[REDACTED_KEY]").to_string();
    sanitized = r.url_password.replace_all(&sanitized, "://$1:[REDACTED]@").to_string();

    for (pattern, replacement) in &r.fields {
        sanitized = pattern.replace_all(&sanitized, *replacement).to_string();
    }

    sanitized
}

/// Log with automatic sanitization
///
/// Usage: `secure_info!("Target: {}", target_url);`
#[macro_export]
macro_rules! secure_info {
    ($($arg:tt)*) => {
        tracing::info!("{}", $crate::logging::sanitize_for_logging(&format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! secure_warn {
    ($($arg:tt)*) => {
        tracing::warn!("{}", $crate::logging::sanitize_for_logging(&format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! secure_error {
    ($($arg:tt)*) => {
        tracing::error!("{}", $crate::logging::sanitize_for_logging(&format!($($arg)*)))
    };
}
