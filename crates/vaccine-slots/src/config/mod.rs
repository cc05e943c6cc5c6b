use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

pub const DEFAULT_BASE_URL: &str = "https://cdn-api.co-vin.in/api/v2";
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/90.0.4430.93 Safari/537.36";

/// Allowed cache lifetime, in seconds (10 to 30 minutes).
pub const CACHE_TTL_RANGE_SECS: std::ops::RangeInclusive<u64> = 600..=1800;

/// Upstream calendars only publish a few weeks ahead.
pub const MAX_LOOKAHEAD_DAYS: u32 = 30;

pub const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
pub const DEFAULT_SMTP_PORT: u16 = 465;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub upstream: UpstreamConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub scan: ScanConfig,
    pub notification: Option<NotificationConfig>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let upstream = UpstreamConfig {
            base_url: env::var("COWIN_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            user_agent: env::var("COWIN_USER_AGENT")
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
            timeout_secs: positive_var("COWIN_TIMEOUT_SECS", 10)?,
        };

        let ttl_secs = number_var("CACHE_TTL_SECS", 600)?;
        if !CACHE_TTL_RANGE_SECS.contains(&ttl_secs) {
            return Err(ConfigError::CacheTtlOutOfRange(ttl_secs));
        }
        let cache = CacheConfig {
            ttl_secs,
            capacity: positive_var("CACHE_CAPACITY", 256)? as usize,
        };

        let retry = RetryConfig {
            max_attempts: positive_var("RETRY_MAX_ATTEMPTS", 5)? as u32,
            delay_secs: number_var("RETRY_DELAY_SECS", 2)?,
        };

        let scan = ScanConfig {
            districts_csv: PathBuf::from(
                env::var("DISTRICTS_CSV").unwrap_or_else(|_| "districts.csv".to_string()),
            ),
            postal_codes: non_empty_var("POSTAL_CODES_PATH").map(PathBuf::from),
            lookahead_days: lookahead_var()?,
        };

        let notification = match (non_empty_var("SENDER_EMAIL"), non_empty_var("RECEIVER_EMAIL")) {
            (Some(sender), Some(recipient)) => Some(NotificationConfig {
                sender,
                recipient,
                notify_on_empty: bool_var("NOTIFY_ON_EMPTY", false)?,
                outbox_dir: PathBuf::from(
                    env::var("OUTBOX_DIR").unwrap_or_else(|_| "outbox".to_string()),
                ),
                smtp: smtp_config()?,
            }),
            _ => None,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            upstream,
            cache,
            retry,
            scan,
            notification,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Upstream calendar API access.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub capacity: usize,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub districts_csv: PathBuf,
    pub postal_codes: Option<PathBuf>,
    pub lookahead_days: u32,
}

/// Present only when both sender and recipient are configured.
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub sender: String,
    pub recipient: String,
    pub notify_on_empty: bool,
    pub outbox_dir: PathBuf,
    /// SMTP relay; messages go to the outbox when unset.
    pub smtp: Option<SmtpConfig>,
}

/// Implicit-TLS SMTP relay. The sender address doubles as the login.
#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn number_var(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match non_empty_var(name) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidNumber { name, value: raw }),
        None => Ok(default),
    }
}

fn positive_var(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let value = number_var(name, default)?;
    if value == 0 || value > u64::from(u32::MAX) {
        return Err(ConfigError::InvalidNumber {
            name,
            value: value.to_string(),
        });
    }
    Ok(value)
}

fn lookahead_var() -> Result<u32, ConfigError> {
    let days = positive_var("LOOKAHEAD_DAYS", 1)?;
    if days > u64::from(MAX_LOOKAHEAD_DAYS) {
        return Err(ConfigError::LookaheadOutOfRange(days));
    }
    Ok(days as u32)
}

fn smtp_config() -> Result<Option<SmtpConfig>, ConfigError> {
    let Some(password) = non_empty_var("SENDER_PASSWORD") else {
        return Ok(None);
    };

    let port = match non_empty_var("SMTP_PORT") {
        Some(raw) => raw
            .trim()
            .parse::<u16>()
            .ok()
            .filter(|port| *port > 0)
            .ok_or(ConfigError::InvalidNumber {
                name: "SMTP_PORT",
                value: raw,
            })?,
        None => DEFAULT_SMTP_PORT,
    };

    Ok(Some(SmtpConfig {
        host: non_empty_var("SMTP_HOST").unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
        port,
        password,
    }))
}

fn bool_var(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match non_empty_var(name) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidFlag { name, value: raw }),
        },
        None => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { name: &'static str, value: String },
    InvalidFlag { name: &'static str, value: String },
    CacheTtlOutOfRange(u64),
    LookaheadOutOfRange(u64),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { name, value } => {
                write!(f, "{name} must be a positive whole number, got '{value}'")
            }
            ConfigError::InvalidFlag { name, value } => {
                write!(f, "{name} must be true or false, got '{value}'")
            }
            ConfigError::CacheTtlOutOfRange(value) => write!(
                f,
                "CACHE_TTL_SECS must be between {} and {} seconds, got {value}",
                CACHE_TTL_RANGE_SECS.start(),
                CACHE_TTL_RANGE_SECS.end()
            ),
            ConfigError::LookaheadOutOfRange(value) => write!(
                f,
                "LOOKAHEAD_DAYS must be between 1 and {MAX_LOOKAHEAD_DAYS}, got {value}"
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::InvalidFlag { .. }
            | ConfigError::CacheTtlOutOfRange(_)
            | ConfigError::LookaheadOutOfRange(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for name in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "COWIN_BASE_URL",
            "COWIN_USER_AGENT",
            "COWIN_TIMEOUT_SECS",
            "CACHE_TTL_SECS",
            "CACHE_CAPACITY",
            "RETRY_MAX_ATTEMPTS",
            "RETRY_DELAY_SECS",
            "DISTRICTS_CSV",
            "POSTAL_CODES_PATH",
            "LOOKAHEAD_DAYS",
            "SENDER_EMAIL",
            "RECEIVER_EMAIL",
            "NOTIFY_ON_EMPTY",
            "OUTBOX_DIR",
            "SENDER_PASSWORD",
            "SMTP_HOST",
            "SMTP_PORT",
        ] {
            env::remove_var(name);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.upstream.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.upstream.timeout_secs, 10);
        assert_eq!(config.cache.ttl_secs, 600);
        assert_eq!(config.cache.capacity, 256);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.delay_secs, 2);
        assert_eq!(config.scan.districts_csv, PathBuf::from("districts.csv"));
        assert_eq!(config.scan.lookahead_days, 1);
        assert!(config.notification.is_none());
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
    }

    #[test]
    fn rejects_cache_ttl_outside_window() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("CACHE_TTL_SECS", "60");
        let error = AppConfig::load().expect_err("ttl too short");
        assert!(matches!(error, ConfigError::CacheTtlOutOfRange(60)));

        env::set_var("CACHE_TTL_SECS", "1800");
        assert!(AppConfig::load().is_ok());
    }

    #[test]
    fn rejects_zero_attempts_and_bad_flags() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("RETRY_MAX_ATTEMPTS", "0");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::InvalidNumber {
                name: "RETRY_MAX_ATTEMPTS",
                ..
            })
        ));

        reset_env();
        env::set_var("SENDER_EMAIL", "alerts@example.com");
        env::set_var("RECEIVER_EMAIL", "me@example.com");
        env::set_var("NOTIFY_ON_EMPTY", "maybe");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::InvalidFlag { .. })
        ));
    }

    #[test]
    fn notification_requires_both_addresses() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("SENDER_EMAIL", "alerts@example.com");
        assert!(AppConfig::load().expect("loads").notification.is_none());

        env::set_var("RECEIVER_EMAIL", "me@example.com");
        env::set_var("NOTIFY_ON_EMPTY", "true");
        let notification = AppConfig::load()
            .expect("loads")
            .notification
            .expect("notification configured");
        assert!(notification.notify_on_empty);
        assert_eq!(notification.outbox_dir, PathBuf::from("outbox"));
        assert!(notification.smtp.is_none());
    }

    #[test]
    fn lookahead_is_capped() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("LOOKAHEAD_DAYS", "200000000");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::LookaheadOutOfRange(200000000))
        ));

        env::set_var("LOOKAHEAD_DAYS", "30");
        assert_eq!(AppConfig::load().expect("loads").scan.lookahead_days, 30);

        env::set_var("LOOKAHEAD_DAYS", "31");
        let error = AppConfig::load().expect_err("past the cap");
        assert!(error.to_string().starts_with("LOOKAHEAD_DAYS"));
    }

    #[test]
    fn smtp_relay_needs_a_password() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("SENDER_EMAIL", "alerts@example.com");
        env::set_var("RECEIVER_EMAIL", "me@example.com");
        env::set_var("SMTP_HOST", "smtp.example.com");
        let notification = AppConfig::load().expect("loads").notification.unwrap();
        assert!(notification.smtp.is_none());

        env::set_var("SENDER_PASSWORD", "app-password");
        let smtp = AppConfig::load()
            .expect("loads")
            .notification
            .and_then(|n| n.smtp)
            .expect("smtp configured");
        assert_eq!(smtp.host, "smtp.example.com");
        assert_eq!(smtp.port, DEFAULT_SMTP_PORT);
        assert!(!format!("{smtp:?}").contains("app-password"));

        env::set_var("SMTP_PORT", "0");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::InvalidNumber { name: "SMTP_PORT", .. })
        ));
    }
}
