//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::session::DEFAULT_SESSION_COOKIE;
use crate::cache::CacheConfig;
use crate::upstream::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "tessera";
const ENV_PREFIX: &str = "TESSERA";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_UPSTREAM_BASE_URL: &str = "http://127.0.0.1:8000/api";
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 10;

/// Command-line arguments for the Tessera binary.
#[derive(Debug, Parser)]
#[command(name = "tessera", version, about = "Tessera read-through caching gateway")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "TESSERA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the caching gateway.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the Redis connection URL; an empty value disables the distributed tier.
    #[arg(long = "redis-url", value_name = "URL")]
    pub redis_url: Option<String>,

    /// Force TLS for the Redis connection.
    #[arg(
        long = "redis-tls",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub redis_tls: Option<bool>,

    /// Override the cache key prefix.
    #[arg(long = "cache-key-prefix", value_name = "PREFIX")]
    pub cache_key_prefix: Option<String>,

    /// Override the upstream API base URL.
    #[arg(long = "upstream-base-url", value_name = "URL")]
    pub upstream_base_url: Option<String>,

    /// Override the number of upstream attempts.
    #[arg(long = "upstream-max-retries", value_name = "COUNT")]
    pub upstream_max_retries: Option<u32>,

    /// Override the fixed delay between upstream attempts.
    #[arg(long = "upstream-retry-delay-ms", value_name = "MILLIS")]
    pub upstream_retry_delay_ms: Option<u64>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub upstream: UpstreamSettings,
    pub session: SessionSettings,
}

impl Settings {
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::from(&self.cache)
    }
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub redis_url: Option<String>,
    pub redis_tls: bool,
    pub key_prefix: Option<String>,
    pub redis_pool_size: NonZeroU32,
    pub redis_timeout_ms: NonZeroU64,
    pub redis_reconnect_cooldown_ms: u64,
    pub stale_grace_seconds: u64,
    pub list_key_index_limit: NonZeroU32,
    pub list_eviction_pages: NonZeroU32,
    pub ttl: CacheTtlSettings,
}

#[derive(Debug, Clone)]
pub struct CacheTtlSettings {
    pub posts_seconds: NonZeroU64,
    pub jobs_seconds: NonZeroU64,
    pub quiz_seconds: NonZeroU64,
    pub profile_seconds: NonZeroU64,
    pub mercure_token_seconds: NonZeroU64,
}

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub base_url: String,
    pub max_retries: NonZeroU32,
    pub retry_delay: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub cookie_name: String,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    upstream: RawUpstreamSettings,
    session: RawSessionSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.redis_url.as_ref() {
            self.cache.redis_url = Some(url.clone());
        }
        if let Some(tls) = overrides.redis_tls {
            self.cache.redis_tls = Some(tls);
        }
        if let Some(prefix) = overrides.cache_key_prefix.as_ref() {
            self.cache.key_prefix = Some(prefix.clone());
        }
        if let Some(url) = overrides.upstream_base_url.as_ref() {
            self.upstream.base_url = Some(url.clone());
        }
        if let Some(max) = overrides.upstream_max_retries {
            self.upstream.max_retries = Some(max.into());
        }
        if let Some(delay) = overrides.upstream_retry_delay_ms {
            self.upstream.retry_delay_ms = Some(delay);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            upstream,
            session,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            upstream: build_upstream_settings(upstream)?,
            session: build_session_settings(session)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let defaults = CacheConfig::default();

    let redis_pool_size = non_zero_u32(
        cache
            .redis_pool_size
            .unwrap_or(defaults.redis_pool_size as u64),
        "cache.redis_pool_size",
    )?;
    let redis_timeout_ms = non_zero_u64(
        cache.redis_timeout_ms.unwrap_or(defaults.redis_timeout_ms),
        "cache.redis_timeout_ms",
    )?;
    let list_key_index_limit = non_zero_u32(
        cache
            .list_key_index_limit
            .unwrap_or(defaults.list_key_index_limit as u64),
        "cache.list_key_index_limit",
    )?;
    let list_eviction_pages = non_zero_u32(
        cache
            .list_eviction_pages
            .unwrap_or(defaults.list_eviction_pages.into()),
        "cache.list_eviction_pages",
    )?;

    let ttl = cache.ttl;
    let ttl = CacheTtlSettings {
        posts_seconds: non_zero_u64(
            ttl.posts_seconds.unwrap_or(defaults.ttl.posts_seconds),
            "cache.ttl.posts_seconds",
        )?,
        jobs_seconds: non_zero_u64(
            ttl.jobs_seconds.unwrap_or(defaults.ttl.jobs_seconds),
            "cache.ttl.jobs_seconds",
        )?,
        quiz_seconds: non_zero_u64(
            ttl.quiz_seconds.unwrap_or(defaults.ttl.quiz_seconds),
            "cache.ttl.quiz_seconds",
        )?,
        profile_seconds: non_zero_u64(
            ttl.profile_seconds.unwrap_or(defaults.ttl.profile_seconds),
            "cache.ttl.profile_seconds",
        )?,
        mercure_token_seconds: non_zero_u64(
            ttl.mercure_token_seconds
                .unwrap_or(defaults.ttl.mercure_token_seconds),
            "cache.ttl.mercure_token_seconds",
        )?,
    };

    Ok(CacheSettings {
        redis_url: trimmed(cache.redis_url),
        redis_tls: cache.redis_tls.unwrap_or(false),
        key_prefix: trimmed(cache.key_prefix),
        redis_pool_size,
        redis_timeout_ms,
        redis_reconnect_cooldown_ms: cache
            .redis_reconnect_cooldown_ms
            .unwrap_or(defaults.redis_reconnect_cooldown_ms),
        stale_grace_seconds: cache
            .stale_grace_seconds
            .unwrap_or(defaults.stale_grace_seconds),
        list_key_index_limit,
        list_eviction_pages,
        ttl,
    })
}

fn build_upstream_settings(upstream: RawUpstreamSettings) -> Result<UpstreamSettings, LoadError> {
    let base_url = upstream
        .base_url
        .and_then(|value| trimmed(Some(value)))
        .unwrap_or_else(|| DEFAULT_UPSTREAM_BASE_URL.to_string());
    url::Url::parse(&base_url)
        .map_err(|err| LoadError::invalid("upstream.base_url", err.to_string()))?;

    let max_retries = non_zero_u32(
        upstream.max_retries.unwrap_or(DEFAULT_MAX_RETRIES.into()),
        "upstream.max_retries",
    )?;

    let retry_delay = upstream
        .retry_delay_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_RETRY_DELAY);

    let timeout_secs = upstream
        .timeout_seconds
        .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "upstream.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(UpstreamSettings {
        base_url,
        max_retries,
        retry_delay,
        timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_session_settings(session: RawSessionSettings) -> Result<SessionSettings, LoadError> {
    let cookie_name = trimmed(session.cookie_name)
        .unwrap_or_else(|| DEFAULT_SESSION_COOKIE.to_string());
    if cookie_name.contains(|c: char| c.is_whitespace() || c == ';' || c == '=') {
        return Err(LoadError::invalid(
            "session.cookie_name",
            "must be a valid cookie name",
        ));
    }
    Ok(SessionSettings { cookie_name })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    redis_url: Option<String>,
    redis_tls: Option<bool>,
    key_prefix: Option<String>,
    redis_pool_size: Option<u64>,
    redis_timeout_ms: Option<u64>,
    redis_reconnect_cooldown_ms: Option<u64>,
    stale_grace_seconds: Option<u64>,
    list_key_index_limit: Option<u64>,
    list_eviction_pages: Option<u64>,
    ttl: RawCacheTtlSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheTtlSettings {
    posts_seconds: Option<u64>,
    jobs_seconds: Option<u64>,
    quiz_seconds: Option<u64>,
    profile_seconds: Option<u64>,
    mercure_token_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUpstreamSettings {
    base_url: Option<String>,
    max_retries: Option<u64>,
    retry_delay_ms: Option<u64>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSessionSettings {
    cookie_name: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_u64(value: u64, key: &'static str) -> Result<NonZeroU64, LoadError> {
    NonZeroU64::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    fn defaults_resolve() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
        assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
        assert!(settings.cache.redis_url.is_none());
        assert_eq!(settings.cache.ttl.posts_seconds.get(), 60);
        assert_eq!(settings.upstream.max_retries.get(), DEFAULT_MAX_RETRIES);
        assert_eq!(settings.upstream.retry_delay, DEFAULT_RETRY_DELAY);
        assert_eq!(settings.session.cookie_name, DEFAULT_SESSION_COOKIE);
    }

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.server.port = Some(4000);
        raw.logging.level = Some("info".to_string());
        raw.cache.redis_url = Some("redis://from-file:6379".to_string());

        let overrides = ServeOverrides {
            server_port: Some(4321),
            log_level: Some("debug".to_string()),
            redis_url: Some("redis://from-cli:6379".to_string()),
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.server.addr.port(), 4321);
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
        assert_eq!(
            settings.cache.redis_url.as_deref(),
            Some("redis://from-cli:6379")
        );
    }

    #[test]
    fn blank_redis_url_disables_distributed_tier() {
        let mut raw = RawSettings::default();
        raw.cache.redis_url = Some("   ".to_string());
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert!(settings.cache.redis_url.is_none());
        assert!(settings.cache_config().redis_settings().effective_url().is_none());
    }

    #[test]
    fn zero_values_are_rejected() {
        let mut raw = RawSettings::default();
        raw.upstream.max_retries = Some(0);
        let err = Settings::from_raw(raw).expect_err("zero retries");
        assert!(matches!(err, LoadError::Invalid { key: "upstream.max_retries", .. }));

        let mut raw = RawSettings::default();
        raw.cache.ttl.profile_seconds = Some(0);
        let err = Settings::from_raw(raw).expect_err("zero ttl");
        assert!(matches!(err, LoadError::Invalid { key: "cache.ttl.profile_seconds", .. }));

        let mut raw = RawSettings::default();
        raw.server.port = Some(0);
        assert!(Settings::from_raw(raw).is_err());
    }

    #[test]
    fn invalid_upstream_url_is_rejected() {
        let mut raw = RawSettings::default();
        raw.upstream.base_url = Some("not a url".to_string());
        let err = Settings::from_raw(raw).expect_err("invalid url");
        assert!(matches!(err, LoadError::Invalid { key: "upstream.base_url", .. }));
    }

    #[test]
    fn cli_json_logging_enforces_format() {
        let mut raw = RawSettings::default();
        let overrides = ServeOverrides {
            log_json: Some(true),
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert!(matches!(settings.logging.format, LogFormat::Json));
    }

    #[test]
    fn default_to_serve_command() {
        let args = CliArgs::parse_from(["tessera"]);
        let command = args
            .command
            .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
        assert!(matches!(command, Command::Serve(_)));
    }

    #[test]
    fn parse_serve_overrides() {
        let args = CliArgs::parse_from([
            "tessera",
            "serve",
            "--server-host",
            "0.0.0.0",
            "--redis-url",
            "redis://cache:6379/0",
            "--redis-tls",
            "true",
            "--upstream-max-retries",
            "5",
        ]);

        match args.command.expect("serve command") {
            Command::Serve(serve) => {
                assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
                assert_eq!(
                    serve.overrides.redis_url.as_deref(),
                    Some("redis://cache:6379/0")
                );
                assert_eq!(serve.overrides.redis_tls, Some(true));
                assert_eq!(serve.overrides.upstream_max_retries, Some(5));
            }
        }
    }

    #[test]
    #[serial]
    fn environment_overrides_file_defaults() {
        // SAFETY: serialized with every other env-mutating test.
        unsafe {
            std::env::set_var("TESSERA__CACHE__KEY_PREFIX", "staging");
            std::env::set_var("TESSERA__UPSTREAM__RETRY_DELAY_MS", "50");
        }

        let args = CliArgs::parse_from(["tessera"]);
        let result = load(&args);

        unsafe {
            std::env::remove_var("TESSERA__CACHE__KEY_PREFIX");
            std::env::remove_var("TESSERA__UPSTREAM__RETRY_DELAY_MS");
        }

        let settings = result.expect("valid settings");
        assert_eq!(settings.cache.key_prefix.as_deref(), Some("staging"));
        assert_eq!(settings.upstream.retry_delay, Duration::from_millis(50));
    }
}
