//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::NonZeroUsize,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "velin";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_CONTENT_DIR: &str = "content";
const DEFAULT_EXPORT_DIR: &str = "site";
const DEFAULT_COMBINED_BASENAME: &str = "toutes-les-fiches";
const DEFAULT_MAX_CONCURRENT_CAPTURES: usize = 2;
const DEFAULT_NAVIGATION_TIMEOUT_SECS: u64 = 30;
const DEFAULT_READINESS_TIMEOUT_SECS: u64 = 15;
const DEFAULT_READINESS_POLL_MS: u64 = 50;
const DEFAULT_SETTLE_DELAY_MS: u64 = 0;
const DEFAULT_TOTAL_TIMEOUT_SECS: u64 = 120;

/// Command-line arguments for the Velin binary.
#[derive(Debug, Parser)]
#[command(name = "velin", version, about = "Velin study-sheet server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "VELIN_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the Velin HTTP service.
    Serve(Box<ServeArgs>),
    /// Bake the whole corpus into a static file tree.
    #[command(name = "export")]
    ExportSite(ExportSiteArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ContentOverride {
    /// Override the directory scanned for source documents.
    #[arg(long = "content-directory", value_name = "PATH")]
    pub content_directory: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub content: ContentOverride,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the base URL the capture engine navigates to.
    #[arg(long = "server-public-base-url", value_name = "URL")]
    pub server_public_base_url: Option<String>,

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

    /// Override the browser executable used for PDF capture.
    #[arg(long = "capture-browser-path", value_name = "PATH")]
    pub capture_browser_path: Option<PathBuf>,

    /// Override the number of simultaneous capture contexts.
    #[arg(long = "capture-max-concurrent", value_name = "COUNT")]
    pub capture_max_concurrent: Option<usize>,

    /// Override the per-step navigation/readiness timeout.
    #[arg(long = "capture-navigation-timeout-seconds", value_name = "SECONDS")]
    pub capture_navigation_timeout_seconds: Option<u64>,

    /// Override the highlight-readiness wait ceiling.
    #[arg(long = "capture-readiness-timeout-seconds", value_name = "SECONDS")]
    pub capture_readiness_timeout_seconds: Option<u64>,

    /// Override the whole-capture deadline; 0 removes the deadline entirely.
    #[arg(long = "capture-total-timeout-seconds", value_name = "SECONDS")]
    pub capture_total_timeout_seconds: Option<u64>,
}

#[derive(Debug, Args, Clone, Default)]
pub struct ExportSiteArgs {
    #[command(flatten)]
    pub content: ContentOverride,

    /// Directory to write the static site into (replaces any existing tree).
    #[arg(value_name = "OUTPUT_DIR", value_hint = ValueHint::DirPath)]
    pub output_dir: Option<PathBuf>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub content: ContentSettings,
    pub capture: CaptureSettings,
    pub export: ExportSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    /// Base URL used when the capture engine fetches rendered documents.
    pub public_base_url: String,
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
pub struct ContentSettings {
    pub directory: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Explicit browser executable; `None` lets headless_chrome locate one.
    pub browser_path: Option<PathBuf>,
    /// Cap on simultaneous page-level contexts against the shared browser.
    pub max_concurrent_captures: NonZeroUsize,
    /// Bound on navigation and each in-page wait step.
    pub navigation_timeout: Duration,
    /// Ceiling on polling for the page's highlight-readiness flag.
    pub readiness_timeout: Duration,
    /// Interval between readiness polls.
    pub readiness_poll_interval: Duration,
    /// Optional grace delay after readiness, before the snapshot.
    pub settle_delay: Duration,
    /// Whole-capture deadline; `None` means the capture runs unbounded,
    /// which is only reachable through the explicit `0` configuration value.
    pub total_deadline: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub output_dir: PathBuf,
    /// Filename stem of the combined all-documents export.
    pub combined_basename: String,
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

/// Parse CLI arguments and load settings in one step.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let cli = CliArgs::parse();
    let settings = load(&cli)?;
    Ok((cli, settings))
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("VELIN").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::ExportSite(args)) => raw.apply_export_overrides(args),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    content: RawContentSettings,
    capture: RawCaptureSettings,
    export: RawExportSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    public_base_url: Option<String>,
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
struct RawContentSettings {
    directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCaptureSettings {
    browser_path: Option<PathBuf>,
    max_concurrent_captures: Option<usize>,
    navigation_timeout_seconds: Option<u64>,
    readiness_timeout_seconds: Option<u64>,
    readiness_poll_interval_ms: Option<u64>,
    settle_delay_ms: Option<u64>,
    total_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawExportSettings {
    output_dir: Option<PathBuf>,
    combined_basename: Option<String>,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(url) = overrides.server_public_base_url.as_ref() {
            self.server.public_base_url = Some(url.clone());
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
        if let Some(path) = overrides.capture_browser_path.as_ref() {
            self.capture.browser_path = Some(path.clone());
        }
        if let Some(count) = overrides.capture_max_concurrent {
            self.capture.max_concurrent_captures = Some(count);
        }
        if let Some(seconds) = overrides.capture_navigation_timeout_seconds {
            self.capture.navigation_timeout_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.capture_readiness_timeout_seconds {
            self.capture.readiness_timeout_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.capture_total_timeout_seconds {
            self.capture.total_timeout_seconds = Some(seconds);
        }

        self.apply_content_override(&overrides.content);
    }

    fn apply_export_overrides(&mut self, args: &ExportSiteArgs) {
        self.apply_content_override(&args.content);
        if let Some(dir) = args.output_dir.as_ref() {
            self.export.output_dir = Some(dir.clone());
        }
    }

    fn apply_content_override(&mut self, overrides: &ContentOverride) {
        if let Some(dir) = overrides.content_directory.as_ref() {
            self.content.directory = Some(dir.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            content,
            capture,
            export,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let content = build_content_settings(content);
        let capture = build_capture_settings(capture)?;
        let export = build_export_settings(export);

        Ok(Self {
            server,
            logging,
            content,
            capture,
            export,
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

    let public_base_url = server
        .public_base_url
        .unwrap_or_else(|| format!("http://{addr}"));
    let public_base_url = public_base_url.trim_end_matches('/').to_string();
    if public_base_url.is_empty() {
        return Err(LoadError::invalid(
            "server.public_base_url",
            "base URL must not be empty",
        ));
    }

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);

    Ok(ServerSettings {
        addr,
        public_base_url,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(raw) => LevelFilter::from_str(raw.trim())
            .map_err(|_| LoadError::invalid("logging.level", format!("unknown level `{raw}`")))?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_content_settings(content: RawContentSettings) -> ContentSettings {
    ContentSettings {
        directory: content
            .directory
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONTENT_DIR)),
    }
}

fn build_capture_settings(capture: RawCaptureSettings) -> Result<CaptureSettings, LoadError> {
    let max_concurrent = capture
        .max_concurrent_captures
        .unwrap_or(DEFAULT_MAX_CONCURRENT_CAPTURES);
    let max_concurrent_captures = NonZeroUsize::new(max_concurrent).ok_or_else(|| {
        LoadError::invalid(
            "capture.max_concurrent_captures",
            "at least one concurrent capture is required",
        )
    })?;

    let navigation_secs = capture
        .navigation_timeout_seconds
        .unwrap_or(DEFAULT_NAVIGATION_TIMEOUT_SECS);
    if navigation_secs == 0 {
        return Err(LoadError::invalid(
            "capture.navigation_timeout_seconds",
            "navigation timeout must be greater than zero",
        ));
    }

    let readiness_secs = capture
        .readiness_timeout_seconds
        .unwrap_or(DEFAULT_READINESS_TIMEOUT_SECS);
    if readiness_secs == 0 {
        return Err(LoadError::invalid(
            "capture.readiness_timeout_seconds",
            "readiness timeout must be greater than zero",
        ));
    }

    let poll_ms = capture
        .readiness_poll_interval_ms
        .unwrap_or(DEFAULT_READINESS_POLL_MS);
    if poll_ms == 0 {
        return Err(LoadError::invalid(
            "capture.readiness_poll_interval_ms",
            "poll interval must be greater than zero",
        ));
    }

    let settle_ms = capture.settle_delay_ms.unwrap_or(DEFAULT_SETTLE_DELAY_MS);

    // `0` is the explicit opt-out: a capture may run unbounded, but only
    // when the operator asked for it.
    let total_secs = capture
        .total_timeout_seconds
        .unwrap_or(DEFAULT_TOTAL_TIMEOUT_SECS);
    let total_deadline = (total_secs > 0).then(|| Duration::from_secs(total_secs));

    Ok(CaptureSettings {
        browser_path: capture.browser_path,
        max_concurrent_captures,
        navigation_timeout: Duration::from_secs(navigation_secs),
        readiness_timeout: Duration::from_secs(readiness_secs),
        readiness_poll_interval: Duration::from_millis(poll_ms),
        settle_delay: Duration::from_millis(settle_ms),
        total_deadline,
    })
}

fn build_export_settings(export: RawExportSettings) -> ExportSettings {
    ExportSettings {
        output_dir: export
            .output_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_EXPORT_DIR)),
        combined_basename: export
            .combined_basename
            .unwrap_or_else(|| DEFAULT_COMBINED_BASENAME.to_string()),
    }
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    format!("{host}:{port}")
        .parse()
        .map_err(|err| format!("could not parse `{host}:{port}`: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve() {
        let settings = Settings::from_raw(RawSettings::default()).expect("defaults must be valid");

        assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
        assert_eq!(settings.server.public_base_url, "http://127.0.0.1:3000");
        assert_eq!(settings.content.directory, PathBuf::from("content"));
        assert_eq!(settings.capture.max_concurrent_captures.get(), 2);
        assert_eq!(
            settings.capture.total_deadline,
            Some(Duration::from_secs(DEFAULT_TOTAL_TIMEOUT_SECS))
        );
        assert_eq!(settings.export.combined_basename, "toutes-les-fiches");
    }

    #[test]
    fn zero_total_timeout_means_unbounded() {
        let mut raw = RawSettings::default();
        raw.capture.total_timeout_seconds = Some(0);

        let settings = Settings::from_raw(raw).expect("zero deadline is a valid opt-out");
        assert_eq!(settings.capture.total_deadline, None);
    }

    #[test]
    fn rejects_zero_port() {
        let mut raw = RawSettings::default();
        raw.server.port = Some(0);

        assert!(matches!(
            Settings::from_raw(raw),
            Err(LoadError::Invalid {
                key: "server.port",
                ..
            })
        ));
    }

    #[test]
    fn rejects_zero_capture_concurrency() {
        let mut raw = RawSettings::default();
        raw.capture.max_concurrent_captures = Some(0);

        assert!(matches!(
            Settings::from_raw(raw),
            Err(LoadError::Invalid {
                key: "capture.max_concurrent_captures",
                ..
            })
        ));
    }

    #[test]
    fn serve_overrides_take_precedence() {
        let mut raw = RawSettings::default();
        raw.server.port = Some(8080);

        let overrides = ServeOverrides {
            server_port: Some(9090),
            log_level: Some("debug".to_string()),
            capture_total_timeout_seconds: Some(0),
            ..ServeOverrides::default()
        };
        raw.apply_serve_overrides(&overrides);

        let settings = Settings::from_raw(raw).expect("overridden settings must be valid");
        assert_eq!(settings.server.addr.port(), 9090);
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
        assert_eq!(settings.capture.total_deadline, None);
    }

    #[test]
    fn public_base_url_trailing_slash_is_trimmed() {
        let mut raw = RawSettings::default();
        raw.server.public_base_url = Some("http://fiches.example.org/".to_string());

        let settings = Settings::from_raw(raw).expect("base url must be accepted");
        assert_eq!(settings.server.public_base_url, "http://fiches.example.org");
    }
}
