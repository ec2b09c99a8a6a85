//! The reconciler's configuration surface (spec §6): environment variables
//! and command-line flags, mirrored one-to-one so either can set a field.
//! Parsed once at startup into an immutable [`Config`] and passed by value
//! to C3/C4/C5 — there is no process-wide mutable configuration singleton.

#[derive(clap::Parser, Debug, Clone, serde::Serialize)]
#[clap(author, version, about = "UPSF shard reconciler", long_about = None)]
pub struct Config {
    /// UPSF gRPC store host.
    #[clap(long = "upsf-host", env = "UPSF_HOST", default_value = "127.0.0.1")]
    pub upsf_host: String,

    /// UPSF gRPC store port.
    #[clap(long = "upsf-port", short = 'p', env = "UPSF_PORT", default_value = "50051")]
    pub upsf_port: u16,

    /// Path to the policy document (spec §6). A missing file is not an
    /// error: predefined shards and static pins are simply absent.
    #[clap(
        long = "config-file",
        visible_alias = "conf",
        short = 'c',
        env = "CONFIG_FILE",
        default_value = "/etc/upsf/policy.yaml"
    )]
    pub config_file: std::path::PathBuf,

    /// MAC address stamped on newly materialized shards.
    #[clap(
        long = "virtual-mac",
        env = "VIRTUAL_MAC",
        default_value = "00:00:01:00:00:00"
    )]
    pub virtual_mac: String,

    /// Interval between periodic default-shard materialization sweeps.
    #[clap(
        long = "registration-interval",
        short = 'i',
        env = "REGISTRATION_INTERVAL",
        default_value = "60s"
    )]
    #[serde(with = "humantime_serde")]
    #[arg(value_parser = humantime::parse_duration)]
    pub registration_interval: std::time::Duration,

    /// Enables the periodic materializer (C3). Disabled, only the
    /// watch-driven reconciler (C4 via C5) runs. Accepts the same values
    /// as the original's `str2bool`: `true`, `1`, `t`, `y`, `yes`
    /// (case-insensitive); anything else is rejected.
    #[clap(
        long = "upsf-auto-register",
        short = 'a',
        env = "UPSF_AUTO_REGISTER",
        default_value = "yes",
        value_parser = parse_auto_register
    )]
    pub upsf_auto_register: bool,

    /// Logging verbosity. Only consulted when `RUST_LOG` is unset; see
    /// `main.rs`.
    #[clap(
        long = "loglevel",
        short = 'l',
        env = "LOGLEVEL",
        default_value = "info"
    )]
    pub loglevel: LogLevel,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
#[clap(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_tracing_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
            LogLevel::Critical => "error",
        }
    }
}

impl Config {
    pub fn upsf_addr(&self) -> String {
        format!("http://{}:{}", self.upsf_host, self.upsf_port)
    }
}

/// Mirrors the original's `str2bool`: accepts `true`, `1`, `t`, `y`, `yes`
/// case-insensitively, rejects everything else rather than silently
/// defaulting to `false`.
fn parse_auto_register(value: &str) -> Result<bool, String> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "t" | "y" | "yes" => Ok(true),
        "false" | "0" | "f" | "n" | "no" => Ok(false),
        other => Err(format!(
            "invalid value {other:?} for --upsf-auto-register, expected one of: true, 1, t, y, yes, false, 0, f, n, no"
        )),
    }
}
