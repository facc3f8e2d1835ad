use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::display::DisplayConfig;
use crate::scaling::{ScalingConfig, ScalingMode};
use crate::shell::ShellConfig;

pub const DEFAULT_VNC_PORT: u16 = 5900;
pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_DISPLAY_NUM: u32 = 1;
pub const DEFAULT_WIDTH: u32 = 1024;
pub const DEFAULT_HEIGHT: u32 = 768;

/// Connection settings from flags and environment. Every field is optional
/// here; [`Config::resolve`] layers them over the config file and defaults.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Path to a TOML config file (default: <config dir>/rcu/config.toml)
    #[arg(long, env = "RCU_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// VNC server host
    #[arg(long, env = "VNC_HOST", global = true)]
    pub vnc_host: Option<String>,

    /// VNC server port
    #[arg(long, env = "VNC_PORT", global = true)]
    pub vnc_port: Option<u16>,

    /// VNC username (also the default SSH user)
    #[arg(long, env = "VNC_USERNAME", global = true)]
    pub vnc_username: Option<String>,

    /// VNC password (also the default SSH password)
    #[arg(long, env = "VNC_PASSWORD", hide_env_values = true, global = true)]
    pub vnc_password: Option<String>,

    /// SSH host (defaults to the VNC host)
    #[arg(long, env = "SSH_HOST", global = true)]
    pub ssh_host: Option<String>,

    /// SSH port
    #[arg(long, env = "SSH_PORT", global = true)]
    pub ssh_port: Option<u16>,

    /// SSH username (defaults to the VNC username)
    #[arg(long, env = "SSH_USERNAME", global = true)]
    pub ssh_username: Option<String>,

    /// SSH password (defaults to the VNC password)
    #[arg(long, env = "SSH_PASSWORD", hide_env_values = true, global = true)]
    pub ssh_password: Option<String>,

    /// Private key file for SSH public-key authentication
    #[arg(long, env = "PEM_FILE", global = true)]
    pub pem_file: Option<PathBuf>,

    /// X display number xdotool commands run against
    #[arg(long, env = "DISPLAY_NUM", global = true)]
    pub display_num: Option<u32>,

    /// Physical screen width in pixels
    #[arg(long, env = "WIDTH", global = true)]
    pub width: Option<u32>,

    /// Physical screen height in pixels
    #[arg(long, env = "HEIGHT", global = true)]
    pub height: Option<u32>,

    /// Use the fixed 0-1000 coordinate grid instead of standard-resolution scaling
    #[arg(long, env = "RESCALE", global = true, value_parser = parse_flag,
          num_args = 0..=1, default_missing_value = "true")]
    pub rescale: Option<bool>,

    /// Enable coordinate scaling
    #[arg(long, env = "SCALING", global = true, value_parser = parse_flag,
          num_args = 0..=1, default_missing_value = "true")]
    pub scaling: Option<bool>,

    /// Delay before the screenshot that follows an action, in milliseconds
    #[arg(long, env = "SCREENSHOT_DELAY_MS", global = true)]
    pub screenshot_delay_ms: Option<u64>,

    /// Bash tool timeout in seconds
    #[arg(long, env = "BASH_TIMEOUT_SECS", global = true)]
    pub bash_timeout_secs: Option<u64>,
}

/// Accepts `1/0`, `true/false`, `yes/no`, `on/off`.
pub fn parse_flag(s: &str) -> Result<bool, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(format!("expected a boolean, got {other:?}")),
    }
}

// ── File config ────────────────────────────────────────────────────

/// Contents of the optional TOML config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub vnc: VncSection,
    pub ssh: SshSection,
    pub display: DisplaySection,
    pub tools: ToolsSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VncSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub pem_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySection {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub display_num: Option<u32>,
    pub scaling: Option<bool>,
    pub mode: Option<ScalingMode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub screenshot_delay_ms: Option<u64>,
    pub bash_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Load config from a TOML file path. Returns None if the file doesn't
    /// exist.
    ///
    /// Checks file permissions and warns if world-readable.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        check_config_permissions(path);

        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        Ok(Some(config))
    }
}

/// `<config dir>/rcu/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("rcu").join("config.toml"))
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {1}", .0.display())]
    ReadFailed(PathBuf, std::io::Error),

    #[error("failed to parse config {}: {1}", .0.display())]
    ParseFailed(PathBuf, toml::de::Error),

    #[error("config file {} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("{0} is required")]
    Missing(&'static str),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Resolved config ────────────────────────────────────────────────

/// Everything needed to build a remote desktop context.
#[derive(Debug, Clone)]
pub struct Config {
    pub display: DisplayConfig,
    pub shell: ShellConfig,
    pub scaling: ScalingConfig,
    pub screenshot_delay: Duration,
    pub bash_timeout: Duration,
}

impl Config {
    /// Read the config file named by `args` (or the default one) and
    /// resolve it together with `args`.
    pub fn load(args: &ConnectionArgs) -> Result<Self, ConfigError> {
        let file = match &args.config {
            Some(path) => {
                FileConfig::load(path)?.ok_or_else(|| ConfigError::NotFound(path.clone()))?
            }
            None => match default_config_path() {
                Some(path) => FileConfig::load(&path)?.unwrap_or_default(),
                None => FileConfig::default(),
            },
        };
        Self::resolve(args, file)
    }

    /// Flags and environment win over the file; the file wins over defaults.
    /// SSH settings fall back to the VNC ones.
    pub fn resolve(args: &ConnectionArgs, file: FileConfig) -> Result<Self, ConfigError> {
        let FileConfig {
            vnc,
            ssh,
            display,
            tools,
        } = file;

        let vnc_host = args
            .vnc_host
            .clone()
            .or(vnc.host)
            .filter(|h| !h.is_empty())
            .ok_or(ConfigError::Missing("VNC_HOST"))?;
        let vnc_password = args
            .vnc_password
            .clone()
            .or(vnc.password)
            .ok_or(ConfigError::Missing("VNC_PASSWORD"))?;
        let vnc_username = args.vnc_username.clone().or(vnc.username);

        let ssh_username = args
            .ssh_username
            .clone()
            .or(ssh.username)
            .or_else(|| vnc_username.clone())
            .ok_or(ConfigError::Missing("SSH_USERNAME or VNC_USERNAME"))?;

        let width = args.width.or(display.width).unwrap_or(DEFAULT_WIDTH);
        let height = args.height.or(display.height).unwrap_or(DEFAULT_HEIGHT);
        if width == 0 || height == 0 {
            return Err(ConfigError::Invalid(format!(
                "WIDTH and HEIGHT must be non-zero (got {width}x{height})"
            )));
        }

        let mode = match args.rescale {
            Some(true) => ScalingMode::NormalizedGrid,
            Some(false) => ScalingMode::NearestStandard,
            None => display.mode.unwrap_or_default(),
        };

        Ok(Self {
            display: DisplayConfig {
                host: vnc_host.clone(),
                port: args.vnc_port.or(vnc.port).unwrap_or(DEFAULT_VNC_PORT),
                username: vnc_username,
                password: Some(vnc_password.clone()),
            },
            shell: ShellConfig {
                host: args.ssh_host.clone().or(ssh.host).unwrap_or(vnc_host),
                port: args.ssh_port.or(ssh.port).unwrap_or(DEFAULT_SSH_PORT),
                username: ssh_username,
                password: Some(args.ssh_password.clone().or(ssh.password).unwrap_or(vnc_password)),
                private_key: args
                    .pem_file
                    .clone()
                    .or(ssh.pem_file)
                    .filter(|p| !p.as_os_str().is_empty()),
            },
            scaling: ScalingConfig {
                width,
                height,
                display_num: Some(
                    args.display_num
                        .or(display.display_num)
                        .unwrap_or(DEFAULT_DISPLAY_NUM),
                ),
                enabled: args.scaling.or(display.scaling).unwrap_or(true),
                mode,
            },
            screenshot_delay: args
                .screenshot_delay_ms
                .or(tools.screenshot_delay_ms)
                .map(Duration::from_millis)
                .unwrap_or(crate::computer::DEFAULT_SCREENSHOT_DELAY),
            bash_timeout: args
                .bash_timeout_secs
                .or(tools.bash_timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(crate::bash::DEFAULT_TIMEOUT),
        })
    }
}

/// Check file permissions on a config file and warn if world-readable.
#[cfg(unix)]
pub fn check_config_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return,
    };

    let mode = metadata.permissions().mode();
    if is_world_readable(mode) {
        tracing::warn!(
            "Config file {} is world-readable (mode {:o}). \
             It may contain passwords -- consider restricting permissions to 600.",
            path.display(),
            mode & 0o7777,
        );
    }
}

#[cfg(not(unix))]
pub fn check_config_permissions(_path: &Path) {}

/// Returns true if the given file mode has the world-readable bit set.
pub fn is_world_readable(mode: u32) -> bool {
    mode & 0o004 != 0
}
