//! Bridge configuration
//!
//! The [Config] type is loaded from a `debug_bridge.toml` file, either given
//! explicitly, found in the working directory, or found in the user's
//! configuration directory.
//!
//! ```toml
//! boot-mode = "default"
//! binaries = ["build/app.elf"]
//! flash-images = ["build/flash.img"]
//!
//! [cable]
//! type = "jtag-proxy"
//!
//! [cable.jtag-proxy]
//! host = "localhost"
//! port = 37539
//!
//! [poll]
//! timeout-ms = 10000
//! ```

use std::{
    fs::read_to_string,
    path::{Path, PathBuf},
    time::Duration,
};

use directories::ProjectDirs;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    flasher::PollPolicy,
    session::BootMode,
    transport::proxy::DEFAULT_PROXY_PORT,
};

/// Name of the configuration file looked up by [Config::load]
pub const CONFIG_FILE_NAME: &str = "debug_bridge.toml";

/// Top-level configuration
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// How binaries are brought up on the target
    #[serde(default)]
    pub boot_mode: BootMode,
    /// ELF binaries loaded on the target, in order
    #[serde(default)]
    pub binaries: Vec<PathBuf>,
    /// Raw images streamed to the target's flasher firmware
    #[serde(default)]
    pub flash_images: Vec<PathBuf>,
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
    /// Cable selection
    #[serde(default)]
    pub cable: CableConfig,
    /// Ready-flag polling
    #[serde(default)]
    pub poll: PollConfig,
}

/// Cable selection and cable-specific settings
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct CableConfig {
    /// Cable selector, e.g. `jtag-proxy` or `ftdi@digilent`
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Settings for the `jtag-proxy` cable
    #[serde(default)]
    pub jtag_proxy: Option<ProxyConfig>,
}

/// Where to find the JTAG proxy
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProxyConfig {
    #[serde(default = "default_proxy_host")]
    pub host: String,
    #[serde(default = "default_proxy_port")]
    pub port: u16,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: default_proxy_host(),
            port: default_proxy_port(),
        }
    }
}

fn default_proxy_host() -> String {
    "localhost".into()
}

fn default_proxy_port() -> u16 {
    DEFAULT_PROXY_PORT
}

/// Polling of the target's ready flags
#[derive(Debug, Deserialize, Serialize, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct PollConfig {
    /// Pause between two reads of a ready flag
    #[serde(default)]
    pub interval_ms: u64,
    /// Give up after this long; wait forever when unset
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl From<PollConfig> for PollPolicy {
    fn from(config: PollConfig) -> Self {
        PollPolicy {
            interval: Duration::from_millis(config.interval_ms),
            timeout: config.timeout_ms.map(Duration::from_millis),
        }
    }
}

impl Config {
    /// Load the configuration.
    ///
    /// An explicit `path` must exist. Otherwise the working directory and then
    /// the user configuration directory are searched, falling back to the
    /// defaults when neither has a configuration file.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::search_paths().into_iter().find(|p| p.is_file()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };

        debug!("Config: {:#?}", &config);

        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(raw: &str) -> Result<Self, Error> {
        Ok(toml::from_str(raw)?)
    }

    fn from_file(path: &Path) -> Result<Self, Error> {
        debug!("Loading config from {}", path.display());

        let raw = read_to_string(path).map_err(|e| Error::FileOpenError(path.to_path_buf(), e))?;

        Self::from_toml(&raw)
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(dirs) = ProjectDirs::from("", "", "debug-bridge") {
            paths.push(dirs.config_dir().join(CONFIG_FILE_NAME));
        }

        paths
    }
}
