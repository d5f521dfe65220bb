//! Configuration file support for irflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (IRFLASH_*)
//! 3. Local config file (./irflash.toml)
//! 4. Global config file (~/.config/irflash/config.toml)

use directories::ProjectDirs;
use irflash::image::hex::{DEFAULT_PAGE_COUNT, DEFAULT_PAGE_SIZE};
use irflash::transmit::lirc::DEFAULT_LIRC_DEVICE;
use irflash::{FlashGeometry, UploadConfig};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::CliError;

/// Local configuration file name.
const LOCAL_CONFIG_FILE: &str = "irflash.toml";

/// Listener and transmitter settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Local address to bind (e.g. "0.0.0.0").
    pub bind: Option<String>,
    /// TCP port.
    pub port: Option<u16>,
    /// LIRC transmit device.
    pub device: Option<String>,
}

/// Upload pacing and input checking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadSection {
    /// Message that starts the bootloader.
    pub wake_command: Option<String>,
    /// Wait after the wake command, in milliseconds.
    pub settle_delay_ms: Option<u64>,
    /// Wait after every page, in milliseconds.
    pub page_delay_ms: Option<u64>,
    /// Reject hex records with a bad checksum.
    pub strict_checksum: Option<bool>,
    /// Client read timeout in milliseconds (0 or absent waits forever).
    pub client_timeout_ms: Option<u64>,
}

/// Target flash layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Number of flash pages.
    pub page_count: Option<usize>,
    /// Bytes per page.
    pub page_size: Option<usize>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Upload configuration.
    #[serde(default)]
    pub upload: UploadSection,
    /// Target configuration.
    #[serde(default)]
    pub target: TargetConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "irflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.server.bind.is_some() {
            self.server.bind = other.server.bind;
        }
        if other.server.port.is_some() {
            self.server.port = other.server.port;
        }
        if other.server.device.is_some() {
            self.server.device = other.server.device;
        }

        if other.upload.wake_command.is_some() {
            self.upload.wake_command = other.upload.wake_command;
        }
        if other.upload.settle_delay_ms.is_some() {
            self.upload.settle_delay_ms = other.upload.settle_delay_ms;
        }
        if other.upload.page_delay_ms.is_some() {
            self.upload.page_delay_ms = other.upload.page_delay_ms;
        }
        if other.upload.strict_checksum.is_some() {
            self.upload.strict_checksum = other.upload.strict_checksum;
        }
        if other.upload.client_timeout_ms.is_some() {
            self.upload.client_timeout_ms = other.upload.client_timeout_ms;
        }

        if other.target.page_count.is_some() {
            self.target.page_count = other.target.page_count;
        }
        if other.target.page_size.is_some() {
            self.target.page_size = other.target.page_size;
        }
    }

    /// Whether hex record checksums are enforced.
    pub fn strict_checksum(&self) -> bool {
        self.upload.strict_checksum.unwrap_or(false)
    }

    /// LIRC device to transmit through.
    pub fn device(&self) -> PathBuf {
        PathBuf::from(
            self.server
                .device
                .as_deref()
                .unwrap_or(DEFAULT_LIRC_DEVICE),
        )
    }

    /// Configured wake command, or the bootloader default.
    pub fn wake_command(&self) -> String {
        self.upload
            .wake_command
            .clone()
            .unwrap_or_else(|| UploadConfig::default().wake_command)
    }

    /// Target flash layout.
    pub fn geometry(&self) -> Result<FlashGeometry, CliError> {
        let geometry = FlashGeometry::new(
            self.target.page_count.unwrap_or(DEFAULT_PAGE_COUNT),
            self.target.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        );
        geometry
            .validate()
            .map_err(|e| CliError::Config(format!("[target] {e}")))?;
        Ok(geometry)
    }

    /// Server settings built from the file values on top of the defaults.
    pub fn upload_config(&self) -> Result<UploadConfig, CliError> {
        let mut upload = UploadConfig::default();

        if let Some(bind) = &self.server.bind {
            upload.bind = bind.parse().map_err(|e| {
                CliError::Config(format!("[server] invalid bind address '{bind}': {e}"))
            })?;
        }
        if let Some(port) = self.server.port {
            upload.port = port;
        }
        upload.wake_command = self.wake_command();
        if let Some(ms) = self.upload.settle_delay_ms {
            upload.settle_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.upload.page_delay_ms {
            upload.page_delay = Duration::from_millis(ms);
        }
        upload.load_options.strict_checksum = self.strict_checksum();
        upload.client_timeout = self
            .upload
            .client_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);
        upload.geometry = self.geometry()?;

        Ok(upload)
    }
}
