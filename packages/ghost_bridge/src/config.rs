use anyhow::{Context, Result};
use ghost_session::SettingsProvider;
use ghost_session::settings::{DEFAULT_FILE_EXTENSION, DEFAULT_SERVER_PORT};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::BridgeError;

// =============================================================================
// Tunable config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     [server]
//                    port = 4002
//
//   env var:         GHOST_SERVER__PORT=4002   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub editor: EditorFileConfig,
}

/// Listener knobs (lives under `[server]` in config.toml).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Reject upgrades whose Origin is not a browser extension.
    #[serde(default = "default_check_origin")]
    pub check_origin: bool,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            check_origin: default_check_origin(),
        }
    }
}

/// Buffer knobs (lives under `[editor]` in config.toml).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EditorFileConfig {
    #[serde(default = "default_file_extension")]
    pub file_extension: String,
    /// Application to raise when a new field connects (macOS only).
    #[serde(default)]
    pub focus_app: Option<String>,
}

impl Default for EditorFileConfig {
    fn default() -> Self {
        Self {
            file_extension: default_file_extension(),
            focus_app: None,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_SERVER_PORT
}
fn default_check_origin() -> bool {
    true
}
fn default_file_extension() -> String {
    DEFAULT_FILE_EXTENSION.to_string()
}

/// Build a figment that layers: defaults → config.toml → GHOST_* env vars.
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("GHOST_").split("__"))
}

pub fn extract_config(data_dir: &Path) -> Result<FileConfig, BridgeError> {
    let mut config: FileConfig = load_config(data_dir).extract()?;
    // accept ".md" as well as "md"
    config.editor.file_extension = config.editor.file_extension.trim_start_matches('.').to_string();
    if config.editor.file_extension.is_empty() {
        config.editor.file_extension = default_file_extension();
    }
    Ok(config)
}

// =============================================================================
// Directory layout (not tunable via figment, derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub data_dir: PathBuf,
}

impl BridgeConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".ghost-bridge"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        Ok(Self { data_dir })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}

// =============================================================================
// Live settings
// =============================================================================

/// Settings read from the data directory, re-read on [`reload`](Self::reload).
///
/// A port given on the command line wins over every other layer and survives
/// reloads.
pub struct FileSettings {
    data_dir: PathBuf,
    port_override: Option<u16>,
    current: RwLock<FileConfig>,
}

impl FileSettings {
    pub fn load(config: &BridgeConfig, port_override: Option<u16>) -> Result<Self, BridgeError> {
        let current = extract_config(&config.data_dir)?;
        Ok(Self {
            data_dir: config.data_dir.clone(),
            port_override,
            current: RwLock::new(current),
        })
    }

    /// Re-read config.toml and the environment. On error the previous values
    /// stay in effect.
    pub fn reload(&self) -> Result<(), BridgeError> {
        let fresh = extract_config(&self.data_dir)?;
        let mut current = self.current.write();
        if *current != fresh {
            info!(
                port = fresh.server.port,
                extension = %fresh.editor.file_extension,
                "settings changed"
            );
            *current = fresh;
        }
        Ok(())
    }

    pub fn snapshot(&self) -> FileConfig {
        let mut config = self.current.read().clone();
        if let Some(port) = self.port_override {
            config.server.port = port;
        }
        config
    }

    pub fn check_origin(&self) -> bool {
        self.current.read().server.check_origin
    }

    pub fn focus_app(&self) -> Option<String> {
        self.current.read().editor.focus_app.clone()
    }
}

impl SettingsProvider for FileSettings {
    fn server_port(&self) -> u16 {
        self.port_override
            .unwrap_or_else(|| self.current.read().server.port)
    }

    fn file_extension(&self) -> String {
        self.current.read().editor.file_extension.clone()
    }
}
