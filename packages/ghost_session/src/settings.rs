/// Port the bridge listens on unless configured otherwise.
pub const DEFAULT_SERVER_PORT: u16 = 4001;

/// Extension given to new buffers unless configured otherwise.
pub const DEFAULT_FILE_EXTENSION: &str = "txt";

/// Read-only view of the user's settings. Polled whenever a value is needed,
/// so implementations may change what they return between calls.
pub trait SettingsProvider: Send + Sync {
    fn server_port(&self) -> u16;

    /// Extension (without the dot) used for newly created buffers.
    fn file_extension(&self) -> String;
}

/// Fixed settings, for embedding and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticSettings {
    pub server_port: u16,
    pub file_extension: String,
}

impl Default for StaticSettings {
    fn default() -> Self {
        Self {
            server_port: DEFAULT_SERVER_PORT,
            file_extension: DEFAULT_FILE_EXTENSION.to_string(),
        }
    }
}

impl SettingsProvider for StaticSettings {
    fn server_port(&self) -> u16 {
        self.server_port
    }

    fn file_extension(&self) -> String {
        self.file_extension.clone()
    }
}
