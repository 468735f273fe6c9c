use crate::error::{Result, TsError};
use crate::format::ts::types::{BitRate, MilliSecond, PacketCounter};
use std::env;
use std::path::Path;
use std::str::FromStr;

/// Creation delay used by the `create` option.
pub const DEFAULT_CREATE_AFTER_MS: MilliSecond = 1000;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "./tscarousel.toml";

/// Options of a table plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TablePluginConfig {
    /// Bitrate of the table PID when the table is created, default of the
    /// plugin when unset
    pub bitrate: Option<BitRate>,
    /// Create an empty table if none was received after one second
    pub create: bool,
    /// Create an empty table if none was received after this delay
    pub create_after_ms: Option<MilliSecond>,
    pub increment_version: bool,
    /// Number of transport packets between two packets of a created table,
    /// used instead of the bitrate when the stream bitrate is unknown
    pub inter_packet: Option<PacketCounter>,
    pub new_version: Option<u8>,
}

impl TablePluginConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bitrate(mut self, bitrate: BitRate) -> Self {
        self.bitrate = Some(bitrate);
        self
    }

    pub fn with_create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn with_create_after(mut self, ms: MilliSecond) -> Self {
        self.create_after_ms = Some(ms);
        self
    }

    pub fn with_increment_version(mut self, increment: bool) -> Self {
        self.increment_version = increment;
        self
    }

    pub fn with_inter_packet(mut self, packets: PacketCounter) -> Self {
        self.inter_packet = Some(packets);
        self
    }

    pub fn with_new_version(mut self, version: u8) -> Self {
        self.new_version = Some(version);
        self
    }

    /// Delay before creating a missing table, zero when creation is disabled.
    pub fn create_after(&self) -> MilliSecond {
        if self.create {
            DEFAULT_CREATE_AFTER_MS
        } else {
            self.create_after_ms.unwrap_or(0)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.create && self.create_after_ms.is_some() {
            return Err(TsError::Config(
                "options create and create_after are mutually exclusive".into(),
            ));
        }
        if let Some(version) = self.new_version {
            if version > 31 {
                return Err(TsError::Config(format!(
                    "new_version {} out of range 0..31",
                    version
                )));
            }
        }
        for (name, value) in [
            ("bitrate", self.bitrate),
            ("create_after", self.create_after_ms),
            ("inter_packet", self.inter_packet),
        ] {
            if value == Some(0) {
                return Err(TsError::Config(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }

    /// Applies one `key = value` setting.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim().trim_matches('"').trim_matches('\'');
        match key.trim() {
            "bitrate" => self.bitrate = Some(value.parse()?),
            "create" => self.create = parse_bool(key, value)?,
            "create_after" => self.create_after_ms = Some(value.parse()?),
            "increment_version" => self.increment_version = parse_bool(key, value)?,
            "inter_packet" => self.inter_packet = Some(value.parse()?),
            "new_version" => self.new_version = Some(value.parse()?),
            other => {
                log::warn!("ignoring unknown configuration key '{}'", other);
            }
        }
        Ok(())
    }

    /// Overrides settings from `TSCAROUSEL_*` environment variables.
    pub fn apply_env(&mut self) -> Result<()> {
        for key in [
            "bitrate",
            "create",
            "create_after",
            "increment_version",
            "inter_packet",
            "new_version",
        ] {
            if let Ok(value) = env::var(format!("TSCAROUSEL_{}", key.to_uppercase())) {
                self.set(key, &value)?;
            }
        }
        Ok(())
    }

    /// Configuration from environment variables only.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Reads settings from `key = value` lines. Empty lines and lines
    /// starting with `#` are ignored.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config = Self::default();
        config.apply_str(content)?;
        Ok(config)
    }

    fn apply_str(&mut self, content: &str) -> Result<()> {
        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                TsError::Config(format!("invalid configuration line '{}'", line))
            })?;
            self.set(key, value)?;
        }
        Ok(())
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Defaults, then the default configuration file if present, then
    /// environment variables. The result is validated.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(content) = std::fs::read_to_string(DEFAULT_CONFIG_PATH) {
            log::debug!("loading configuration from {}", DEFAULT_CONFIG_PATH);
            config.apply_str(&content)?;
        }
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }
}

impl FromStr for TablePluginConfig {
    type Err = TsError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(TsError::Config(format!(
            "invalid boolean '{}' for {}",
            value, key
        ))),
    }
}

/// Creates a default config template file if it doesn't exist
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        let template = r#"# tscarousel table plugin configuration
# Uncomment and adjust the settings to use.

# Bitrate in b/s of the table PID when a new table is created.
# bitrate = 3000

# Create an empty table if none was received after one second.
# create = false

# Create an empty table if none was received after this number of milliseconds.
# create_after = 500

# Increment the version number of the table.
# increment_version = false

# Number of TS packets between two packets of a created table, instead of bitrate.
# inter_packet = 1000

# New version number of the table, 0 to 31.
# new_version = 1
"#;
        std::fs::write(path, template)?;
    }
    Ok(())
}
