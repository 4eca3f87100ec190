use crate::error::{BlockchainError, Result};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

pub static GLOBAL_CONFIG: Lazy<Config> = Lazy::new(|| {
    Config::load().unwrap_or_else(|e| {
        log::warn!("Falling back to default settings: {e}");
        Config::new(Settings::default())
    })
});

/// Highest difficulty a target can express (`2^(256 - 255)`)
pub const MAX_DIFFICULTY: u32 = 255;

const DEFAULT_DATA_DIR: &str = "./tmp";
const DEFAULT_NODE_ID: &str = "3000";
const DEFAULT_DIFFICULTY: u32 = 18;
const DEFAULT_CONFIG_FILE: &str = "ledger.toml";

const CONFIG_PATH_KEY: &str = "LEDGER_CONFIG";
const DATA_DIR_KEY: &str = "DATA_DIR";
const NODE_ID_KEY: &str = "NODE_ID";
const DIFFICULTY_KEY: &str = "POW_DIFFICULTY";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub node_id: String,
    pub difficulty: u32,
    pub wallet_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            node_id: String::from(DEFAULT_NODE_ID),
            difficulty: DEFAULT_DIFFICULTY,
            wallet_file: None,
        }
    }
}

impl Settings {
    /// Reads the TOML file named by `LEDGER_CONFIG` (or `ledger.toml` when
    /// present), then applies environment overrides
    pub fn load() -> Result<Settings> {
        let mut settings = match env::var(CONFIG_PATH_KEY) {
            Ok(path) => Self::from_file(path)?,
            Err(_) if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(DEFAULT_CONFIG_FILE)?
            }
            Err(_) => Settings::default(),
        };
        settings.apply_overrides(|key| env::var(key).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Settings> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            BlockchainError::Config(format!("Cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Settings> {
        let settings: Settings = toml::from_str(contents)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Applies `DATA_DIR`, `NODE_ID` and `POW_DIFFICULTY` as returned by `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(data_dir) = lookup(DATA_DIR_KEY) {
            self.data_dir = PathBuf::from(data_dir);
        }
        if let Some(node_id) = lookup(NODE_ID_KEY) {
            self.node_id = node_id;
        }
        if let Some(difficulty) = lookup(DIFFICULTY_KEY) {
            self.difficulty = difficulty.trim().parse().map_err(|e| {
                BlockchainError::Config(format!("{DIFFICULTY_KEY}={difficulty}: {e}"))
            })?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.difficulty == 0 || self.difficulty > MAX_DIFFICULTY {
            return Err(BlockchainError::Config(format!(
                "difficulty must be between 1 and {MAX_DIFFICULTY}, got {}",
                self.difficulty
            )));
        }
        if self.node_id.trim().is_empty() {
            return Err(BlockchainError::Config("node_id must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn blocks_path(&self) -> PathBuf {
        self.data_dir.join(format!("blocks_{}", self.node_id))
    }

    pub fn wallets_path(&self) -> PathBuf {
        match &self.wallet_file {
            Some(path) => path.clone(),
            None => self.data_dir.join(format!("wallets_{}.data", self.node_id)),
        }
    }
}

/// Process-wide settings behind a lock
pub struct Config {
    inner: RwLock<Settings>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl Config {
    pub fn new(settings: Settings) -> Config {
        Config {
            inner: RwLock::new(settings),
        }
    }

    pub fn load() -> Result<Config> {
        Ok(Config::new(Settings::load()?))
    }

    pub fn settings(&self) -> Settings {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_node_id(&self) -> String {
        self.settings().node_id
    }

    pub fn get_difficulty(&self) -> u32 {
        self.settings().difficulty
    }

    pub fn get_blocks_path(&self) -> PathBuf {
        self.settings().blocks_path()
    }

    pub fn get_wallets_path(&self) -> PathBuf {
        self.settings().wallets_path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.difficulty, 18);
        assert_eq!(settings.blocks_path(), PathBuf::from("./tmp/blocks_3000"));
        assert_eq!(
            settings.wallets_path(),
            PathBuf::from("./tmp/wallets_3000.data")
        );
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_toml_file_values() {
        let settings = Settings::from_toml_str(
            r#"
            data_dir = "/var/ledger"
            node_id = "3001"
            difficulty = 12
            wallet_file = "/etc/ledger/keys.data"
            "#,
        )
        .unwrap();
        assert_eq!(settings.blocks_path(), PathBuf::from("/var/ledger/blocks_3001"));
        assert_eq!(
            settings.wallets_path(),
            PathBuf::from("/etc/ledger/keys.data")
        );
        assert_eq!(settings.difficulty, 12);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings = Settings::from_toml_str("node_id = \"4000\"").unwrap();
        assert_eq!(settings.node_id, "4000");
        assert_eq!(settings.difficulty, 18);
        assert_eq!(settings.data_dir, PathBuf::from("./tmp"));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        assert!(matches!(
            Settings::from_toml_str("difficulty = \"high\""),
            Err(BlockchainError::Config(_))
        ));
        assert!(matches!(
            Settings::from_toml_str("difficulty = 0"),
            Err(BlockchainError::Config(_))
        ));
        assert!(matches!(
            Settings::from_toml_str("unknown_key = 1"),
            Err(BlockchainError::Config(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("DATA_DIR", "/data"),
            ("NODE_ID", "3002"),
            ("POW_DIFFICULTY", "20"),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        settings
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(settings.blocks_path(), PathBuf::from("/data/blocks_3002"));
        assert_eq!(settings.difficulty, 20);

        let mut settings = Settings::default();
        let result = settings.apply_overrides(|key| {
            (key == "POW_DIFFICULTY").then(|| "300".to_string())
        });
        assert!(matches!(result, Err(BlockchainError::Config(_))));
    }

    #[test]
    fn test_config_reads_settings() {
        let config = Config::new(Settings {
            node_id: "3005".to_string(),
            ..Settings::default()
        });
        assert_eq!(config.get_node_id(), "3005");
        assert_eq!(config.get_difficulty(), 18);
        assert_eq!(config.get_blocks_path(), PathBuf::from("./tmp/blocks_3005"));
    }
}
