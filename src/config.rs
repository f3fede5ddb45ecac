//! Configuration for the Telegram session, harvesting policy and identity store
//!
//! Loads configuration from config.yml file

use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Default constants (fallback if config.yml not found)
pub const SESSION_NAME: &str = "telegram_session";
pub const LOCK_FILE: &str = "telegram_session.lock";
pub const DEFAULT_CHAT_LIMIT: usize = 1000;
pub const LARGE_GROUP_THRESHOLD: i32 = 10_000;
pub const MEMBER_PAGE_SIZE: i32 = 200;
pub const DEFAULT_PACE_SECONDS: u64 = 1;
/// Pacing between member windows can't be switched off.
pub const MIN_PACE_SECONDS: u64 = 1;
pub const DEFAULT_DB_DRIVER: &str = "mysql";

/// Title prefix of the chats that are recorded but never harvested.
pub const DISTINGUISHED_TITLE_PREFIX: &str = "唯美和美食不可辜负-";

/// YAML config structures
#[derive(Debug, Deserialize)]
struct YamlConfig {
    telegram: Option<TelegramConfig>,
    harvest: Option<HarvestConfig>,
    database: Option<DatabaseConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct TelegramConfig {
    #[serde(default, deserialize_with = "deserialize_string_or_number")]
    api_id: Option<String>,
    api_hash: Option<String>,
    phone: Option<String>,
    session_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct HarvestConfig {
    chat_limit: Option<usize>,
    large_group_threshold: Option<i32>,
    member_page_size: Option<i32>,
    marker_prefix: Option<String>,
    pace_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabaseConfig {
    driver: Option<String>,
    connection: Option<String>,
}

/// Deserialize a value that can be either a string or a number
fn deserialize_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value: Option<serde_yaml::Value> = Option::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(serde_yaml::Value::String(s)) => Ok(Some(s)),
        Some(serde_yaml::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected string or number, got {:?}",
            other
        ))),
    }
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    pub phone: String,
    pub api_id: i32,
    pub api_hash: String,
    pub session_name: String,
    pub lock_file: String,
    pub chat_limit: usize,
    pub large_group_threshold: i32,
    pub member_page_size: i32,
    pub marker_prefix: String,
    pub pace_seconds: u64,
    pub db_driver: String,
    pub db_connection: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Load configuration from config.yml or use defaults
    /// Environment variables take precedence over config.yml values
    pub fn new() -> Self {
        Self::load_from_file("config.yml")
            .or_else(|_| Self::load_from_file("../config.yml"))
            .unwrap_or_else(|_| Self::from_env())
    }

    /// Resolve a value: prefer env var if config value looks like ${VAR}
    fn resolve_env_string(value: Option<String>, env_key: &str) -> String {
        if let Some(ref v) = value {
            if let Some(var_name) = placeholder(v) {
                if let Ok(env_val) = std::env::var(var_name) {
                    return env_val;
                }
            }
        }
        if let Ok(env_val) = std::env::var(env_key) {
            return env_val;
        }
        value.filter(|v| placeholder(v).is_none()).unwrap_or_default()
    }

    /// Resolve an integer value from string config or env var
    fn resolve_env_i32(value: Option<String>, env_key: &str) -> i32 {
        if let Some(ref v) = value {
            if let Some(var_name) = placeholder(v) {
                if let Some(parsed) = std::env::var(var_name)
                    .ok()
                    .and_then(|s| s.parse::<i32>().ok())
                {
                    return parsed;
                }
            }
            // Literal numbers in YAML win over the environment
            if let Ok(parsed) = v.parse::<i32>() {
                return parsed;
            }
        }
        std::env::var(env_key)
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(0)
    }

    /// Load .env file into environment variables using dotenvy
    fn load_dotenv() {
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_filename("../.env");
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        Self::load_dotenv();

        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let yaml: YamlConfig = serde_yaml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file: {}", e))?;

        Ok(Self::from_yaml(yaml))
    }

    /// Configuration built from the environment alone
    pub fn from_env() -> Self {
        Self::load_dotenv();
        Self::from_yaml(YamlConfig {
            telegram: None,
            harvest: None,
            database: None,
        })
    }

    fn from_yaml(yaml: YamlConfig) -> Self {
        let telegram = yaml.telegram.unwrap_or_default();
        let harvest = yaml.harvest.unwrap_or_default();
        let database = yaml.database.unwrap_or_default();

        let db_driver = Self::resolve_env_string(database.driver, "HARVEST_DB_DRIVER");

        Self {
            phone: Self::resolve_env_string(telegram.phone, "TELEGRAM_PHONE"),
            api_id: Self::resolve_env_i32(telegram.api_id, "TELEGRAM_API_ID"),
            api_hash: Self::resolve_env_string(telegram.api_hash, "TELEGRAM_API_HASH"),
            session_name: telegram
                .session_name
                .unwrap_or_else(|| SESSION_NAME.to_string()),
            lock_file: LOCK_FILE.to_string(),
            chat_limit: harvest.chat_limit.unwrap_or(DEFAULT_CHAT_LIMIT),
            large_group_threshold: harvest
                .large_group_threshold
                .unwrap_or(LARGE_GROUP_THRESHOLD),
            member_page_size: harvest
                .member_page_size
                .filter(|size| *size > 0)
                .unwrap_or(MEMBER_PAGE_SIZE),
            marker_prefix: harvest
                .marker_prefix
                .unwrap_or_else(|| DISTINGUISHED_TITLE_PREFIX.to_string()),
            pace_seconds: harvest
                .pace_seconds
                .unwrap_or(DEFAULT_PACE_SECONDS)
                .max(MIN_PACE_SECONDS),
            db_driver: if db_driver.is_empty() {
                DEFAULT_DB_DRIVER.to_string()
            } else {
                db_driver
            },
            db_connection: Self::resolve_env_string(database.connection, "HARVEST_DB_CONNECTION"),
        }
    }

    /// Session file path derived from the session name
    pub fn session_file(&self) -> String {
        format!("{}.session", self.session_name)
    }

    /// Built-in defaults, ignoring files and the environment
    pub fn with_defaults() -> Self {
        Self {
            phone: String::new(),
            api_id: 0,
            api_hash: String::new(),
            session_name: SESSION_NAME.to_string(),
            lock_file: LOCK_FILE.to_string(),
            chat_limit: DEFAULT_CHAT_LIMIT,
            large_group_threshold: LARGE_GROUP_THRESHOLD,
            member_page_size: MEMBER_PAGE_SIZE,
            marker_prefix: DISTINGUISHED_TITLE_PREFIX.to_string(),
            pace_seconds: DEFAULT_PACE_SECONDS,
            db_driver: DEFAULT_DB_DRIVER.to_string(),
            db_connection: String::new(),
        }
    }
}

/// Extract `VAR` from a `${VAR}` placeholder
fn placeholder(value: &str) -> Option<&str> {
    value
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
}
