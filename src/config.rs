use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Telegram bot token; the `BOT_TOKEN` environment variable wins over
    /// the config file so the secret can stay out of it.
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub allowed_chats: Vec<i64>,
    /// Chat that receives out-of-band error reports. Unset disables reporting.
    #[serde(default)]
    pub admin_chat: Option<i64>,
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
    #[serde(default = "default_cookies_dir")]
    pub cookies_dir: String,
    #[serde(default = "default_size_limit")]
    pub size_limit_bytes: u64,
    #[serde(default = "default_startup_notices")]
    pub startup_notices: bool,
    #[serde(default = "default_ytdlp_bin")]
    pub ytdlp_bin: String,
    #[serde(default = "default_ffprobe_bin")]
    pub ffprobe_bin: String,
}

fn default_work_dir() -> String {
    env::temp_dir()
        .join("clipferry")
        .to_string_lossy()
        .to_string()
}

fn default_cookies_dir() -> String {
    config_dir().join("cookies").to_string_lossy().to_string()
}

fn default_size_limit() -> u64 {
    // 49 MiB, a little under the upload ceiling for headroom
    49 * 1024 * 1024
}

fn default_startup_notices() -> bool {
    true
}

fn default_ytdlp_bin() -> String {
    "yt-dlp".to_string()
}

fn default_ffprobe_bin() -> String {
    "ffprobe".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            allowed_chats: Vec::new(),
            admin_chat: None,
            work_dir: default_work_dir(),
            cookies_dir: default_cookies_dir(),
            size_limit_bytes: default_size_limit(),
            startup_notices: default_startup_notices(),
            ytdlp_bin: default_ytdlp_bin(),
            ffprobe_bin: default_ffprobe_bin(),
        }
    }
}

fn config_dir() -> PathBuf {
    // Don't use dirs::config_dir() as it returns ~/Library/Application Support/ on macOS
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("clipferry")
}

fn config_path() -> PathBuf {
    env::var("CLIPFERRY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| config_dir().join("config.yml"))
}

fn parse_chat_ids(raw: &str) -> Result<Vec<i64>, Box<dyn std::error::Error>> {
    raw.split(',')
        .map(|id| id.trim().parse::<i64>().map_err(Into::into))
        .collect()
}

pub fn load() -> Result<Config, Box<dyn std::error::Error>> {
    let path = config_path();
    let mut config = if path.exists() {
        let contents = fs::read_to_string(&path)?;
        serde_yaml::from_str(&contents)?
    } else {
        Config::default()
    };

    if let Ok(token) = env::var("BOT_TOKEN") {
        config.bot_token = token;
    }
    if let Ok(ids) = env::var("ALLOWED_CHAT_IDS") {
        config.allowed_chats = parse_chat_ids(&ids)?;
    }
    if let Ok(id) = env::var("ADMIN_CHAT_ID") {
        config.admin_chat = Some(id.trim().parse()?);
    }

    Ok(config)
}

impl Config {
    /// Startup-time sanity check; a bot without a token or an allow-list
    /// cannot do anything useful.
    pub fn validate(&self) -> Result<(), String> {
        if self.bot_token.is_empty() {
            return Err("bot_token is not set (config file or BOT_TOKEN)".to_string());
        }
        if self.allowed_chats.is_empty() {
            return Err("allowed_chats is empty (config file or ALLOWED_CHAT_IDS)".to_string());
        }
        Ok(())
    }
}
