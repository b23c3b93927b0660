use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application configuration, loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ai: AiConfig,
    pub storage: StorageConfig,
    pub summary: SummaryConfig,
    pub delivery: DeliveryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ai: AiConfig::default(),
            storage: StorageConfig::default(),
            summary: SummaryConfig::default(),
            delivery: DeliveryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path
    /// (~/.config/chat-digest/config.toml), falling back to defaults if the
    /// file doesn't exist.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Write current configuration to the default path.
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;
        Ok(())
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chat-digest")
            .join("config.toml")
    }

    /// Data directory for message partitions.
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chat-digest")
    }

    /// Directory the message store writes under, honoring the override.
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("messages"))
    }
}

/// OpenAI-compatible summarization endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Base URL for the OpenAI-compatible API.
    pub api_base: String,
    /// Model name.
    pub model: String,
    /// API key; takes precedence over `api_key_env`.
    pub api_key: Option<String>,
    /// Environment variable to read the key from when `api_key` is unset.
    pub api_key_env: Option<String>,
    /// Maximum tokens to generate per summary.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Retries after a transient failure (timeouts, connection errors).
    pub max_retries: u32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            api_key: None,
            api_key_env: Some("OPENAI_API_KEY".into()),
            max_tokens: 1000,
            temperature: 0.7,
            timeout_secs: 60,
            max_retries: 2,
        }
    }
}

/// Message store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for message partitions (resolved to data_dir/messages when unset).
    pub data_dir: Option<PathBuf>,
    /// Partitions older than this many days are deleted by pruning.
    pub retention_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            retention_days: 30,
        }
    }
}

/// Daily summary schedule and windowing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Run the scheduled daily digest.
    pub daily_enabled: bool,
    /// Time of day to fire, "HH:MM" in the configured offset.
    pub daily_time: String,
    /// Fixed local offset, whole hours east of UTC.
    pub offset_hours: i32,
    /// Time-of-day windows to summarize, in report order. Empty or fully
    /// invalid lists fall back to the canonical four.
    pub windows: Vec<WindowConfig>,
    /// Newest events kept per window before summarization.
    pub max_events_per_window: usize,
    /// Pause between window summaries within one chat, seconds.
    pub inter_window_delay_secs: u64,
    /// Pause between chats in a multi-chat run, seconds.
    pub inter_chat_delay_secs: u64,
    /// Default event count for on-demand recent summaries.
    pub recent_count: usize,
    /// Default lookback for on-demand recent summaries, hours.
    pub recent_hours: i64,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            daily_enabled: true,
            daily_time: "23:59".into(),
            offset_hours: 0,
            windows: default_windows(),
            max_events_per_window: 100,
            inter_window_delay_secs: 1,
            inter_chat_delay_secs: 1,
            recent_count: 100,
            recent_hours: 24,
        }
    }
}

impl SummaryConfig {
    /// The scheduler target time. Unparsable `daily_time` values fall back
    /// to 23:59 so a config typo cannot keep the daemon from starting.
    pub fn target_time(&self) -> NaiveTime {
        parse_time_of_day(&self.daily_time).unwrap_or_else(|| {
            tracing::warn!("invalid daily_time '{}', using 23:59", self.daily_time);
            NaiveTime::from_hms_opt(23, 59, 0).unwrap()
        })
    }
}

/// One named time-of-day window, times as "HH:MM" strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    pub name: String,
    pub start: String,
    pub end: String,
}

fn default_windows() -> Vec<WindowConfig> {
    [
        ("Morning", "06:00", "12:00"),
        ("Afternoon", "12:00", "18:00"),
        ("Evening", "18:00", "23:59"),
        ("Late night", "00:00", "06:00"),
    ]
    .into_iter()
    .map(|(name, start, end)| WindowConfig {
        name: name.into(),
        start: start.into(),
        end: end.into(),
    })
    .collect()
}

/// How reports leave the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Delivery mode: "console" prints to stdout, "webhook" POSTs JSON.
    pub mode: DeliveryMode,
    /// Target URL for webhook delivery.
    pub webhook_url: Option<String>,
    /// Reports longer than this are split into multiple deliveries.
    pub max_chunk_chars: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::Console,
            webhook_url: None,
            max_chunk_chars: 4000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    Console,
    Webhook,
}

/// Parse "HH:MM" (or "HH:MM:SS") into a time of day.
pub fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("23:59"));
        assert!(toml_str.contains("Morning"));
        assert!(toml_str.contains("Late night"));
        assert!(toml_str.contains("api.openai.com"));
    }

    #[test]
    fn test_config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.ai.model, config.ai.model);
        assert_eq!(parsed.summary.windows.len(), 4);
        assert_eq!(parsed.storage.retention_days, 30);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let parsed: AppConfig = toml::from_str("[summary]\ndaily_time = \"08:00\"\n").unwrap();
        assert_eq!(parsed.summary.daily_time, "08:00");
        assert_eq!(parsed.summary.max_events_per_window, 100);
        assert_eq!(parsed.ai.timeout_secs, 60);
    }

    #[test]
    fn test_target_time_parses_and_falls_back() {
        let mut summary = SummaryConfig::default();
        assert_eq!(summary.target_time(), NaiveTime::from_hms_opt(23, 59, 0).unwrap());

        summary.daily_time = "07:30".into();
        assert_eq!(summary.target_time(), NaiveTime::from_hms_opt(7, 30, 0).unwrap());

        summary.daily_time = "quarter past nine".into();
        assert_eq!(summary.target_time(), NaiveTime::from_hms_opt(23, 59, 0).unwrap());
    }

    #[test]
    fn test_parse_time_of_day_variants() {
        assert_eq!(parse_time_of_day("06:00"), NaiveTime::from_hms_opt(6, 0, 0));
        assert_eq!(parse_time_of_day(" 18:45 "), NaiveTime::from_hms_opt(18, 45, 0));
        assert_eq!(parse_time_of_day("18:45:30"), NaiveTime::from_hms_opt(18, 45, 30));
        assert_eq!(parse_time_of_day("25:00"), None);
        assert_eq!(parse_time_of_day(""), None);
    }

    #[test]
    fn test_resolved_data_dir_honors_override() {
        let mut config = AppConfig::default();
        assert!(config.resolved_data_dir().ends_with("messages"));

        config.storage.data_dir = Some(PathBuf::from("/tmp/digest-data"));
        assert_eq!(config.resolved_data_dir(), PathBuf::from("/tmp/digest-data"));
    }
}
