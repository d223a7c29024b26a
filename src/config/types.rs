use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub dedup: DedupConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Detection log to tail. Created empty if it does not exist.
    pub path: PathBuf,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// How long an unterminated trailing line may sit unchanged before it is
    /// treated as complete.
    #[serde(with = "humantime_serde")]
    pub flush_quiet_period: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./detections.txt"),
            poll_interval: Duration::from_millis(10),
            flush_quiet_period: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
    /// Decimal places kept when building the coordinate key.
    pub precision: usize,
    /// How often to drop cooldown entries that can no longer suppress
    /// anything. `infinite` keeps every key for the life of the process.
    #[serde(with = "duration_format")]
    pub sweep_interval: Option<Duration>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(5 * 60),
            precision: 6,
            sweep_interval: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./detections.duckdb"),
        }
    }
}

// Optional durations: "infinite" maps to None
pub(crate) mod duration_format {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_str(&format_duration(*d)),
            None => serializer.serialize_str("infinite"),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s == "infinite" {
            Ok(None)
        } else {
            parse_duration(&s)
                .map(Some)
                .map_err(serde::de::Error::custom)
        }
    }

    pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty duration string".to_string());
        }

        let (value_str, unit) = if let Some(v) = s.strip_suffix("ms") {
            (v, "ms")
        } else if let Some(v) = s.strip_suffix('s') {
            (v, "s")
        } else if let Some(v) = s.strip_suffix('m') {
            (v, "m")
        } else if let Some(v) = s.strip_suffix('h') {
            (v, "h")
        } else {
            return Err(format!("invalid duration format: {}", s));
        };

        let value: u64 = value_str
            .trim()
            .parse()
            .map_err(|_| format!("invalid numeric value: {}", value_str))?;

        let duration = match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            _ => Duration::from_secs(value * 3600),
        };

        Ok(duration)
    }

    fn format_duration(d: Duration) -> String {
        let secs = d.as_secs();
        if d.subsec_nanos() != 0 || secs == 0 {
            format!("{}ms", d.as_millis())
        } else if secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{}s", secs)
        }
    }

}
