use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_SENTINEL: &str = "__CW_STOP__";
pub const DEFAULT_MAX_EVENTS: usize = 500;
pub const DEFAULT_MAX_BYTES: usize = 800_000;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(1500);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub path: PathBuf,
    #[serde(default = "default_sentinel")]
    pub sentinel: String,
}

fn default_sentinel() -> String {
    DEFAULT_SENTINEL.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    pub log_group: String,
    pub log_stream: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Endpoint override, e.g. a LocalStack URL.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Per-operation timeout for backend calls. Unset means the SDK default (none).
    #[serde(default, with = "duration_format::optional")]
    pub timeout: Option<Duration>,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_flush_interval", with = "duration_format")]
    pub flush_interval: Duration,
    #[serde(default = "default_poll_interval", with = "duration_format")]
    pub poll_interval: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_events: DEFAULT_MAX_EVENTS,
            max_bytes: DEFAULT_MAX_BYTES,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

fn default_max_events() -> usize {
    DEFAULT_MAX_EVENTS
}

fn default_max_bytes() -> usize {
    DEFAULT_MAX_BYTES
}

fn default_flush_interval() -> Duration {
    DEFAULT_FLUSH_INTERVAL
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

// Durations are written as "200ms", "2s", "1m" or "1h".
pub(crate) mod duration_format {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub mod optional {
        use super::{format_duration, parse_duration};
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => serializer.serialize_str(&format_duration(*d)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s = Option::<String>::deserialize(deserializer)?;
            s.map(|s| parse_duration(&s).map_err(serde::de::Error::custom))
                .transpose()
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

        let too_large = || format!("invalid numeric value: {} is out of range", value_str);
        let duration = match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60).ok_or_else(too_large)?),
            "h" => Duration::from_secs(value.checked_mul(3600).ok_or_else(too_large)?),
            _ => return Err(format!("unknown unit: {}", unit)),
        };

        Ok(duration)
    }

    fn format_duration(d: Duration) -> String {
        if d.subsec_millis() != 0 || d.as_secs() == 0 {
            return format!("{}ms", d.as_millis());
        }
        let secs = d.as_secs();
        if secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{}s", secs)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_parse_units() {
            assert_eq!(parse_duration("200ms").unwrap(), Duration::from_millis(200));
            assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
            assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
            assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        }

        #[test]
        fn test_parse_rejects_overflowing_units() {
            let err = parse_duration("99999999999999999h").unwrap_err();
            assert!(err.starts_with("invalid numeric value"));
            assert!(parse_duration("999999999999999999m").is_err());
            assert!(parse_duration("99999999999999999s").is_ok());
        }

        #[test]
        fn test_parse_rejects_garbage() {
            assert!(parse_duration("").is_err());
            assert!(parse_duration("10").is_err());
            assert!(parse_duration("1.5s").is_err());
        }

        #[test]
        fn test_format_keeps_sub_second_precision() {
            assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
            assert_eq!(format_duration(Duration::from_secs(90)), "90s");
            assert_eq!(format_duration(Duration::from_secs(120)), "2m");
        }
    }
}
