//! Serde helpers for human-readable durations in configuration.

use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};
use std::{fmt, time::Duration};

/// Duration fields that accept either whole seconds or a humantime string
pub mod duration {
    use super::*;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let duration_str = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&duration_str)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurationVisitor;

        impl<'de> Visitor<'de> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str(
                    "a duration as seconds (number) or human-readable string (e.g., '30s', '5m', '1h30m')",
                )
            }

            fn visit_u64<E>(self, seconds: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(Duration::from_secs(seconds))
            }

            // TOML and environment integers arrive signed
            fn visit_i64<E>(self, seconds: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                u64::try_from(seconds)
                    .map(Duration::from_secs)
                    .map_err(|_| de::Error::custom(format!("Duration cannot be negative: {seconds}")))
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                humantime::parse_duration(value.trim())
                    .map_err(|e| de::Error::custom(format!("Invalid duration '{value}': {e}")))
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Holder {
        #[serde(with = "super::duration")]
        delay: Duration,
    }

    #[test]
    fn test_duration_from_string() {
        let holder: Holder = toml::from_str("delay = \"5m\"").unwrap();
        assert_eq!(holder.delay, Duration::from_secs(300));

        let holder: Holder = toml::from_str("delay = \"1h 30m\"").unwrap();
        assert_eq!(holder.delay, Duration::from_secs(5400));
    }

    #[test]
    fn test_duration_from_seconds() {
        let holder: Holder = toml::from_str("delay = 90").unwrap();
        assert_eq!(holder.delay, Duration::from_secs(90));
    }

    #[test]
    fn test_negative_and_garbage_rejected() {
        assert!(toml::from_str::<Holder>("delay = -1").is_err());
        assert!(toml::from_str::<Holder>("delay = \"soon\"").is_err());
    }

    #[test]
    fn test_duration_serializes_human_readable() {
        let holder = Holder {
            delay: Duration::from_secs(300),
        };
        assert_eq!(toml::to_string(&holder).unwrap().trim(), "delay = \"5m\"");
    }
}
