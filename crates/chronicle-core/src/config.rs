//! Snapshot configuration.
//!
//! Built once when a repository or snapshot manager is set up and read-only
//! afterwards. Can be assembled from a named-option bundle or from
//! `CHRONICLE_SNAPSHOT_*` environment variables.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::snapshot::{Compression, ContentType};

/// Prefix of the environment variables read by
/// [`SnapshotConfiguration::from_env`].
pub const ENV_PREFIX: &str = "CHRONICLE_SNAPSHOT_";

/// Upper bound on `time_interval_minutes` (one year).
pub const MAX_TIME_INTERVAL_MINUTES: i64 = 525_600;

/// Which snapshot policy the engine builds from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Every `event_count_threshold` events.
    EventCount,
    /// Every `time_interval_minutes` per aggregate.
    TimeBased,
    /// Every `version_interval` versions.
    VersionBased,
    /// After every save.
    Always,
    /// Never.
    Never,
    /// Event count with a threshold lowered for slow-restoring aggregates.
    Adaptive,
    /// `event_count OR time_based`.
    Composite,
}

impl PolicyKind {
    /// Configuration name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EventCount => "event_count",
            Self::TimeBased => "time_based",
            Self::VersionBased => "version_based",
            Self::Always => "always",
            Self::Never => "never",
            Self::Adaptive => "adaptive",
            Self::Composite => "composite",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "event_count" => Ok(Self::EventCount),
            "time_based" => Ok(Self::TimeBased),
            "version_based" => Ok(Self::VersionBased),
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            "adaptive" => Ok(Self::Adaptive),
            "composite" => Ok(Self::Composite),
            other => Err(DomainError::InvalidConfiguration(format!(
                "unknown snapshot policy {other:?}"
            ))),
        }
    }
}

/// Snapshot engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotConfiguration {
    /// Master switch; when off no snapshot is created or consulted for
    /// creation decisions.
    pub enabled: bool,
    /// Policy built by the engine.
    pub default_policy: PolicyKind,
    /// Base serializer.
    pub default_serializer: ContentType,
    /// Compression wrapped around the serializer.
    pub default_compression: Compression,
    /// Threshold of the event-count and adaptive policies.
    pub event_count_threshold: i64,
    /// Interval of the time-based policy.
    pub time_interval_minutes: i64,
    /// Interval of the version-based policy.
    pub version_interval: i64,
    /// Retention limit per aggregate; 0 disables retention cleanup.
    pub max_snapshots_per_aggregate: usize,
    /// Write snapshots from a background task instead of inline.
    pub async_creation: bool,
    /// Multiplier (0, 1] applied to the adaptive threshold for slow
    /// aggregates.
    pub adaptive_factor: f64,
    /// Deadline of each background snapshot write or cleanup, in seconds.
    pub background_timeout_secs: u64,
}

impl Default for SnapshotConfiguration {
    fn default() -> Self {
        Self {
            enabled: true,
            default_policy: PolicyKind::EventCount,
            default_serializer: ContentType::Json,
            default_compression: Compression::None,
            event_count_threshold: 10,
            time_interval_minutes: 60,
            version_interval: 10,
            max_snapshots_per_aggregate: 5,
            async_creation: false,
            adaptive_factor: 0.5,
            background_timeout_secs: 30,
        }
    }
}

impl SnapshotConfiguration {
    /// Configuration with snapshotting switched off.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Deadline of background work.
    #[must_use]
    pub fn background_timeout(&self) -> Duration {
        Duration::from_secs(self.background_timeout_secs)
    }

    /// Builds a configuration from a named-option bundle, starting from the
    /// defaults. Keys are case-insensitive.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidConfiguration` for unknown keys,
    /// unparsable values, or a configuration that fails [`Self::validate`].
    pub fn from_options(options: &HashMap<String, String>) -> Result<Self, DomainError> {
        let mut config = Self::default();
        for (key, value) in options {
            let value = value.trim();
            match key.trim().to_ascii_lowercase().as_str() {
                "enabled" => config.enabled = parse_value(key, value)?,
                "policy" | "default_policy" => config.default_policy = value.parse()?,
                "serializer" | "default_serializer" => config.default_serializer = value.parse()?,
                "compression" | "default_compression" => {
                    config.default_compression = value.parse()?;
                }
                "event_count_threshold" => config.event_count_threshold = parse_value(key, value)?,
                "time_interval_minutes" => config.time_interval_minutes = parse_value(key, value)?,
                "version_interval" => config.version_interval = parse_value(key, value)?,
                "max_snapshots_per_aggregate" => {
                    config.max_snapshots_per_aggregate = parse_value(key, value)?;
                }
                "async_creation" => config.async_creation = parse_value(key, value)?,
                "adaptive_factor" => config.adaptive_factor = parse_value(key, value)?,
                "background_timeout_secs" => {
                    config.background_timeout_secs = parse_value(key, value)?;
                }
                other => {
                    return Err(DomainError::InvalidConfiguration(format!(
                        "unknown snapshot option {other:?}"
                    )));
                }
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Reads `CHRONICLE_SNAPSHOT_<OPTION>` variables from the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Same as [`Self::from_options`].
    pub fn from_env() -> Result<Self, DomainError> {
        Self::from_vars(std::env::vars())
    }

    /// Like [`Self::from_env`] but over an explicit variable list.
    ///
    /// # Errors
    ///
    /// Same as [`Self::from_options`].
    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self, DomainError> {
        let options: HashMap<String, String> = vars
            .into_iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(ENV_PREFIX)
                    .map(|option| (option.to_ascii_lowercase(), value))
            })
            .collect();
        Self::from_options(&options)
    }

    /// Rejects values no policy can work with.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidConfiguration` describing the first
    /// offending option.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.event_count_threshold <= 0 {
            return Err(DomainError::InvalidConfiguration(
                "event_count_threshold must be positive".into(),
            ));
        }
        if !(1..=MAX_TIME_INTERVAL_MINUTES).contains(&self.time_interval_minutes) {
            return Err(DomainError::InvalidConfiguration(format!(
                "time_interval_minutes must be in 1..={MAX_TIME_INTERVAL_MINUTES}, got {}",
                self.time_interval_minutes
            )));
        }
        if self.version_interval <= 0 {
            return Err(DomainError::InvalidConfiguration(
                "version_interval must be positive".into(),
            ));
        }
        if !(self.adaptive_factor > 0.0 && self.adaptive_factor <= 1.0) {
            return Err(DomainError::InvalidConfiguration(format!(
                "adaptive_factor must be in (0, 1], got {}",
                self.adaptive_factor
            )));
        }
        if self.background_timeout_secs == 0 {
            return Err(DomainError::InvalidConfiguration(
                "background_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T, DomainError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.parse().map_err(|e| {
        DomainError::InvalidConfiguration(format!("invalid value {value:?} for {key}: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(SnapshotConfiguration::default().validate().is_ok());
    }

    #[test]
    fn test_from_options_reads_every_recognised_key() {
        // Arrange
        let opts = options(&[
            ("policy", "time_based"),
            ("event_count_threshold", "25"),
            ("time_interval_minutes", "15"),
            ("serializer", "bson"),
            ("compression", "gzip"),
            ("max_snapshots_per_aggregate", "3"),
            ("async_creation", "true"),
        ]);

        // Act
        let config = SnapshotConfiguration::from_options(&opts).unwrap();

        // Assert
        assert_eq!(config.default_policy, PolicyKind::TimeBased);
        assert_eq!(config.event_count_threshold, 25);
        assert_eq!(config.time_interval_minutes, 15);
        assert_eq!(config.default_serializer, ContentType::Bson);
        assert_eq!(config.default_compression, Compression::Gzip);
        assert_eq!(config.max_snapshots_per_aggregate, 3);
        assert!(config.async_creation);
        assert!(config.enabled);
    }

    #[test]
    fn test_from_options_rejects_unknown_key() {
        let result = SnapshotConfiguration::from_options(&options(&[("colour", "blue")]));

        match result {
            Err(DomainError::InvalidConfiguration(msg)) => assert!(msg.contains("colour")),
            other => panic!("expected InvalidConfiguration, got {other:?}"),
        }
    }

    #[test]
    fn test_from_options_rejects_unparsable_value() {
        let result =
            SnapshotConfiguration::from_options(&options(&[("event_count_threshold", "ten")]));

        assert!(matches!(result, Err(DomainError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_from_options_rejects_zero_threshold() {
        let result =
            SnapshotConfiguration::from_options(&options(&[("event_count_threshold", "0")]));

        assert!(matches!(result, Err(DomainError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_from_vars_strips_prefix_and_ignores_other_variables() {
        let vars = vec![
            ("CHRONICLE_SNAPSHOT_POLICY".to_owned(), "always".to_owned()),
            ("CHRONICLE_SNAPSHOT_ENABLED".to_owned(), "false".to_owned()),
            ("PATH".to_owned(), "/usr/bin".to_owned()),
        ];

        let config = SnapshotConfiguration::from_vars(vars).unwrap();

        assert_eq!(config.default_policy, PolicyKind::Always);
        assert!(!config.enabled);
    }

    #[test]
    fn test_time_interval_beyond_one_year_is_rejected() {
        let result = SnapshotConfiguration::from_options(&options(&[(
            "time_interval_minutes",
            "9223372036854775807",
        )]));

        match result {
            Err(DomainError::InvalidConfiguration(msg)) => {
                assert!(msg.contains("time_interval_minutes"));
            }
            other => panic!("expected InvalidConfiguration, got {other:?}"),
        }
    }

    #[test]
    fn test_adaptive_factor_out_of_range_is_rejected() {
        let config = SnapshotConfiguration {
            adaptive_factor: 1.5,
            ..SnapshotConfiguration::default()
        };

        assert!(config.validate().is_err());
    }
}
