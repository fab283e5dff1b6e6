//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Largest magnitude accepted for either end of the craving scale.
pub const CRAVING_SCALE_LIMIT: i32 = 1000;

/// Longest work bout accepted as the repetition estimate (one day).
pub const MAX_ASSUMED_BOUT_SECONDS: u64 = 24 * 60 * 60;

/// Unit used by a stored duration field.
///
/// Seed data mixes minutes and seconds for the same kind of field, so every
/// record may state its unit explicitly. Inside the engine everything is seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationUnit {
    #[default]
    Seconds,
    Minutes,
}

impl DurationUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            DurationUnit::Seconds => "seconds",
            DurationUnit::Minutes => "minutes",
        }
    }

    /// Convert a stored value into whole seconds.
    pub fn to_seconds(&self, value: u64) -> Option<u64> {
        match self {
            DurationUnit::Seconds => Some(value),
            DurationUnit::Minutes => value.checked_mul(60),
        }
    }
}

/// Tunables shared by every runner created from one host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Lowest accepted craving rating.
    pub craving_scale_min: i32,
    /// Highest accepted craving rating.
    pub craving_scale_max: i32,
    /// Paused time after which an instance is abandoned. `None` disables it.
    pub pause_timeout_seconds: Option<u64>,
    /// How far a routine may overrun its budget before constituents are skipped.
    pub routine_budget_slack_seconds: u64,
    /// Work-bout length assumed when estimating repetition elements.
    pub assumed_bout_seconds: u64,
    /// Unit applied to records that do not name one.
    pub default_duration_unit: DurationUnit,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            craving_scale_min: 0,
            craving_scale_max: 10,
            pause_timeout_seconds: Some(30 * 60),
            routine_budget_slack_seconds: 0,
            assumed_bout_seconds: 30,
            default_duration_unit: DurationUnit::Seconds,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document (missing keys take defaults) and validate it.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(raw).map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.craving_scale_min >= self.craving_scale_max {
            return Err(EngineError::InvalidConfig(format!(
                "craving scale {}..={} is empty",
                self.craving_scale_min, self.craving_scale_max
            )));
        }
        let limit = -CRAVING_SCALE_LIMIT..=CRAVING_SCALE_LIMIT;
        if !limit.contains(&self.craving_scale_min) || !limit.contains(&self.craving_scale_max) {
            return Err(EngineError::InvalidConfig(format!(
                "craving scale {}..={} exceeds ±{}",
                self.craving_scale_min, self.craving_scale_max, CRAVING_SCALE_LIMIT
            )));
        }
        if self.assumed_bout_seconds > MAX_ASSUMED_BOUT_SECONDS {
            return Err(EngineError::InvalidConfig(format!(
                "assumed bout of {}s exceeds {}s",
                self.assumed_bout_seconds, MAX_ASSUMED_BOUT_SECONDS
            )));
        }
        if self.pause_timeout_seconds == Some(0) {
            return Err(EngineError::InvalidConfig(
                "pause timeout must be positive when set".into(),
            ));
        }
        Ok(())
    }

    /// Check a craving rating against the configured scale.
    pub fn check_craving(&self, value: i32) -> Result<i32> {
        if (self.craving_scale_min..=self.craving_scale_max).contains(&value) {
            Ok(value)
        } else {
            Err(EngineError::RatingOutOfRange {
                value,
                min: self.craving_scale_min,
                max: self.craving_scale_max,
            })
        }
    }

    pub fn pause_timeout_ms(&self) -> Option<u64> {
        self.pause_timeout_seconds.map(|s| s.saturating_mul(1000))
    }
}
