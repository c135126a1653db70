/*!
 * Data kinds fetched from the upstream and their refresh policy
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use lumen_core_resilience::FetchRequest;

/// Independently fetched and cached payload kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    CurrentConditions,
    Forecast,
}

impl DataKind {
    pub const ALL: [DataKind; 2] = [DataKind::CurrentConditions, DataKind::Forecast];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::CurrentConditions => "current",
            DataKind::Forecast => "forecast",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request shape and refresh policy for one data kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataKindConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Path joined onto `api.base_url`
    pub endpoint: String,

    /// Extra query parameters
    #[serde(default)]
    pub params: BTreeMap<String, String>,

    /// Skip fetching while the cached value is younger than this
    #[serde(default)]
    pub refresh_after_secs: u64,

    /// Cached values older than this are no longer fresh
    pub max_age_secs: u64,

    /// Retries after the first attempt
    pub max_retries: u32,
}

fn default_true() -> bool {
    true
}

impl DataKindConfig {
    pub fn current_defaults() -> Self {
        Self {
            enabled: true,
            endpoint: "currentconditions/v1/349727".to_string(),
            params: BTreeMap::from([("details".to_string(), "true".to_string())]),
            refresh_after_secs: 0,
            max_age_secs: 900,
            max_retries: 2,
        }
    }

    pub fn forecast_defaults() -> Self {
        Self {
            enabled: true,
            endpoint: "forecasts/v1/hourly/12hour/349727".to_string(),
            params: BTreeMap::from([("metric".to_string(), "true".to_string())]),
            refresh_after_secs: 900,
            max_age_secs: 2700,
            max_retries: 1,
        }
    }

    pub fn refresh_after(&self) -> Duration {
        Duration::from_secs(self.refresh_after_secs)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    /// Build the upstream request for `kind`
    pub fn request(&self, kind: DataKind) -> FetchRequest {
        self.params
            .iter()
            .fold(FetchRequest::new(kind.as_str(), &self.endpoint), |req, (k, v)| {
                req.param(k, v)
            })
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.endpoint.trim().is_empty() {
            return Err("endpoint must not be empty".to_string());
        }
        if self.endpoint.contains("://") {
            return Err(format!(
                "endpoint '{}' must be relative to api.base_url",
                self.endpoint
            ));
        }
        if self.max_age_secs == 0 {
            return Err("max_age_secs must be greater than 0".to_string());
        }
        if self.refresh_after_secs > self.max_age_secs {
            return Err(format!(
                "refresh_after_secs ({}) must not exceed max_age_secs ({})",
                self.refresh_after_secs, self.max_age_secs
            ));
        }
        Ok(())
    }
}
