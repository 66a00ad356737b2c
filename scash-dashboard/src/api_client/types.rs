//! API data transfer objects.
//!
//! These mirror the JSON the manager backend sends and accepts. Every
//! response field is optional on the wire; missing values are turned into
//! placeholders by the view layer, not here. Status fields are read
//! leniently: a number sent as a string is accepted, and a value of the
//! wrong type reads as absent instead of failing the whole snapshot.

use serde::{Deserialize, Serialize};

/// Miner status snapshot from `GET /api/status`.
///
/// Replaced wholesale on every fetch. When `needs_setup` is true the
/// remaining fields describe no configured miner and are not shown.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MinerStatus {
    pub needs_setup: bool,
    pub running: bool,
    #[serde(deserialize_with = "lenient::text")]
    pub coin: Option<String>,
    #[serde(rename = "impl", deserialize_with = "lenient::text")]
    pub impl_name: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub wallet: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub pool_url: Option<String>,
    #[serde(deserialize_with = "lenient::int")]
    pub threads: Option<i64>,
    #[serde(deserialize_with = "lenient::text")]
    pub bin_path: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub algorithm: Option<String>,
    #[serde(deserialize_with = "lenient::count")]
    pub restart_count: Option<u64>,
    /// Watchdog restart delay in seconds.
    #[serde(deserialize_with = "lenient::float")]
    pub restart_delay: Option<f64>,
    /// Latest hashrate as printed by the miner, e.g. `"0.11 khash/s"`.
    #[serde(deserialize_with = "lenient::text")]
    pub hashrate: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub hashrate_avg: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub hashrate_ewma: Option<String>,
    /// Latest hashrate in hashes per second.
    #[serde(deserialize_with = "lenient::float")]
    pub hashrate_hs: Option<f64>,
    #[serde(deserialize_with = "lenient::text")]
    pub last_submit: Option<String>,
}

mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn whole(f: f64) -> Option<i64> {
        (f.is_finite() && f.fract() == 0.0).then_some(f as i64)
    }

    pub fn int<'de, D: Deserializer<'de>>(de: D) -> Result<Option<i64>, D::Error> {
        Ok(match Value::deserialize(de)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(whole)),
            Value::String(s) => {
                let s = s.trim();
                s.parse().ok().or_else(|| s.parse().ok().and_then(whole))
            }
            _ => None,
        })
    }

    pub fn count<'de, D: Deserializer<'de>>(de: D) -> Result<Option<u64>, D::Error> {
        Ok(int(de)?.and_then(|n| u64::try_from(n).ok()))
    }

    pub fn float<'de, D: Deserializer<'de>>(de: D) -> Result<Option<f64>, D::Error> {
        let f = match Value::deserialize(de)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        Ok(f.filter(|f: &f64| f.is_finite()))
    }

    pub fn text<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
        Ok(match Value::deserialize(de)? {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
    }
}

/// Log buffer from `GET /api/logs`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct LogSnapshot {
    #[serde(default, rename = "logs")]
    pub text: Option<String>,
}

/// One sample of the hashrate history.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct HashratePoint {
    /// Sample time, epoch seconds.
    pub ts: i64,
    /// Instantaneous hashrate in hashes per second.
    pub hs: f64,
    /// Smoothed (EWMA) hashrate in hashes per second.
    pub ewma_hs: f64,
}

/// Body of `GET /api/hashrate-history`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct HashrateHistory {
    #[serde(default)]
    pub points: Vec<HashratePoint>,
}

/// Body of `POST /api/setup`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SetupRequest {
    pub coin: String,
    #[serde(rename = "impl")]
    pub impl_name: String,
    pub wallet: String,
    pub pool_url: String,
    pub bin_path: String,
    /// Omitted when unset so the backend picks its own default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<u32>,
}

/// Reply to the control endpoints (setup, start, stop, reset).
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CommandReply {
    #[serde(default)]
    pub message: Option<String>,
}
