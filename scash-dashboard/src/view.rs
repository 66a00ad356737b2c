//! Pure display state.
//!
//! Everything here is computed from the last thing the backend said, with
//! no memory of earlier polls. A field the backend leaves out renders as
//! a placeholder rather than keeping an older value, so nothing stale
//! survives a backend restart.

use strum::{Display, EnumString};

use crate::api_client::types::{HashratePoint, MinerStatus};

/// Placeholder for absent text fields.
pub const PLACEHOLDER: &str = "-";

/// Placeholder for the primary hashrate before the miner reports one.
pub const UNKNOWN: &str = "未知";

pub const RUNNING_TEXT: &str = "正在运行";
pub const STOPPED_TEXT: &str = "已停止";

/// Which of the two screens is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ViewMode {
    /// First-run wizard; the backend has no usable configuration.
    Setup,
    /// Status, logs and chart of a configured miner.
    Dashboard,
}

impl ViewMode {
    /// Mode implied by a status snapshot.
    pub fn for_status(status: &MinerStatus) -> Self {
        if status.needs_setup {
            ViewMode::Setup
        } else {
            ViewMode::Dashboard
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Badge {
    On,
    Off,
}

/// Every dashboard field, as text ready to draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardView {
    pub badge: Badge,
    pub status_text: String,
    pub coin: String,
    pub impl_name: String,
    pub wallet: String,
    pub pool_url: String,
    pub threads: String,
    pub bin_path: String,
    pub algorithm: String,
    pub restart_count: String,
    pub restart_delay: String,
    pub hashrate: String,
    pub hashrate_avg: String,
    pub hashrate_ewma: String,
    pub hashrate_hs: String,
    pub last_submit: String,
}

impl Default for DashboardView {
    /// What the dashboard shows before the first successful fetch.
    fn default() -> Self {
        Self::from_status(&MinerStatus::default())
    }
}

impl DashboardView {
    pub fn from_status(status: &MinerStatus) -> Self {
        let (badge, status_text) = if status.running {
            (Badge::On, RUNNING_TEXT)
        } else {
            (Badge::Off, STOPPED_TEXT)
        };

        Self {
            badge,
            status_text: status_text.to_owned(),
            coin: text_or(&status.coin, PLACEHOLDER),
            impl_name: text_or(&status.impl_name, PLACEHOLDER),
            wallet: text_or(&status.wallet, PLACEHOLDER),
            pool_url: text_or(&status.pool_url, PLACEHOLDER),
            threads: status
                .threads
                .map_or_else(|| PLACEHOLDER.to_owned(), |t| t.to_string()),
            bin_path: text_or(&status.bin_path, PLACEHOLDER),
            algorithm: text_or(&status.algorithm, PLACEHOLDER),
            restart_count: status.restart_count.unwrap_or(0).to_string(),
            restart_delay: status
                .restart_delay
                .map_or_else(|| PLACEHOLDER.to_owned(), format_number),
            hashrate: text_or(&status.hashrate, UNKNOWN),
            hashrate_avg: text_or(&status.hashrate_avg, PLACEHOLDER),
            hashrate_ewma: text_or(&status.hashrate_ewma, PLACEHOLDER),
            hashrate_hs: status
                .hashrate_hs
                .filter(|hs| hs.is_finite())
                .map_or_else(|| PLACEHOLDER.to_owned(), |hs| format!("{hs:.2}")),
            last_submit: text_or(&status.last_submit, PLACEHOLDER),
        }
    }
}

/// Empty strings count as missing.
fn text_or(value: &Option<String>, placeholder: &str) -> String {
    match value.as_deref() {
        Some(s) if !s.is_empty() => s.to_owned(),
        _ => placeholder.to_owned(),
    }
}

/// `5` rather than `5.0` for whole numbers.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Series label for the instantaneous hashrate.
pub const SERIES_HASHRATE: &str = "算力 H/s";

/// Series label for the smoothed hashrate.
pub const SERIES_SMOOTHED: &str = "平滑算力 H/s";

/// Chart data, in the `[epoch_ms, value]` form charting libraries take.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HashrateChart {
    pub hashrate: Vec<[f64; 2]>,
    pub smoothed: Vec<[f64; 2]>,
}

impl HashrateChart {
    pub fn from_points(points: &[HashratePoint]) -> Self {
        let ms = |p: &HashratePoint| (p.ts as f64) * 1000.0;
        Self {
            hashrate: points.iter().map(|p| [ms(p), p.hs]).collect(),
            smoothed: points.iter().map(|p| [ms(p), p.ewma_hs]).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hashrate.is_empty()
    }
}

/// Scale a hashrate to the largest sensible unit, two decimals.
pub fn format_hashrate(hs: f64) -> String {
    if hs >= 1e9 {
        format!("{:.2} GH/s", hs / 1e9)
    } else if hs >= 1e6 {
        format!("{:.2} MH/s", hs / 1e6)
    } else if hs >= 1e3 {
        format!("{:.2} kH/s", hs / 1e3)
    } else {
        format!("{hs:.2} H/s")
    }
}

/// The last `lines` lines of a log buffer; the terminal equivalent of
/// scrolling the log box to the bottom.
pub fn log_tail(text: &str, lines: usize) -> &str {
    if lines == 0 {
        return "";
    }
    let trimmed = text.trim_end_matches('\n');
    match trimmed.rmatch_indices('\n').nth(lines - 1) {
        Some((idx, _)) => &trimmed[idx + 1..],
        None => trimmed,
    }
}
