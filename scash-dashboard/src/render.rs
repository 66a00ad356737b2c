//! Terminal rendering.
//!
//! The `*_section` functions turn session state into text and are pure;
//! [`TerminalRenderer`] puts the result on screen. Nothing here decides
//! what to show, only how.

use colored::Colorize;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use crate::session::{DashboardSession, SetupPhase};
use crate::setup::{Catalog, PoolChoice, SetupForm};
use crate::view::{
    self, Badge, DashboardView, HashrateChart, SERIES_HASHRATE, SERIES_SMOOTHED, ViewMode,
};

/// Draws the session after every change.
pub trait Render {
    fn render(&mut self, session: &DashboardSession);
}

/// Widest sparkline, in points.
const SPARK_WIDTH: usize = 60;

const SPARK_LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Hint line for the interactive dashboard.
const DASHBOARD_KEYS: &str = "命令: r 刷新  s 启动  x 停止  reset 重置配置  q 退出";

const SETUP_KEYS: &str = "命令: coin <币种>  impl <实现>  wallet <地址>  pool <地址|custom>  \
                          custom <地址>  bin <路径>  threads <数量>  save 保存  q 退出";

/// The local UTC offset, or UTC when it cannot be determined.
///
/// Must be called before any other thread is spawned; on Unix the offset
/// cannot be read safely afterwards.
pub fn local_offset() -> UtcOffset {
    UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC)
}

/// `YYYY-MM-DD HH:MM:SS` in `offset` for an epoch-milliseconds value.
pub fn format_timestamp(epoch_ms: f64, offset: UtcOffset) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let nanos = (epoch_ms * 1_000_000.0) as i128;
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()
        .and_then(|t| t.to_offset(offset).format(&format).ok())
        .unwrap_or_else(|| view::PLACEHOLDER.to_owned())
}

fn field(out: &mut String, label: &str, value: &str) {
    out.push_str(&format!("  {:<10}{}\n", label, value));
}

/// Miner fields, badge first.
pub fn dashboard_section(view: &DashboardView) -> String {
    let badge = match view.badge {
        Badge::On => format!("● {}", view.status_text).green().bold(),
        Badge::Off => format!("○ {}", view.status_text).red().bold(),
    };

    let mut out = format!("{} {}\n", "SCASH Miner".bold().cyan(), badge);
    field(&mut out, "币种", &view.coin);
    field(&mut out, "实现", &view.impl_name);
    field(&mut out, "钱包", &view.wallet);
    field(&mut out, "矿池", &view.pool_url);
    field(&mut out, "线程数", &view.threads);
    field(&mut out, "程序路径", &view.bin_path);
    field(&mut out, "算法", &view.algorithm);
    field(&mut out, "重启次数", &view.restart_count);
    field(&mut out, "重启延迟", &view.restart_delay);
    field(&mut out, "当前算力", &view.hashrate);
    field(&mut out, "平均算力", &view.hashrate_avg);
    field(&mut out, "平滑算力", &view.hashrate_ewma);
    field(&mut out, "H/s", &view.hashrate_hs);
    field(&mut out, "最近提交", &view.last_submit);
    out
}

/// The draft form with the choices it can take.
pub fn setup_section(form: &SetupForm, catalog: &Catalog, phase: SetupPhase) -> String {
    let mut out = format!("{}\n", "首次配置".bold().cyan());

    let coins: Vec<&str> = catalog.coins.iter().map(|c| c.value.as_str()).collect();
    field(
        &mut out,
        "币种",
        &format!("{}  (可选: {})", form.coin, coins.join(", ")),
    );

    let impls: Vec<&str> = catalog
        .impls_for(&form.coin)
        .map(|i| i.value.as_str())
        .collect();
    field(
        &mut out,
        "实现",
        &format!("{}  (可选: {})", form.impl_name, impls.join(", ")),
    );

    let wallet = if form.wallet.trim().is_empty() {
        "(未填写)".dimmed().to_string()
    } else {
        form.wallet.clone()
    };
    field(&mut out, "钱包地址", &wallet);

    let pool = match &form.pool {
        PoolChoice::Preset(value) => match catalog.pool(value) {
            Some(preset) => format!("{} ({})", preset.label, preset.value),
            None => value.clone(),
        },
        PoolChoice::Custom if form.pool_custom.trim().is_empty() => {
            "自定义: (未填写)".to_owned()
        }
        PoolChoice::Custom => format!("自定义: {}", form.pool_custom.trim()),
    };
    field(&mut out, "矿池", &pool);

    let bin_path = if form.bin_path.trim().is_empty() {
        "(默认)"
    } else {
        form.bin_path.trim()
    };
    field(&mut out, "程序路径", bin_path);

    let threads = if form.threads_raw.trim().is_empty() {
        "(自动)"
    } else {
        form.threads_raw.trim()
    };
    field(&mut out, "线程数", threads);

    if phase == SetupPhase::Submitting {
        field(&mut out, "状态", &"提交中...".yellow().to_string());
    }
    out
}

/// Last `lines` lines of the miner log.
pub fn log_section(text: &str, lines: usize) -> String {
    let mut out = format!("{}\n", "最近日志".bold().cyan());
    let tail = view::log_tail(text, lines);
    if tail.is_empty() {
        out.push_str(&format!("  {}\n", "(暂无日志)".dimmed()));
    } else {
        for line in tail.lines() {
            out.push_str("  ");
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

fn sparkline(values: &[f64], min: f64, max: f64) -> String {
    let span = max - min;
    values
        .iter()
        .map(|v| {
            if span <= 0.0 || !v.is_finite() {
                return SPARK_LEVELS[0];
            }
            let level = ((v - min) / span * (SPARK_LEVELS.len() - 1) as f64).round() as usize;
            SPARK_LEVELS[level.min(SPARK_LEVELS.len() - 1)]
        })
        .collect()
}

/// Both hashrate series as sparklines over a shared scale.
pub fn chart_section(chart: &HashrateChart, offset: UtcOffset) -> String {
    let mut out = format!("{}\n", "算力曲线".bold().cyan());
    if chart.is_empty() {
        out.push_str(&format!("  {}\n", "(暂无算力数据)".dimmed()));
        return out;
    }

    let skip = chart.hashrate.len().saturating_sub(SPARK_WIDTH);
    let hashrate: Vec<f64> = chart.hashrate.iter().skip(skip).map(|p| p[1]).collect();
    let smoothed: Vec<f64> = chart.smoothed.iter().skip(skip).map(|p| p[1]).collect();

    let finite = hashrate.iter().chain(&smoothed).copied().filter(|v| v.is_finite());
    let (min, max) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    let (min, max) = if min.is_finite() { (min, max) } else { (0.0, 0.0) };

    let first = chart.hashrate[skip][0];
    let last = chart.hashrate[chart.hashrate.len() - 1][0];
    out.push_str(&format!(
        "  {} ~ {}  ({} 点)\n",
        format_timestamp(first, offset),
        format_timestamp(last, offset),
        chart.hashrate.len()
    ));
    out.push_str(&format!(
        "  {:<14}{}  {}\n",
        SERIES_HASHRATE,
        sparkline(&hashrate, min, max).green(),
        hashrate.last().map_or_else(String::new, |v| view::format_hashrate(*v))
    ));
    out.push_str(&format!(
        "  {:<14}{}  {}\n",
        SERIES_SMOOTHED,
        sparkline(&smoothed, min, max).blue(),
        smoothed.last().map_or_else(String::new, |v| view::format_hashrate(*v))
    ));
    out.push_str(&format!(
        "  {:<14}{} ~ {}\n",
        "范围",
        view::format_hashrate(min),
        view::format_hashrate(max)
    ));
    out
}

fn message_line(out: &mut String, message: Option<&str>) {
    if let Some(text) = message {
        out.push_str(&format!("\n  {} {}\n", "»".yellow(), text));
    }
}

/// One full screen for the current mode.
pub fn screen(session: &DashboardSession, log_tail_lines: usize, offset: UtcOffset) -> String {
    let mut out = String::new();
    match session.mode() {
        None => {
            out.push_str(&format!("{}\n", "正在获取状态...".dimmed()));
            message_line(&mut out, session.dash_msg());
        }
        Some(ViewMode::Setup) => {
            out.push_str(&setup_section(
                session.form(),
                session.catalog(),
                session.phase(),
            ));
            message_line(&mut out, session.setup_msg());
            out.push_str(&format!("\n{}\n", SETUP_KEYS.dimmed()));
        }
        Some(ViewMode::Dashboard) => {
            out.push_str(&dashboard_section(session.dashboard()));
            message_line(&mut out, session.dash_msg());
            out.push('\n');
            out.push_str(&chart_section(session.chart(), offset));
            out.push('\n');
            out.push_str(&log_section(session.logs(), log_tail_lines));
            out.push_str(&format!("\n{}\n", DASHBOARD_KEYS.dimmed()));
        }
    }
    out
}

/// Redraws the whole terminal, skipping frames identical to the last.
pub struct TerminalRenderer {
    log_tail_lines: usize,
    offset: UtcOffset,
    last_frame: Option<String>,
}

impl TerminalRenderer {
    pub fn new(log_tail_lines: usize, offset: UtcOffset) -> Self {
        Self {
            log_tail_lines,
            offset,
            last_frame: None,
        }
    }
}

impl Render for TerminalRenderer {
    fn render(&mut self, session: &DashboardSession) {
        let frame = screen(session, self.log_tail_lines, self.offset);
        if self.last_frame.as_deref() == Some(frame.as_str()) {
            return;
        }
        // Clear screen, cursor home.
        print!("\x1b[2J\x1b[H{frame}");
        self.last_frame = Some(frame);
    }
}

#[cfg(test)]
mod tests {
    use time::macros::offset;

    use super::*;
    use crate::api_client::types::{HashratePoint, MinerStatus};

    #[test]
    fn timestamps_follow_offset() {
        // 2025-12-01 03:36:55 UTC
        let ms = 1_764_560_215_000.0;
        assert_eq!(format_timestamp(ms, UtcOffset::UTC), "2025-12-01 03:36:55");
        assert_eq!(format_timestamp(ms, offset!(+8)), "2025-12-01 11:36:55");
    }

    #[test]
    fn dashboard_lists_every_field() {
        let view = DashboardView::from_status(&MinerStatus {
            running: true,
            wallet: Some("scash1qwallet".into()),
            pool_url: Some("stratum+tcp://pool.scash.pro:8888".into()),
            ..Default::default()
        });
        let text = dashboard_section(&view);

        assert!(text.contains("正在运行"));
        assert!(text.contains("scash1qwallet"));
        assert!(text.contains("stratum+tcp://pool.scash.pro:8888"));
        assert!(text.contains("未知"));
    }

    #[test]
    fn setup_shows_custom_pool_and_defaults() {
        let catalog = Catalog::default();
        let mut form = SetupForm::new(&catalog);
        form.select_pool(&catalog, "stratum+tcp://my.pool:3333");

        let text = setup_section(&form, &catalog, SetupPhase::Idle);

        assert!(text.contains("自定义: stratum+tcp://my.pool:3333"));
        assert!(text.contains("(自动)"));
        assert!(text.contains("cpuminer, srbminer"));
    }

    #[test]
    fn log_section_keeps_tail() {
        let text = log_section("one\ntwo\nthree\n", 2);
        assert!(!text.contains("one"));
        assert!(text.contains("two"));
        assert!(text.contains("three"));
    }

    #[test]
    fn chart_section_reports_range_and_latest() {
        let points: Vec<_> = (0..5)
            .map(|i| HashratePoint {
                ts: 1_764_560_215 + i * 10,
                hs: 1_000.0 + i as f64 * 500.0,
                ewma_hs: 1_000.0 + i as f64 * 250.0,
            })
            .collect();
        let chart = HashrateChart::from_points(&points);
        let text = chart_section(&chart, UtcOffset::UTC);

        assert!(text.contains("2025-12-01 03:36:55 ~ 2025-12-01 03:37:35"));
        assert!(text.contains("(5 点)"));
        assert!(text.contains("3.00 kH/s"));
        assert!(text.contains("1.00 kH/s ~ 3.00 kH/s"));
    }

    #[test]
    fn empty_chart_says_so() {
        let text = chart_section(&HashrateChart::default(), UtcOffset::UTC);
        assert!(text.contains("暂无算力数据"));
    }

    #[test]
    fn flat_series_does_not_divide_by_zero() {
        assert_eq!(sparkline(&[5.0, 5.0, 5.0], 5.0, 5.0), "▁▁▁");
        assert_eq!(sparkline(&[0.0, 7.0], 0.0, 7.0), "▁█");
    }

    #[test]
    fn screen_follows_mode() {
        let mut session = DashboardSession::new(Catalog::default());
        assert!(screen(&session, 10, UtcOffset::UTC).contains("正在获取状态"));

        session.apply_status(MinerStatus {
            needs_setup: true,
            ..Default::default()
        });
        assert!(screen(&session, 10, UtcOffset::UTC).contains("首次配置"));

        session.apply_status(MinerStatus::default());
        let text = screen(&session, 10, UtcOffset::UTC);
        assert!(text.contains("SCASH Miner"));
        assert!(text.contains("已停止"));
    }
}
