//! The dashboard session: the one owner of everything on screen.
//!
//! Built once at startup and passed explicitly to the synchronizer, the
//! command dispatcher and the renderer. Only [`DashboardSession::apply`]
//! writes backend data into it; commands touch the messages, the draft
//! form and, after a reset, the view mode.

use tokio::time::Instant;

use crate::api_client::Reply;
use crate::api_client::types::MinerStatus;
use crate::setup::{Catalog, SetupForm};
use crate::sync::{FetchResult, Fetched, Generation, Resource};
use crate::tracing::prelude::*;
use crate::view::{DashboardView, HashrateChart, ViewMode};

pub const STATUS_FAILED: &str = "获取状态失败";

/// Where the setup form is in its save cycle.
///
/// ```text
/// Idle --save--> Validating --invalid--> Idle
///                Validating --valid----> Submitting --reply--> Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetupPhase {
    #[default]
    Idle,
    Validating,
    Submitting,
}

/// Who put a message on the dashboard line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeSource {
    /// A user command. Stays until replaced or expired.
    Command,
    /// A failed status poll. Cleared by the next good status.
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub text: String,
    pub source: NoticeSource,
    pub expires_at: Option<Instant>,
}

/// Newest generation applied per resource.
#[derive(Debug, Default)]
struct Applied {
    status: Option<Generation>,
    logs: Option<Generation>,
    history: Option<Generation>,
}

impl Applied {
    fn slot(&mut self, resource: Resource) -> &mut Option<Generation> {
        match resource {
            Resource::Status => &mut self.status,
            Resource::Logs => &mut self.logs,
            Resource::History => &mut self.history,
        }
    }
}

#[derive(Debug)]
pub struct DashboardSession {
    catalog: Catalog,
    form: SetupForm,
    phase: SetupPhase,
    /// `None` until the first status arrives.
    mode: Option<ViewMode>,
    dashboard: DashboardView,
    logs: String,
    chart: HashrateChart,
    setup_msg: Option<String>,
    dash_msg: Option<Notice>,
    applied: Applied,
}

impl DashboardSession {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            form: SetupForm::new(&catalog),
            catalog,
            phase: SetupPhase::Idle,
            mode: None,
            dashboard: DashboardView::default(),
            logs: String::new(),
            chart: HashrateChart::default(),
            setup_msg: None,
            dash_msg: None,
            applied: Applied::default(),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn form(&self) -> &SetupForm {
        &self.form
    }

    /// Borrow the form together with the catalog it draws choices from.
    pub fn form_and_catalog(&mut self) -> (&mut SetupForm, &Catalog) {
        (&mut self.form, &self.catalog)
    }

    /// Throw away the draft and restore default selections.
    pub fn reset_form(&mut self) {
        self.form = SetupForm::new(&self.catalog);
    }

    pub fn phase(&self) -> SetupPhase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: SetupPhase) {
        if phase != self.phase {
            trace!(from = ?self.phase, to = ?phase, "Setup phase");
            self.phase = phase;
        }
    }

    pub fn mode(&self) -> Option<ViewMode> {
        self.mode
    }

    /// Show the setup screen until the next status says otherwise.
    pub fn force_setup(&mut self) {
        self.mode = Some(ViewMode::Setup);
    }

    pub fn dashboard(&self) -> &DashboardView {
        &self.dashboard
    }

    pub fn logs(&self) -> &str {
        &self.logs
    }

    pub fn chart(&self) -> &HashrateChart {
        &self.chart
    }

    pub fn setup_msg(&self) -> Option<&str> {
        self.setup_msg.as_deref()
    }

    pub fn set_setup_msg(&mut self, text: impl Into<String>) {
        self.setup_msg = Some(text.into());
    }

    pub fn clear_setup_msg(&mut self) {
        self.setup_msg = None;
    }

    pub fn dash_msg(&self) -> Option<&str> {
        self.dash_msg.as_ref().map(|n| n.text.as_str())
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.dash_msg.as_ref()
    }

    /// Put a message on the dashboard line until something replaces it.
    pub fn set_dash_msg(&mut self, text: impl Into<String>) {
        self.post_notice(text.into(), NoticeSource::Command, None);
    }

    /// Put a message on the dashboard line that clears itself at
    /// `expires_at`, unless a newer message replaced it first.
    pub fn flash_dash_msg(&mut self, text: impl Into<String>, expires_at: Instant) {
        self.post_notice(text.into(), NoticeSource::Command, Some(expires_at));
    }

    pub fn clear_dash_msg(&mut self) {
        self.dash_msg = None;
    }

    fn post_notice(&mut self, text: String, source: NoticeSource, expires_at: Option<Instant>) {
        self.dash_msg = Some(Notice {
            text,
            source,
            expires_at,
        });
    }

    /// Earliest pending expiry, for the event loop's timer.
    pub fn next_notice_expiry(&self) -> Option<Instant> {
        self.dash_msg.as_ref().and_then(|n| n.expires_at)
    }

    /// Drop the dashboard message if it has expired. Returns whether
    /// anything changed.
    pub fn expire_notices(&mut self, now: Instant) -> bool {
        let expired = self.next_notice_expiry().is_some_and(|at| at <= now);
        if expired {
            self.dash_msg = None;
        }
        expired
    }

    /// Apply one fetch result.
    ///
    /// Returns false when the result was discarded because a newer one
    /// for the same resource is already shown. Failures never change
    /// displayed data; they only log and, for status, post a message.
    pub fn apply(&mut self, fetched: Fetched) -> bool {
        let Fetched { generation, result } = fetched;
        let resource = result.resource();

        if let Some(shown) = *self.applied.slot(resource) {
            if generation < shown {
                debug!(%resource, ?generation, ?shown, "Discarding stale result");
                return false;
            }
        }

        let applied = match result {
            FetchResult::Status(result) => self.apply_status_result(result),
            FetchResult::Logs(Ok(Reply::Accepted(text))) => {
                self.logs = text;
                true
            }
            FetchResult::Logs(Ok(Reply::Rejected(r))) => {
                warn!(status = r.status, error = ?r.error, "Log fetch rejected");
                false
            }
            FetchResult::Logs(Err(e)) => {
                warn!(error = %e, "Log fetch failed");
                false
            }
            FetchResult::History(Ok(Reply::Accepted(points))) => {
                self.chart = HashrateChart::from_points(&points);
                true
            }
            FetchResult::History(Ok(Reply::Rejected(r))) => {
                warn!(status = r.status, error = ?r.error, "Hashrate history fetch rejected");
                false
            }
            FetchResult::History(Err(e)) => {
                warn!(error = %e, "Hashrate history fetch failed");
                false
            }
        };

        if applied {
            *self.applied.slot(resource) = Some(generation);
        }
        true
    }

    fn apply_status_result(
        &mut self,
        result: Result<Reply<MinerStatus>, crate::api_client::TransportError>,
    ) -> bool {
        match result {
            Ok(Reply::Accepted(status)) => {
                self.apply_status(status);
                true
            }
            Ok(Reply::Rejected(rejection)) => {
                let err = rejection.into_server_error(STATUS_FAILED);
                warn!(status = err.status, error = %err, "Status fetch rejected");
                self.post_notice(err.message, NoticeSource::Status, None);
                false
            }
            Err(e) => {
                warn!(error = %e, "Status fetch failed");
                self.post_notice(format!("{STATUS_FAILED}：{e}"), NoticeSource::Status, None);
                false
            }
        }
    }

    /// Replace the shown status wholesale and derive the view mode.
    pub fn apply_status(&mut self, status: MinerStatus) -> ViewMode {
        let mode = ViewMode::for_status(&status);
        if self.mode != Some(mode) {
            info!(?mode, running = status.running, "View mode");
        }

        self.mode = Some(mode);
        self.dashboard = DashboardView::from_status(&status);

        if matches!(&self.dash_msg, Some(n) if n.source == NoticeSource::Status) {
            self.dash_msg = None;
        }
        mode
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::api_client::{Rejection, TransportError};
    use crate::sync::Generations;
    use crate::view::Badge;

    fn status_update(generation: Generation, status: MinerStatus) -> Fetched {
        Fetched {
            generation,
            result: FetchResult::Status(Ok(Reply::Accepted(status))),
        }
    }

    fn running_with_wallet(wallet: &str) -> MinerStatus {
        MinerStatus {
            running: true,
            wallet: Some(wallet.into()),
            ..Default::default()
        }
    }

    #[test]
    fn starts_with_no_mode_and_placeholders() {
        let session = DashboardSession::new(Catalog::default());
        assert_eq!(session.mode(), None);
        assert_eq!(session.dashboard().wallet, "-");
        assert!(session.next_notice_expiry().is_none());
    }

    #[test]
    fn needs_setup_selects_setup_mode() {
        let mut session = DashboardSession::new(Catalog::default());
        let mode = session.apply_status(MinerStatus {
            needs_setup: true,
            running: true,
            ..Default::default()
        });
        assert_eq!(mode, ViewMode::Setup);
        assert_eq!(session.mode(), Some(ViewMode::Setup));
    }

    #[test]
    fn older_result_does_not_overwrite_newer() {
        let generations = Generations::new();
        let older = generations.next();
        let newer = generations.next();
        let mut session = DashboardSession::new(Catalog::default());

        assert!(session.apply(status_update(newer, running_with_wallet("new"))));
        assert!(!session.apply(status_update(older, running_with_wallet("old"))));

        assert_eq!(session.dashboard().wallet, "new");
    }

    #[test]
    fn stale_check_is_per_resource() {
        let generations = Generations::new();
        let older = generations.next();
        let newer = generations.next();
        let mut session = DashboardSession::new(Catalog::default());

        session.apply(status_update(newer, running_with_wallet("abc")));
        assert!(session.apply(Fetched {
            generation: older,
            result: FetchResult::Logs(Ok(Reply::Accepted("line".into()))),
        }));
        assert_eq!(session.logs(), "line");
    }

    #[test]
    fn failed_newer_fetch_does_not_block_older_success() {
        let generations = Generations::new();
        let older = generations.next();
        let newer = generations.next();
        let mut session = DashboardSession::new(Catalog::default());

        session.apply(Fetched {
            generation: newer,
            result: FetchResult::Logs(Err(TransportError::UnexpectedBody {
                path: "/api/logs".into(),
                status: 502,
                raw: "<html/>".into(),
            })),
        });
        session.apply(Fetched {
            generation: older,
            result: FetchResult::Logs(Ok(Reply::Accepted("still useful".into()))),
        });

        assert_eq!(session.logs(), "still useful");
    }

    #[test]
    fn rejected_status_keeps_fields_and_shows_error() {
        let generations = Generations::new();
        let mut session = DashboardSession::new(Catalog::default());
        session.apply(status_update(generations.next(), running_with_wallet("abc")));

        session.apply(Fetched {
            generation: generations.next(),
            result: FetchResult::Status(Ok(Reply::Rejected(Rejection {
                status: 500,
                error: Some("内部错误".into()),
            }))),
        });

        assert_eq!(session.dash_msg(), Some("内部错误"));
        assert_eq!(session.dashboard().wallet, "abc");
        assert_eq!(session.dashboard().badge, Badge::On);
    }

    #[test]
    fn rejected_status_without_text_uses_fallback() {
        let mut session = DashboardSession::new(Catalog::default());
        session.apply(Fetched {
            generation: Generations::new().next(),
            result: FetchResult::Status(Ok(Reply::Rejected(Rejection {
                status: 500,
                error: None,
            }))),
        });
        assert_eq!(session.dash_msg(), Some(STATUS_FAILED));
    }

    #[test]
    fn good_status_clears_status_error_but_not_command_message() {
        let generations = Generations::new();
        let mut session = DashboardSession::new(Catalog::default());

        session.apply(Fetched {
            generation: generations.next(),
            result: FetchResult::Status(Err(TransportError::UnexpectedBody {
                path: "/api/status".into(),
                status: 500,
                raw: "oops".into(),
            })),
        });
        assert!(session.dash_msg().unwrap().starts_with(STATUS_FAILED));

        session.apply(status_update(generations.next(), running_with_wallet("abc")));
        assert_eq!(session.dash_msg(), None);

        session.set_dash_msg("Miner 已停止");
        session.apply(status_update(generations.next(), running_with_wallet("abc")));
        assert_eq!(session.dash_msg(), Some("Miner 已停止"));
    }

    #[test]
    fn applying_same_status_twice_is_idempotent() {
        let generations = Generations::new();
        let mut session = DashboardSession::new(Catalog::default());
        let status = running_with_wallet("abc");

        session.apply(status_update(generations.next(), status.clone()));
        let first = session.dashboard().clone();
        session.apply(status_update(generations.next(), status));

        assert_eq!(session.dashboard(), &first);
    }

    #[test]
    fn flashed_message_expires() {
        let mut session = DashboardSession::new(Catalog::default());
        let now = Instant::now();
        session.flash_dash_msg("已刷新", now + Duration::from_millis(1500));

        assert!(!session.expire_notices(now + Duration::from_millis(1000)));
        assert_eq!(session.dash_msg(), Some("已刷新"));
        assert!(session.expire_notices(now + Duration::from_millis(1500)));
        assert_eq!(session.dash_msg(), None);
    }

    #[test]
    fn replaced_message_is_not_expired_by_old_timer() {
        let mut session = DashboardSession::new(Catalog::default());
        let now = Instant::now();
        session.flash_dash_msg("已刷新", now + Duration::from_millis(1500));
        session.set_dash_msg("正在停止 Miner...");

        assert_eq!(session.next_notice_expiry(), None);
        assert!(!session.expire_notices(now + Duration::from_secs(10)));
        assert_eq!(session.dash_msg(), Some("正在停止 Miner..."));
    }
}
