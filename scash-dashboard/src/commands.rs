//! Command dispatch.
//!
//! Every user command follows the same shape: validate, call the API,
//! and on success force one synchronization cycle before reporting. The
//! display never flips optimistically; a "start" only shows as running
//! once the backend's own status says so. On failure the server's text
//! is shown verbatim (or a fallback) and displayed data is left alone.
//!
//! A command is split in two: a synchronous half that validates and puts
//! up a pending message, and a network half (`execute`) that owns its
//! own client handle. [`Dashboard::handle`] awaits the network half in
//! place; [`Dashboard::run`] spawns it and keeps applying poller updates
//! until it comes back.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api_client::types::{CommandReply, SetupRequest};
use crate::api_client::{Client, Reply, TransportError};
use crate::config::DashboardConfig;
use crate::error::ServerError;
use crate::render::Render;
use crate::session::{DashboardSession, SetupPhase};
use crate::setup::ValidationError;
use crate::sync::{self, Fetched, Generations};
use crate::tracing::prelude::*;

pub const SAVING: &str = "正在保存配置并准备 Miner...";
pub const SAVED: &str = "配置已保存，Miner 正在启动...";
pub const SAVE_FAILED: &str = "保存配置失败";
pub const REFRESHING: &str = "正在刷新状态...";
pub const REFRESHED: &str = "已刷新";
pub const RESET_PROMPT: &str = "确定要清空钱包和矿池配置并停止 Miner 吗？";

/// Wake-up period of the event loop when nothing is scheduled.
const IDLE_WAKE: Duration = Duration::from_secs(3600);

/// How a command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Backend accepted; carries the message shown to the user.
    Done(String),
    /// Caught client-side; nothing was sent.
    Invalid(ValidationError),
    /// Backend answered `ok: false`.
    Rejected(ServerError),
    /// Backend unreachable or answered garbage; carries the shown text.
    Unreachable(String),
    /// Nothing was sent: the user declined a confirmation, or the same
    /// command is already waiting on the backend.
    Cancelled,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Done(_))
    }

    /// Text to show for this outcome.
    pub fn message(&self) -> String {
        match self {
            Outcome::Done(text) | Outcome::Unreachable(text) => text.clone(),
            Outcome::Invalid(err) => err.to_string(),
            Outcome::Rejected(err) => err.message.clone(),
            Outcome::Cancelled => "已取消".to_owned(),
        }
    }
}

/// Control endpoints that take an empty body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Start,
    Stop,
    Reset,
}

impl Control {
    /// Message shown while the request is outstanding.
    fn pending_text(self) -> Option<&'static str> {
        match self {
            Control::Start => Some("正在请求启动 Miner..."),
            Control::Stop => Some("正在停止 Miner..."),
            Control::Reset => None,
        }
    }

    /// Shown on success when the backend sends no message.
    fn done_text(self) -> &'static str {
        match self {
            Control::Start => "已请求启动 Miner",
            Control::Stop => "Miner 已停止",
            Control::Reset => "配置已清空",
        }
    }

    fn failed_text(self) -> &'static str {
        match self {
            Control::Start => "启动失败",
            Control::Stop => "停止失败",
            Control::Reset => "重置配置失败",
        }
    }
}

/// Something the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    Refresh,
    Start,
    Stop,
    SaveSetup,
    /// Clear the backend configuration. Only sent when `confirmed`.
    ResetConfig { confirmed: bool },
    SelectCoin(String),
    SelectImpl(String),
    SelectPool(String),
    EditPoolCustom(String),
    EditWallet(String),
    EditBinPath(String),
    EditThreads(String),
    Quit,
}

impl UserAction {
    /// Parse one line typed into the interactive dashboard.
    ///
    /// `reset` parses as an unconfirmed reset; the caller is expected to
    /// ask for confirmation and set `confirmed`.
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let needs_arg = |action: fn(String) -> UserAction| {
            if rest.is_empty() {
                Err(format!("{word} 需要一个参数"))
            } else {
                Ok(action(rest.to_owned()))
            }
        };

        match word {
            "r" | "refresh" => Ok(UserAction::Refresh),
            "s" | "start" => Ok(UserAction::Start),
            "x" | "stop" => Ok(UserAction::Stop),
            "save" => Ok(UserAction::SaveSetup),
            "reset" => Ok(UserAction::ResetConfig { confirmed: false }),
            "q" | "quit" | "exit" => Ok(UserAction::Quit),
            "coin" => needs_arg(UserAction::SelectCoin),
            "impl" => needs_arg(UserAction::SelectImpl),
            "pool" => needs_arg(UserAction::SelectPool),
            "custom" => needs_arg(UserAction::EditPoolCustom),
            "wallet" => needs_arg(UserAction::EditWallet),
            "bin" => Ok(UserAction::EditBinPath(rest.to_owned())),
            "threads" => Ok(UserAction::EditThreads(rest.to_owned())),
            "" => Err("请输入命令".to_owned()),
            other => Err(format!("未知命令：{other}")),
        }
    }
}

/// Network half of a command.
#[derive(Debug)]
enum Request {
    Refresh,
    Setup(SetupRequest),
    Control(Control),
}

type CommandResult = Result<Reply<CommandReply>, TransportError>;

/// What the network half brought back. `resync` is empty unless the
/// backend accepted.
#[derive(Debug)]
enum Completion {
    Refresh {
        resync: Vec<Fetched>,
    },
    Setup {
        request: SetupRequest,
        reply: CommandResult,
        resync: Vec<Fetched>,
    },
    Control {
        control: Control,
        reply: CommandResult,
        resync: Vec<Fetched>,
    },
}

/// Result of the synchronous half of an action.
enum Step {
    /// Nothing to send: a form edit or quit.
    Idle,
    Finished(Outcome),
    Pending(Request),
}

/// Run the network half of a command, then the forced resync.
///
/// Owns its client handle so it can run as a task while the event loop
/// keeps applying poller updates.
async fn execute(client: Client, generations: Generations, request: Request) -> Completion {
    match request {
        Request::Refresh => Completion::Refresh {
            resync: sync::fetch_all(&client, &generations).await,
        },
        Request::Setup(request) => {
            let reply = client.submit_setup(&request).await;
            let resync = resync_if_accepted(&client, &generations, &reply).await;
            Completion::Setup {
                request,
                reply,
                resync,
            }
        }
        Request::Control(control) => {
            let reply = match control {
                Control::Start => client.start().await,
                Control::Stop => client.stop().await,
                Control::Reset => client.reset_config().await,
            };
            let resync = resync_if_accepted(&client, &generations, &reply).await;
            Completion::Control {
                control,
                reply,
                resync,
            }
        }
    }
}

async fn resync_if_accepted(
    client: &Client,
    generations: &Generations,
    reply: &CommandResult,
) -> Vec<Fetched> {
    if matches!(reply, Ok(Reply::Accepted(_))) {
        sync::fetch_all(client, generations).await
    } else {
        Vec::new()
    }
}

/// Owns the session and drives everything that changes it.
pub struct Dashboard {
    client: Client,
    generations: Generations,
    session: DashboardSession,
    notice_duration: Duration,
    renderer: Option<Box<dyn Render + Send + Sync>>,
}

impl Dashboard {
    pub fn new(client: Client, config: &DashboardConfig) -> Self {
        Self {
            client,
            generations: Generations::new(),
            session: DashboardSession::new(config.catalog.clone()),
            notice_duration: config.notice_duration,
            renderer: None,
        }
    }

    /// Redraw through `renderer` after every change.
    pub fn with_renderer(mut self, renderer: impl Render + Send + Sync + 'static) -> Self {
        self.renderer = Some(Box::new(renderer));
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Generation source to share with a background poller.
    pub fn generations(&self) -> &Generations {
        &self.generations
    }

    pub fn session(&self) -> &DashboardSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut DashboardSession {
        &mut self.session
    }

    fn redraw(&mut self) {
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.render(&self.session);
        }
    }

    /// Forced resynchronization after a command.
    pub async fn refresh_all(&mut self) {
        sync::refresh_all(&self.client, &self.generations, &mut self.session).await;
    }

    /// User-requested refresh, with a confirmation that clears itself.
    pub async fn refresh(&mut self) -> Outcome {
        self.command(UserAction::Refresh).await
    }

    /// Validate the draft form and submit it.
    pub async fn save_setup(&mut self) -> Outcome {
        self.command(UserAction::SaveSetup).await
    }

    pub async fn start(&mut self) -> Outcome {
        self.command(UserAction::Start).await
    }

    pub async fn stop(&mut self) -> Outcome {
        self.command(UserAction::Stop).await
    }

    /// Clear the backend configuration.
    ///
    /// Nothing is sent unless `confirmed`. On success the draft form is
    /// reset and the setup screen shown until the next status confirms.
    pub async fn reset_config(&mut self, confirmed: bool) -> Outcome {
        self.command(UserAction::ResetConfig { confirmed }).await
    }

    async fn command(&mut self, action: UserAction) -> Outcome {
        self.handle(action).await.unwrap_or(Outcome::Cancelled)
    }

    /// Carry out one action to completion. `Quit` is the caller's
    /// business and yields `None`, as do form edits.
    pub async fn handle(&mut self, action: UserAction) -> Option<Outcome> {
        let outcome = match self.begin(action) {
            Step::Idle => None,
            Step::Finished(outcome) => Some(outcome),
            Step::Pending(request) => {
                self.redraw();
                let completion =
                    execute(self.client.clone(), self.generations.clone(), request).await;
                Some(self.finish(completion))
            }
        };
        self.redraw();
        outcome
    }

    /// Start an action without waiting for the backend.
    fn dispatch(&mut self, action: UserAction, in_flight: &mut JoinSet<Completion>) {
        match self.begin(action) {
            Step::Idle => {}
            Step::Finished(outcome) => debug!(?outcome, "Command finished"),
            Step::Pending(request) => {
                in_flight.spawn(execute(
                    self.client.clone(),
                    self.generations.clone(),
                    request,
                ));
            }
        }
    }

    fn begin(&mut self, action: UserAction) -> Step {
        trace!(?action, "User action");
        match action {
            UserAction::Refresh => {
                self.session.set_dash_msg(REFRESHING);
                Step::Pending(Request::Refresh)
            }
            UserAction::Start => self.begin_control(Control::Start),
            UserAction::Stop => self.begin_control(Control::Stop),
            UserAction::SaveSetup => self.begin_setup(),
            UserAction::ResetConfig { confirmed: false } => {
                debug!("Reset not confirmed");
                Step::Finished(Outcome::Cancelled)
            }
            UserAction::ResetConfig { confirmed: true } => {
                self.session.clear_setup_msg();
                self.begin_control(Control::Reset)
            }
            UserAction::Quit => Step::Idle,
            edit => {
                self.edit_form(edit);
                Step::Idle
            }
        }
    }

    fn begin_setup(&mut self) -> Step {
        if self.session.phase() == SetupPhase::Submitting {
            debug!("Setup already being submitted");
            return Step::Finished(Outcome::Cancelled);
        }

        self.session.clear_setup_msg();
        self.session.clear_dash_msg();
        self.session.set_phase(SetupPhase::Validating);

        match self.session.form().validate() {
            Ok(request) => {
                self.session.set_phase(SetupPhase::Submitting);
                self.session.set_setup_msg(SAVING);
                Step::Pending(Request::Setup(request))
            }
            Err(err) => {
                debug!(error = %err, "Setup form invalid");
                self.session.set_phase(SetupPhase::Idle);
                self.session.set_setup_msg(err.to_string());
                Step::Finished(Outcome::Invalid(err))
            }
        }
    }

    fn begin_control(&mut self, control: Control) -> Step {
        match control.pending_text() {
            Some(text) => self.session.set_dash_msg(text),
            None => self.session.clear_dash_msg(),
        }
        Step::Pending(Request::Control(control))
    }

    fn apply_all(&mut self, resync: Vec<Fetched>) {
        for fetched in resync {
            self.session.apply(fetched);
        }
    }

    fn finish(&mut self, completion: Completion) -> Outcome {
        match completion {
            Completion::Refresh { resync } => {
                self.apply_all(resync);
                self.session
                    .flash_dash_msg(REFRESHED, Instant::now() + self.notice_duration);
                Outcome::Done(REFRESHED.to_owned())
            }
            Completion::Setup {
                request,
                reply,
                resync,
            } => self.finish_setup(request, reply, resync),
            Completion::Control {
                control,
                reply,
                resync,
            } => self.finish_control(control, reply, resync),
        }
    }

    fn finish_setup(
        &mut self,
        request: SetupRequest,
        reply: CommandResult,
        resync: Vec<Fetched>,
    ) -> Outcome {
        self.session.set_phase(SetupPhase::Idle);

        match reply {
            Ok(Reply::Accepted(_)) => {
                info!(
                    coin = %request.coin,
                    impl_name = %request.impl_name,
                    threads = ?request.threads,
                    "Setup accepted"
                );
                self.session.set_setup_msg(SAVED);
                self.session.reset_form();
                self.apply_all(resync);
                Outcome::Done(SAVED.to_owned())
            }
            Ok(Reply::Rejected(rejection)) => {
                let err = rejection.into_server_error(SAVE_FAILED);
                warn!(status = err.status, error = %err, "Setup rejected");
                self.session.set_setup_msg(err.message.clone());
                Outcome::Rejected(err)
            }
            Err(e) => {
                warn!(error = %e, "Setup request failed");
                let text = format!("{SAVE_FAILED}：{e}");
                self.session.set_setup_msg(text.clone());
                Outcome::Unreachable(text)
            }
        }
    }

    fn finish_control(
        &mut self,
        control: Control,
        reply: CommandResult,
        resync: Vec<Fetched>,
    ) -> Outcome {
        match reply {
            Ok(Reply::Accepted(reply)) => {
                let text = reply
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| control.done_text().to_owned());
                info!(?control, message = %text, "Command accepted");
                self.session.set_dash_msg(text.clone());

                if control == Control::Reset {
                    self.session.reset_form();
                    self.session.force_setup();
                }
                self.apply_all(resync);
                Outcome::Done(text)
            }
            Ok(Reply::Rejected(rejection)) => {
                let err = rejection.into_server_error(control.failed_text());
                warn!(?control, status = err.status, error = %err, "Command rejected");
                self.session.set_dash_msg(err.message.clone());
                Outcome::Rejected(err)
            }
            Err(e) => {
                warn!(?control, error = %e, "Command failed");
                let text = format!("{}：{e}", control.failed_text());
                self.session.set_dash_msg(text.clone());
                Outcome::Unreachable(text)
            }
        }
    }

    /// Apply a form edit, reporting problems on the setup line.
    fn edit_form(&mut self, action: UserAction) {
        let (form, catalog) = self.session.form_and_catalog();
        let result = match action {
            UserAction::SelectCoin(coin) => form.select_coin(catalog, &coin),
            UserAction::SelectImpl(name) => form.select_impl(catalog, &name),
            UserAction::SelectPool(value) => {
                form.select_pool(catalog, &value);
                Ok(())
            }
            UserAction::EditPoolCustom(text) => {
                form.pool_custom = text;
                Ok(())
            }
            UserAction::EditWallet(text) => {
                form.wallet = text;
                Ok(())
            }
            UserAction::EditBinPath(text) => {
                form.bin_path = text;
                Ok(())
            }
            UserAction::EditThreads(text) => {
                form.threads_raw = text;
                Ok(())
            }
            _ => Ok(()),
        };

        match result {
            Ok(()) => self.session.clear_setup_msg(),
            Err(err) => self.session.set_setup_msg(err.to_string()),
        }
    }

    /// Interactive loop: apply poller updates and user actions as they
    /// come, expire transient messages, redraw after each change.
    ///
    /// Commands run as tasks; their results are applied when they come
    /// back, so a hung request never holds up polling or redraws.
    ///
    /// Returns when `cancellation` fires, the action channel closes, or
    /// the user quits. Commands still in flight are abandoned.
    pub async fn run(
        mut self,
        mut updates: mpsc::Receiver<Fetched>,
        mut actions: mpsc::Receiver<UserAction>,
        cancellation: CancellationToken,
    ) -> Self {
        let mut in_flight: JoinSet<Completion> = JoinSet::new();
        self.redraw();

        loop {
            let expiry = self.session.next_notice_expiry();
            let wake_at = expiry.unwrap_or_else(|| Instant::now() + IDLE_WAKE);

            // Poller updates go before finished commands and queued actions.
            tokio::select! {
                biased;

                _ = cancellation.cancelled() => {
                    break;
                }
                Some(fetched) = updates.recv() => {
                    self.session.apply(fetched);
                }
                Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                    match done {
                        Ok(completion) => {
                            let outcome = self.finish(completion);
                            debug!(?outcome, "Command finished");
                        }
                        Err(e) => warn!(error = %e, "Command task failed"),
                    }
                }
                action = actions.recv() => {
                    match action {
                        None | Some(UserAction::Quit) => break,
                        Some(action) => self.dispatch(action, &mut in_flight),
                    }
                }
                _ = tokio::time::sleep_until(wake_at), if expiry.is_some() => {
                    self.session.expire_notices(Instant::now());
                }
            }

            self.redraw();
        }

        in_flight.shutdown().await;
        self
    }
}
