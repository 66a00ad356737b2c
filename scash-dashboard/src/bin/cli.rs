//! Command-line client for the SCASH miner manager.
//!
//! One-shot subcommands print a report and exit non-zero when the backend
//! refused or could not be reached. `watch` runs the live dashboard:
//! background polling plus commands typed on stdin.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use time::UtcOffset;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use scash_dashboard::api_client::{Client, Reply};
use scash_dashboard::commands::{Dashboard, Outcome, RESET_PROMPT, UserAction};
use scash_dashboard::config::DashboardConfig;
use scash_dashboard::render::{self, TerminalRenderer};
use scash_dashboard::sync::Poller;
use scash_dashboard::tracing::{init_cli, prelude::*};
use scash_dashboard::view::{HashrateChart, ViewMode};

#[derive(Parser)]
#[command(name = "scash-cli", version, about = "Control and monitor the SCASH miner manager")]
struct Cli {
    /// Manager API base URL (overrides config file and $SCASH_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// TOML config file (default: $SCASH_DASHBOARD_CONFIG)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show miner status
    Status,
    /// Show the tail of the miner log
    Logs {
        /// Number of lines (default from config)
        #[arg(long)]
        tail: Option<usize>,
    },
    /// Show recent hashrate history
    History,
    /// Ask the manager to start the miner
    Start,
    /// Stop the miner
    Stop,
    /// Save the miner configuration and start mining
    Setup(SetupArgs),
    /// Clear the saved configuration and stop the miner
    Reset {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Live dashboard; type commands on stdin
    Watch {
        /// Refresh period in seconds (default from config)
        #[arg(long)]
        interval: Option<f64>,
    },
}

#[derive(Args)]
struct SetupArgs {
    /// Payout wallet address
    #[arg(long)]
    wallet: String,

    #[arg(long)]
    coin: Option<String>,

    /// Miner implementation
    #[arg(long = "impl")]
    impl_name: Option<String>,

    /// Pool preset or stratum URL
    #[arg(long)]
    pool: Option<String>,

    /// Path to the miner binary
    #[arg(long)]
    bin_path: Option<String>,

    /// Mining threads; empty lets the manager decide
    #[arg(long)]
    threads: Option<String>,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_cli(cli.verbose);

    // Read before the runtime starts its worker threads.
    let offset = render::local_offset();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting runtime")?;
    let result = runtime.block_on(run(cli, offset));

    // A pending stdin read would otherwise hold shutdown until Enter.
    runtime.shutdown_timeout(Duration::from_millis(100));

    match result {
        Ok(code) => Ok(code),
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run(cli: Cli, offset: UtcOffset) -> Result<ExitCode> {
    let mut config = DashboardConfig::load(cli.config.as_deref())?;
    if let Some(url) = cli.api_url {
        config.api_url = url;
    }
    debug!(api_url = %config.api_url, "Using manager API");

    let client = Client::with_base_url(&config.api_url);

    match cli.command {
        Command::Status => cmd_status(client, &config).await,
        Command::Logs { tail } => cmd_logs(&client, tail.unwrap_or(config.log_tail_lines)).await,
        Command::History => cmd_history(&client, offset).await,
        Command::Start => cmd_control(client, &config, UserAction::Start).await,
        Command::Stop => cmd_control(client, &config, UserAction::Stop).await,
        Command::Reset { yes } => {
            let confirmed = yes || confirm(RESET_PROMPT).await?;
            cmd_control(client, &config, UserAction::ResetConfig { confirmed }).await
        }
        Command::Setup(args) => cmd_setup(client, &config, args).await,
        Command::Watch { interval } => {
            if let Some(secs) = interval {
                config.set_poll_interval_secs(secs)?;
            }
            cmd_watch(client, &config, offset).await
        }
    }
}

/// Print a command outcome; failures go to stderr.
fn report(outcome: &Outcome) -> ExitCode {
    match outcome {
        Outcome::Done(_) => {
            println!("{} {}", "✓".green().bold(), outcome.message());
            ExitCode::SUCCESS
        }
        Outcome::Cancelled => {
            println!("{}", outcome.message().dimmed());
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("{} {}", "✗".red().bold(), outcome.message());
            ExitCode::FAILURE
        }
    }
}

/// Print what the last sync left on screen.
fn print_view(dashboard: &Dashboard) -> ExitCode {
    let session = dashboard.session();
    match session.mode() {
        Some(ViewMode::Dashboard) => {
            print!("{}", render::dashboard_section(session.dashboard()));
            ExitCode::SUCCESS
        }
        Some(ViewMode::Setup) => {
            println!(
                "{}",
                "Miner 尚未配置，请运行 scash-cli setup --wallet <地址>".yellow()
            );
            ExitCode::SUCCESS
        }
        None => {
            let text = session.dash_msg().unwrap_or("获取状态失败");
            eprintln!("{} {text}", "✗".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn cmd_status(client: Client, config: &DashboardConfig) -> Result<ExitCode> {
    let mut dashboard = Dashboard::new(client, config);
    dashboard.refresh_all().await;
    Ok(print_view(&dashboard))
}

async fn cmd_logs(client: &Client, tail: usize) -> Result<ExitCode> {
    match client.get_logs().await? {
        Reply::Accepted(text) => {
            print!("{}", render::log_section(&text, tail));
            Ok(ExitCode::SUCCESS)
        }
        Reply::Rejected(rejection) => {
            let err = rejection.into_server_error("读取日志失败");
            eprintln!("{} {err}", "✗".red().bold());
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn cmd_history(client: &Client, offset: UtcOffset) -> Result<ExitCode> {
    match client.get_hashrate_history().await? {
        Reply::Accepted(points) => {
            let chart = HashrateChart::from_points(&points);
            print!("{}", render::chart_section(&chart, offset));
            Ok(ExitCode::SUCCESS)
        }
        Reply::Rejected(rejection) => {
            let err = rejection.into_server_error("读取算力历史失败");
            eprintln!("{} {err}", "✗".red().bold());
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn cmd_control(client: Client, config: &DashboardConfig, action: UserAction) -> Result<ExitCode> {
    let mut dashboard = Dashboard::new(client, config);
    let Some(outcome) = dashboard.handle(action).await else {
        return Ok(ExitCode::SUCCESS);
    };
    let code = report(&outcome);
    if outcome.is_success() {
        print_view(&dashboard);
    }
    Ok(code)
}

async fn cmd_setup(client: Client, config: &DashboardConfig, args: SetupArgs) -> Result<ExitCode> {
    let mut dashboard = Dashboard::new(client, config);

    let (form, catalog) = dashboard.session_mut().form_and_catalog();
    if let Some(coin) = &args.coin {
        form.select_coin(catalog, coin)?;
    }
    if let Some(impl_name) = &args.impl_name {
        form.select_impl(catalog, impl_name)?;
    }
    if let Some(pool) = &args.pool {
        form.select_pool(catalog, pool);
    }
    form.wallet = args.wallet;
    form.bin_path = args.bin_path.unwrap_or_default();
    form.threads_raw = args.threads.unwrap_or_default();

    let outcome = dashboard.save_setup().await;
    let code = report(&outcome);
    if outcome.is_success() {
        print_view(&dashboard);
    }
    Ok(code)
}

/// Ask a yes/no question on the terminal. Anything but `y`/`yes` is no.
async fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("reading confirmation")?;
    Ok(is_yes(&line))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

async fn cmd_watch(client: Client, config: &DashboardConfig, offset: UtcOffset) -> Result<ExitCode> {
    let cancel = CancellationToken::new();
    let (updates_tx, updates_rx) = mpsc::channel(32);
    let (actions_tx, actions_rx) = mpsc::channel(8);

    let dashboard = Dashboard::new(client.clone(), config)
        .with_renderer(TerminalRenderer::new(config.log_tail_lines, offset));

    let poller = Poller::new(
        client,
        dashboard.generations().clone(),
        config.poll_interval,
        updates_tx,
    )
    .spawn(cancel.clone());

    tokio::spawn(read_actions(actions_tx, cancel.clone()));

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupted");
            ctrl_c.cancel();
        }
    });

    info!(interval_secs = config.poll_interval.as_secs_f64(), "Watching");
    dashboard.run(updates_rx, actions_rx, cancel.clone()).await;

    cancel.cancel();
    poller.await.context("poller task")?;
    Ok(ExitCode::SUCCESS)
}

/// Turn stdin lines into actions. `reset` asks for confirmation first.
async fn read_actions(actions: mpsc::Sender<UserAction>, cancel: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut confirming_reset = false;

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                // stdin closed; keep watching until interrupted.
                debug!("stdin closed");
                cancel.cancelled().await;
                return;
            }
            Err(e) => {
                warn!(error = %e, "Reading stdin failed");
                cancel.cancelled().await;
                return;
            }
        };

        let action = if confirming_reset {
            confirming_reset = false;
            UserAction::ResetConfig {
                confirmed: is_yes(&line),
            }
        } else {
            match UserAction::parse(&line) {
                Ok(UserAction::ResetConfig { .. }) => {
                    confirming_reset = true;
                    print!("{RESET_PROMPT} [y/N] ");
                    let _ = std::io::stdout().flush();
                    continue;
                }
                Ok(action) => action,
                Err(message) => {
                    eprintln!("{message}");
                    continue;
                }
            }
        };

        if actions.send(action).await.is_err() {
            return;
        }
    }
}
