use std::process::ExitCode;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use punchbot::browser::ChromeLauncher;
use punchbot::calendar::{CalendarSource, CalendarStore, RemoteCalendarSource, WorkdayResolver};
use punchbot::config::Config;
use punchbot::driver::PunchKind;
use punchbot::executor::PunchExecutor;
use punchbot::scheduler::PunchScheduler;

#[derive(Parser)]
#[command(name = "punchbot", version, about = "Automated NUEIP attendance punching")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until interrupted (the default).
    Run,
    /// Report whether a date is a workday and exit.
    CheckWorkday {
        /// Date to check (YYYY-MM-DD); defaults to today.
        date: Option<NaiveDate>,
    },
    /// Perform one punch immediately, without jitter, and exit.
    Punch {
        #[arg(value_enum)]
        direction: Direction,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Direction {
    In,
    Out,
}

impl From<Direction> for PunchKind {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::In => PunchKind::ClockIn,
            Direction::Out => PunchKind::ClockOut,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // .env is optional; a missing file is not an error.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("punchbot=info")),
        )
        .init();

    // A panic anywhere in the process is unrecoverable for a long-running
    // attendance daemon; exit so the supervisor restarts us.
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_hook(info);
        std::process::exit(1);
    }));

    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::CheckWorkday { date } => check_workday(config, date).await,
        Command::Punch { direction } => punch_once(config, direction.into()).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> anyhow::Result<ExitCode> {
    let resolver = Arc::new(build_resolver(&config)?);
    let today = resolver.today();
    resolver.preload_years(&[today.year()]).await;

    let now = chrono::Utc::now().with_timezone(&config.timezone);
    let workday = resolver.is_today_workday().await;
    info!(
        local_time = %now.format("%Y-%m-%d %H:%M:%S %Z"),
        weekday = %today.weekday(),
        workday,
        "startup status"
    );

    let launcher = Arc::new(ChromeLauncher::new(&config));
    let executor = Arc::new(PunchExecutor::new(launcher, config.clone()));

    let mut scheduler = PunchScheduler::start(resolver, executor, &config).await?;

    wait_for_shutdown_signal().await;
    info!("shutdown signal received");
    scheduler.shutdown().await?;
    Ok(ExitCode::SUCCESS)
}

async fn check_workday(config: Config, date: Option<NaiveDate>) -> anyhow::Result<ExitCode> {
    let resolver = build_resolver(&config)?;
    let date = date.unwrap_or_else(|| resolver.today());
    let workday = resolver.is_workday(date).await;
    match resolver.date_info(date).await {
        Some(day) => println!(
            "{date}: {} ({})",
            if workday { "workday" } else { "not a workday" },
            if day.description.is_empty() {
                day.week.as_str()
            } else {
                day.description.as_str()
            }
        ),
        None => println!(
            "{date}: {} (no calendar data)",
            if workday { "workday" } else { "not a workday" }
        ),
    }
    Ok(ExitCode::SUCCESS)
}

async fn punch_once(config: Config, kind: PunchKind) -> anyhow::Result<ExitCode> {
    let launcher = Arc::new(ChromeLauncher::new(&config));
    let executor = PunchExecutor::new(launcher, config).without_jitter();
    let report = executor.attempt(kind).await;
    info!(
        outcome = ?report.outcome,
        seconds = report.duration.as_secs_f64(),
        "manual punch finished"
    );
    if report.outcome.is_failure() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn build_resolver(config: &Config) -> anyhow::Result<WorkdayResolver> {
    let store = CalendarStore::new(&config.data_dir)?;
    let sources = config
        .calendar_bases
        .iter()
        .enumerate()
        .map(|(index, base)| {
            Box::new(RemoteCalendarSource::new(format!("mirror-{index}"), base.as_str()))
                as Box<dyn CalendarSource>
        })
        .collect();
    Ok(WorkdayResolver::new(store, sources, config.timezone))
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!(error = %e, "cannot install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
