//! CLI entry point for `mailfiler`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use mailfiler::config::{self, Settings};
use mailfiler::error::unwrap_messages;
use mailfiler::ingest::{CycleReport, Ingestor, MessageOutcome, Pipeline};
use mailfiler::mail::imap::ImapConnector;
use mailfiler::mail::smtp::SmtpReplyTransport;
use mailfiler::scheduler::Poller;

#[derive(Parser)]
#[command(
    name = "mailfiler",
    version,
    about = "Files messages from an IMAP inbox into per-project correspondence folders"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (default: $MAILFILER_CONFIG or the platform config dir)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Environment name; "development" keeps flagged messages in the inbox
    #[arg(short, long, global = true, env = "MAILFILER_ENVIRONMENT")]
    environment: Option<String>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the inbox until interrupted (default)
    Run,
    /// Run a single cycle and print its report
    Once {
        #[arg(long)]
        json: bool,
    },
    /// Parse a subject and show where its messages would be filed
    Check {
        subject: String,
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Completions { shell }) => return cmd_completions(*shell),
        Some(Commands::Manpage) => return cmd_manpage(),
        _ => {}
    }

    let settings = config::load_settings(cli.config.as_deref(), cli.environment.as_deref())?;

    let log_level = match cli.verbose {
        0 => settings.logging.level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &settings);

    if matches!(cli.command, Some(Commands::Check { .. })) {
        settings.validate_filing()?;
    } else {
        settings.validate()?;
    }
    settings.log_summary();
    let settings = Arc::new(settings);

    match cli.command {
        Some(Commands::Check { subject, json }) => cmd_check(&settings, &subject, json),
        Some(Commands::Once { json }) => cmd_once(&settings, json).await,
        Some(Commands::Run) | None => cmd_run(&settings).await,
        Some(Commands::Completions { .. }) | Some(Commands::Manpage) => Ok(()),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, settings: &Settings) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::log_dir(settings);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mailfiler.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

fn build_ingestor(settings: &Settings) -> anyhow::Result<Ingestor> {
    let connector = Arc::new(ImapConnector::new(settings.imap.clone()));
    let transport = Arc::new(SmtpReplyTransport::from_settings(settings));
    Ok(Ingestor::new(settings, connector, transport)?)
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping");
            token.cancel();
        }
    });
}

/// Poll until interrupted.
async fn cmd_run(settings: &Settings) -> anyhow::Result<()> {
    let token = CancellationToken::new();
    cancel_on_ctrl_c(&token);

    let poller = Poller::new(
        build_ingestor(settings)?,
        Duration::from_secs(settings.check_interval_secs),
    );
    if let Err(e) = poller.run(&token).await {
        tracing::error!("Polling stopped:\n{}", unwrap_messages(&e));
        return Err(e.into());
    }
    Ok(())
}

/// Run one cycle and print the report.
async fn cmd_once(settings: &Settings, json: bool) -> anyhow::Result<()> {
    let token = CancellationToken::new();
    cancel_on_ctrl_c(&token);

    let report = build_ingestor(settings)?.run_cycle(&token).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

/// Parse a subject and resolve its directory without creating anything.
fn cmd_check(settings: &Settings, subject: &str, json: bool) -> anyhow::Result<()> {
    let pipeline = Pipeline::new(settings)?;
    let (parsed, dir) = pipeline.locate(subject, false)?;

    if json {
        let out = serde_json::json!({
            "project_no": parsed.project_no,
            "subject": parsed.subject,
            "directory": dir.to_string_lossy(),
            "exists": dir.is_dir(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!("  {:<20} {}", "Project", parsed.project_no);
        println!("  {:<20} {}", "Subject", parsed.subject);
        println!("  {:<20} {}", "Directory", dir.display());
        println!("  {:<20} {}", "Exists", if dir.is_dir() { "yes" } else { "no" });
        println!();
    }
    Ok(())
}

fn print_report(report: &CycleReport) {
    println!();
    println!("  {:<25} {}", "Messages in inbox", report.total);
    println!("  {:<25} {}", "Filed", report.filed);
    println!("  {:<25} {}", "Rejected, sender told", report.rejected_notified);
    println!("  {:<25} {}", "Rejected, no reply address", report.rejected_no_recipient);
    println!("  {:<25} {}", "Rejected, reply failed", report.rejected_notify_failed);
    println!(
        "  {:<25} {}",
        "Expunged",
        if report.expunged { "yes" } else { "no" }
    );

    if !report.messages.is_empty() {
        println!();
        println!("  {:<5} {:<40} {}", "#", "Subject", "Outcome");
        println!("  {}", "-".repeat(70));
        for record in &report.messages {
            let subject: String = record.subject.chars().take(39).collect();
            let outcome = match &record.outcome {
                MessageOutcome::Filed(filed) => format!("filed to {}", filed.directory.display()),
                MessageOutcome::Rejected { kind, reply, .. } => {
                    format!("rejected ({kind:?}), reply {reply:?}")
                }
            };
            println!("  {:<5} {:<40} {}", record.handle, subject, outcome);
        }
    }
    println!();
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailfiler", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}
