//! CLI entry point for `mboximport`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{CommandFactory, Parser, Subcommand};
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};

use mboximport::catalog;
use mboximport::config::{self, Config};
use mboximport::cursor::Cursor;
use mboximport::gmail::GmailFactory;
use mboximport::importer::Importer;
use mboximport::model::{ImportStatus, RunSummary, WorkItem};
use mboximport::parser::mbox::MboxFile;
use mboximport::pipeline::{PipelineDriver, ProgressEvent};
use mboximport::retry::RetryPolicy;

#[derive(Parser)]
#[command(
    name = "mboximport",
    version,
    about = "Bulk-import mbox exports into Gmail mailboxes",
    long_about = "Imports a directory tree of mbox files into Gmail for many users at once, \
preserving folder structure as nested labels. Progress is resumable: every message gets a \
global index, and a stopped run can be continued with --from-message."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Import all mbox files under a directory tree
    Import {
        /// Service-account credentials JSON with domain-wide delegation
        #[arg(long = "json", value_name = "FILE")]
        credentials: PathBuf,

        /// Root directory; each immediate subdirectory is one account
        #[arg(long, value_name = "DIR")]
        dir: PathBuf,

        /// Resume from this global message index (from a previous run's
        /// log or summary)
        #[arg(long, default_value_t = 0, value_name = "N")]
        from_message: u64,

        /// Maximum remote calls per message (overrides config)
        #[arg(long, value_name = "N")]
        num_retries: Option<u32>,

        /// Do not add missing angle brackets to Message-ID headers
        #[arg(long)]
        no_fix_msgid: bool,

        /// Do not rewrite text/quoted-printable Content-Type headers
        #[arg(long)]
        no_replace_quoted_printable: bool,
    },
    /// List the work catalog without importing anything
    Scan {
        /// Root directory; each immediate subdirectory is one account
        #[arg(long, value_name = "DIR")]
        dir: PathBuf,

        /// Read every file to count messages and show global index ranges
        #[arg(long)]
        counts: bool,

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

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let cfg = config::load_config();

    // Configure logging: stderr + log file
    let log_level = match cli.verbose {
        0 => cfg.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &cfg);

    match cli.command {
        Commands::Import {
            credentials,
            dir,
            from_message,
            num_retries,
            no_fix_msgid,
            no_replace_quoted_printable,
        } => cmd_import(
            &cfg,
            &credentials,
            &dir,
            from_message,
            num_retries,
            no_fix_msgid,
            no_replace_quoted_printable,
        ),
        Commands::Scan { dir, counts, json } => cmd_scan(&dir, counts, json),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and file logging.
fn setup_logging(level: &str, cfg: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::log_dir(cfg);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::daily(&log_dir, "mboximport.log");
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

/// Run a full import.
fn cmd_import(
    cfg: &Config,
    credentials: &Path,
    dir: &Path,
    from_message: u64,
    num_retries: Option<u32>,
    no_fix_msgid: bool,
    no_replace_quoted_printable: bool,
) -> anyhow::Result<()> {
    let catalog = catalog::scan(dir)?;
    if catalog.is_empty() {
        println!("  No mbox files found under {}", dir.display());
        return Ok(());
    }
    println!(
        "  {} mbox file(s) across {} account(s)",
        catalog.len(),
        count_accounts(&catalog)
    );

    let factory = GmailFactory::new(credentials)?;

    let mut retry_cfg = cfg.retry.clone();
    if let Some(n) = num_retries {
        retry_cfg.max_attempts = n.max(1);
    }
    let mut options = cfg.import.clone();
    if no_fix_msgid {
        options.fix_msgid = false;
    }
    if no_replace_quoted_printable {
        options.replace_quoted_printable = false;
    }

    let importer = Importer::new(
        Cursor::new(from_message),
        RetryPolicy::from(&retry_cfg),
        options,
    );
    let driver = PipelineDriver::new(&factory, importer, cfg.performance.clone());

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} message(s) {wide_msg}")
            .expect("valid template"),
    );
    let progress = |event: ProgressEvent<'_>| match event {
        ProgressEvent::ItemStarted {
            position,
            total,
            item,
            file_size,
        } => {
            pb.set_message(format!(
                "{}/{} {} → {} ({})",
                position + 1,
                total,
                item.account,
                item.label(),
                format_size(file_size, BINARY)
            ));
        }
        ProgressEvent::Message { status, .. } => {
            if status != ImportStatus::SkippedResume {
                pb.inc(1);
            }
        }
        ProgressEvent::ItemFailed { item, detail } => {
            pb.println(format!(
                "  FAILED {} → {}: {}",
                item.account,
                item.label(),
                detail
            ));
        }
    };

    let start = Instant::now();
    let result = driver.run(&catalog, Some(&progress));
    pb.finish_and_clear();

    let summary = result?;
    print_summary(&summary, start.elapsed(), from_message);

    if !summary.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}

/// Print the run summary in a human-readable table.
fn print_summary(summary: &RunSummary, elapsed: std::time::Duration, from_message: u64) {
    println!();
    println!("  {:<24} {}", "Imported", summary.imported);
    if from_message > 0 {
        println!("  {:<24} {}", "Skipped (resume)", summary.skipped_resume);
    }
    println!("  {:<24} {}", "Failed (retryable)", summary.failed_retryable);
    println!("  {:<24} {}", "Failed (fatal)", summary.failed_fatal);
    if summary.failed_items > 0 {
        println!("  {:<24} {}", "Failed whole items", summary.failed_items);
    }
    println!(
        "  {:<24} {}",
        "Uploaded",
        format_size(summary.bytes_uploaded, BINARY)
    );
    println!("  {:<24} {:.2?}", "Elapsed", elapsed);
    if let Some(highest) = summary.highest_imported_index {
        println!("  {:<24} {}", "Highest imported index", highest);
        if !summary.is_clean() {
            println!(
                "  {:<24} --from-message {}",
                "Resume hint",
                highest + 1
            );
        }
    }
    println!();
}

/// Enumerate the catalog and print it without importing.
fn cmd_scan(dir: &Path, counts: bool, json: bool) -> anyhow::Result<()> {
    let catalog = catalog::scan(dir)?;

    // Message counts require reading every file; index ranges follow
    // from the counts in catalog order.
    let mut counted: Vec<(WorkItem, Option<(u64, u64)>)> = Vec::with_capacity(catalog.len());
    let mut next_index: u64 = 0;
    for item in catalog {
        let range = if counts {
            let n = MboxFile::open(&item.source)?.count()?;
            let start = next_index;
            next_index += n;
            Some((start, n))
        } else {
            None
        };
        counted.push((item, range));
    }

    if json {
        print_scan_json(&counted)?;
    } else {
        print_scan_table(&counted);
    }
    Ok(())
}

fn print_scan_table(items: &[(WorkItem, Option<(u64, u64)>)]) {
    println!();
    println!("  {} work item(s)", items.len());
    println!();
    if items.is_empty() {
        return;
    }

    for (item, range) in items {
        let size = std::fs::metadata(&item.source)
            .map(|m| format_size(m.len(), BINARY))
            .unwrap_or_else(|_| "?".to_string());
        match range {
            Some((start, n)) if *n > 0 => println!(
                "  {:<32} {:<28} {:>8}  {:>6} msg  [{}..{}]",
                item.account,
                item.label(),
                size,
                n,
                start,
                start + n - 1
            ),
            Some((_, _)) => println!(
                "  {:<32} {:<28} {:>8}  {:>6} msg",
                item.account,
                item.label(),
                size,
                0
            ),
            None => println!("  {:<32} {:<28} {:>8}", item.account, item.label(), size),
        }
    }
    println!();
}

fn print_scan_json(items: &[(WorkItem, Option<(u64, u64)>)]) -> anyhow::Result<()> {
    let entries: Vec<serde_json::Value> = items
        .iter()
        .map(|(item, range)| {
            let mut value = serde_json::json!({
                "account": item.account,
                "label": item.label(),
                "source": item.source.to_string_lossy(),
            });
            if let Some((start, n)) = range {
                value["messages"] = serde_json::json!(n);
                value["first_global_index"] = serde_json::json!(start);
                if *n > 0 {
                    value["last_global_index"] = serde_json::json!(start + n - 1);
                }
            }
            value
        })
        .collect();

    let output = serde_json::json!({
        "item_count": items.len(),
        "items": entries,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mboximport", &mut std::io::stdout());
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

fn count_accounts(catalog: &[WorkItem]) -> usize {
    let mut accounts: Vec<&str> = catalog.iter().map(|i| i.account.as_str()).collect();
    accounts.dedup();
    accounts.len()
}
