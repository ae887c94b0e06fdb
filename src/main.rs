//! fwblock - block an application from the network with Windows Firewall rules
//!
//! # Usage
//!
//! ```bash
//! fwblock block "C:\Program Files\Foo"              # Block Foo's .exe/.dll files
//! fwblock block "C:\Games\Bar" --recursive --ext exe --exclude-keyword setup
//! fwblock list --owned --details                    # Rules created by fwblock
//! fwblock apps                                      # Blocked applications
//! fwblock remove-app Foo                            # Remove all of Foo's rules
//! fwblock remove "FwBlock - Foo - Foo.exe (Inbound)"
//! fwblock disable "FwBlock - Foo - Foo.exe (Outbound)"
//! fwblock config --write                            # Save the effective settings
//! ```
//!
//! Rule changes need an elevated terminal. Each rule is attempted through the
//! PowerShell firewall cmdlets first and through netsh when that fails.

use clap::{ArgAction, Parser, Subcommand};
use fwblock::audit;
use fwblock::config::{self, AppConfig};
use fwblock::core::backend::netsh::CommandLineBackend;
use fwblock::core::backend::powershell::ManagementBackend;
use fwblock::core::catalog::{EnrichMode, summarize_by_application};
use fwblock::core::error::FirewallErrorPattern;
use fwblock::core::orchestrator::{BlockReport, RemovalReport, RuleFailure};
use fwblock::core::rule::{Enrichment, RuleRecord};
use fwblock::process::{Tool, ToolCommand};
use fwblock::utils::{ensure_dirs, get_state_dir, truncate_string};
use fwblock::{Error, FileBlockRequest, Result, RuleOrchestrator, TargetExtension};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

shadow_rs::shadow!(build);

type Orchestrator = RuleOrchestrator<ManagementBackend, CommandLineBackend>;

#[derive(Parser)]
#[command(name = "fwblock")]
#[command(about = "Block an application's executables and libraries with Windows Firewall rules", long_about = None)]
#[command(version = build::PKG_VERSION, long_version = build::CLAP_LONG_VERSION)]
struct Cli {
    /// Increase log output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Write logs to fwblock.log in the state directory instead of stderr
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create inbound and outbound block rules for an application folder
    Block {
        /// Application folder; its name becomes the application name
        root: PathBuf,
        /// Include files in subdirectories
        #[arg(short, long)]
        recursive: bool,
        /// File types to block (exe, dll); defaults come from the config
        #[arg(long = "ext", value_name = "EXT")]
        extensions: Vec<TargetExtension>,
        /// Skip files whose name contains this text (case-insensitive)
        #[arg(long = "exclude-keyword", value_name = "TEXT")]
        exclude_keywords: Vec<String>,
        /// Skip files with exactly this name (case-insensitive)
        #[arg(long = "exclude-file", value_name = "FILE")]
        exclude_files: Vec<String>,
    },
    /// List firewall rules
    List {
        /// Only rules created by fwblock
        #[arg(long)]
        owned: bool,
        /// Look up program path and ports for every rule
        #[arg(long)]
        details: bool,
    },
    /// Show blocked applications
    Apps,
    /// Remove every rule created for an application
    RemoveApp {
        /// Application name (case-insensitive)
        application: String,
    },
    /// Remove one rule by display name
    Remove { display_name: String },
    /// Enable one rule by display name
    Enable { display_name: String },
    /// Disable one rule by display name
    Disable { display_name: String },
    /// Show the effective configuration
    Config {
        /// Save it to the config file so it can be edited
        #[arg(long)]
        write: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _ = ensure_dirs();
    init_logging(cli.verbose, cli.log_file);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(handle_cli(cli.command)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            print_error(&e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8, log_file: bool) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };

    if log_file
        && let Some(path) = get_state_dir().map(|dir| dir.join("fwblock.log"))
        && let Ok(file) = std::fs::File::create(path)
    {
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_ansi(false)
            .with_writer(file)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn build_orchestrator(config: &AppConfig) -> Result<Orchestrator> {
    let timeout = config.command_timeout();
    Ok(RuleOrchestrator::new(
        ManagementBackend::new(ToolCommand::resolve(Tool::PowerShell), timeout),
        CommandLineBackend::new(ToolCommand::resolve(Tool::Netsh), timeout),
        config.codec()?,
    ))
}

/// Runs one command; `Ok(false)` means some rule failed on both backends
async fn handle_cli(command: Commands) -> Result<bool> {
    let config = config::load_config().await;
    if let Commands::Config { write } = command {
        return show_config(&config, write).await;
    }
    let mut orchestrator = build_orchestrator(&config)?;

    match command {
        Commands::Block {
            root,
            recursive,
            extensions,
            exclude_keywords,
            exclude_files,
        } => {
            let mut request = FileBlockRequest::new(root).recursive(recursive);
            request.extensions.extend(extensions);
            request.exclusion_keywords = exclude_keywords;
            request.exclusion_files = exclude_files;
            let request = config.apply_defaults(request);

            let cancel = CancellationToken::new();
            let watcher = {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        eprintln!("\nCancelling after the current file...");
                        cancel.cancel();
                    }
                })
            };

            let result = orchestrator.block(&request, &cancel).await;
            watcher.abort();
            let report = result?;

            if config.enable_audit_log {
                audit::log_block(&report).await;
            }
            print_block_report(&report);
            Ok(report.is_complete())
        }
        Commands::List { owned, details } => {
            let enrich = if details || config.enrich_listing {
                EnrichMode::Lookup
            } else {
                EnrichMode::Skip
            };
            let records = if owned {
                orchestrator.list_owned(enrich).await?
            } else {
                orchestrator.list_all(enrich).await?
            };
            print_records(&records, enrich == EnrichMode::Lookup);
            Ok(true)
        }
        Commands::Apps => {
            let records = orchestrator.list_owned(EnrichMode::Skip).await?;
            let summaries = summarize_by_application(&records);
            if summaries.is_empty() {
                println!("No applications are blocked.");
            }
            for summary in summaries {
                println!(
                    "{}  ({} rule(s), {} enabled, {} file(s))",
                    summary.application,
                    summary.rule_count,
                    summary.enabled_count,
                    summary.files.len()
                );
            }
            Ok(true)
        }
        Commands::RemoveApp { application } => {
            let report = orchestrator.remove_by_application(&application).await?;
            if config.enable_audit_log {
                audit::log_remove_application(&report).await;
            }
            print_removal_report(&report);
            Ok(report.failures.is_empty())
        }
        Commands::Remove { display_name } => {
            let result = orchestrator.remove_single(&display_name).await;
            if config.enable_audit_log {
                audit::log_remove_rule(&display_name, &result).await;
            }
            let via = result?;
            println!("✓ Removed '{display_name}' (via {via} backend)");
            Ok(true)
        }
        Commands::Enable { display_name } => toggle(&mut orchestrator, &config, &display_name, true).await,
        Commands::Disable { display_name } => toggle(&mut orchestrator, &config, &display_name, false).await,
        // Answered before the backends are built
        Commands::Config { .. } => Ok(true),
    }
}

async fn show_config(config: &AppConfig, write: bool) -> Result<bool> {
    let path = config::config_path();
    println!("{}", serde_json::to_string_pretty(config)?);

    match (write, path) {
        (true, Some(path)) => {
            config::save_config(config).await?;
            println!("✓ Saved to {}", path.display());
        }
        (true, None) => {
            eprintln!("✗ No home directory; configuration not saved");
            return Ok(false);
        }
        (false, Some(path)) => println!("Config file: {}", path.display()),
        (false, None) => {}
    }
    Ok(true)
}

async fn toggle(
    orchestrator: &mut Orchestrator,
    config: &AppConfig,
    display_name: &str,
    enabled: bool,
) -> Result<bool> {
    let result = orchestrator.set_enabled(display_name, enabled).await;
    if config.enable_audit_log {
        audit::log_toggle(display_name, enabled, &result).await;
    }
    let via = result?;
    println!(
        "✓ {} '{display_name}' (via {via} backend)",
        if enabled { "Enabled" } else { "Disabled" }
    );
    Ok(true)
}

fn print_block_report(report: &BlockReport) {
    println!("Application: {}", report.application);
    if let Some(warning) = &report.warning {
        println!("⚠ {warning}");
        return;
    }

    for created in &report.created {
        println!("  ✓ {} [{}]", created.display_name, created.via);
    }
    for failure in &report.failures {
        print_failure(failure);
    }
    for collision in &report.collisions {
        println!(
            "  ⚠ Skipped {}: same file name as {}",
            collision.file.display(),
            collision.blocked_by.display()
        );
    }
    if report.cancelled {
        println!(
            "⚠ Cancelled after {} of {} file(s)",
            report.files_processed,
            report.files.len()
        );
    }

    println!(
        "{} rule(s) in place, {} via netsh fallback, {} failed, {} file(s) skipped",
        report.created.len(),
        report.fallback_count(),
        report.failures.len(),
        report.collisions.len()
    );
}

fn print_removal_report(report: &RemovalReport) {
    if report.candidates == 0 {
        println!("No rules found for application '{}'", report.application);
        return;
    }
    for name in &report.removed {
        println!("  ✓ Removed {name}");
    }
    for failure in &report.failures {
        print_failure(failure);
    }
    println!(
        "Removed {} of {} rule(s) for '{}'",
        report.removed_count(),
        report.candidates,
        report.application
    );
}

fn print_failure(failure: &RuleFailure) {
    println!("  ✗ {}", failure.display_name);
    println!("      powershell: {}", first_line(&failure.primary));
    println!("      netsh:      {}", first_line(&failure.fallback));
    let translation = FirewallErrorPattern::match_error(&failure.primary);
    println!("      {}", translation.user_message);
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

fn print_records(records: &[RuleRecord], details: bool) {
    if records.is_empty() {
        println!("No rules found.");
        return;
    }

    println!(
        "{:<60} {:<9} {:<6} {:<8} APPLICATION",
        "NAME", "DIRECTION", "ACTION", "ENABLED"
    );
    for record in records {
        let direction = record
            .direction
            .map_or_else(|| record.raw_direction.clone(), |d| d.to_string());
        println!(
            "{:<60} {:<9} {:<6} {:<8} {}",
            truncate_string(&record.display_name, 60),
            direction,
            record.action,
            if record.enabled { "yes" } else { "no" },
            record.application
        );

        if details {
            println!(
                "    program: {}",
                enrichment_text(&record.program, String::clone)
            );
            println!(
                "    ports:   {}",
                enrichment_text(&record.ports, |p| format!(
                    "{} local {} remote {}",
                    p.protocol,
                    p.local_display(),
                    p.remote_display()
                ))
            );
        }
    }
    println!("{} rule(s)", records.len());
}

fn enrichment_text<T>(value: &Enrichment<T>, show: impl Fn(&T) -> String) -> String {
    match value {
        Enrichment::Present(value) => show(value),
        Enrichment::Missing { reason } => {
            format!("unavailable ({})", truncate_string(first_line(reason), 80))
        }
        Enrichment::NotRequested => "-".to_string(),
    }
}

fn print_error(error: &Error) {
    eprintln!("✗ Error: {error}");
    let translation = FirewallErrorPattern::match_error(&error.diagnostic_text());
    eprintln!("  {}", translation.user_message);
    for suggestion in &translation.suggestions {
        eprintln!("  • {suggestion}");
    }
    if let Some(url) = &translation.help_url {
        eprintln!("  See: {url}");
    }
}
