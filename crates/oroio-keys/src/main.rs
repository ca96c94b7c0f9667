//! oroio - Local API key manager
//!
//! Encrypted storage for a set of rotating API keys, with usage tracking
//! and desktop alerts when balances run low.
//!
//! Commands:
//! - list: List keys with usage (masked)
//! - current: Show the active key
//! - add [KEY]: Store a key (prompts if no value)
//! - remove <INDEX>: Delete a key
//! - use <INDEX>: Switch the active key
//! - refresh: Re-fetch usage for all keys
//! - check: Run the alert check once
//! - read <FILE>: Print a raw data file
//! - serve: Line protocol on stdio with periodic alert checks
//! - config: Show or change configuration

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use oroio_core::{format, Config, Paths};
use oroio_keys::{mask, protocol, KeyInfo, KeyService, OpResult, Usage};
use oroio_notify::{Backend, Notifier, Silent};

#[derive(Parser)]
#[command(name = "oroio")]
#[command(about = "Local API key manager - encrypted key rotation with usage tracking and balance alerts")]
#[command(version)]
#[command(after_help = r#"FILES:
    ~/.oroio/keys.enc         Encrypted key list (age, X25519)
    ~/.oroio/identity.key     Encryption identity, generated on first add
    ~/.oroio/current          Active key index
    ~/.oroio/list_cache.b64   Usage cache written by the fetch command
    ~/.config/oroio/config.json

USAGE DATA:
    Balances come from an external command, configured with:
        oroio config set-fetch <program> [args...]
    It gets the keys on stdin (one per line) and must write the cache
    file named in $OROIO_CACHE.

ALERTS:
    - Key balance at or below 20% of its total
    - Key expiring within a day
    - All keys used up (critical)"#)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Data directory (defaults to $OROIO_DIR or ~/.oroio)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Never show desktop alerts
    #[arg(long, global = true)]
    no_notify: bool,

    /// Verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List stored keys with their usage
    List {
        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
        /// Show full keys instead of masked ones
        #[arg(long)]
        reveal: bool,
    },

    /// Show the active key
    Current {
        /// Print the full key (useful for piping)
        #[arg(long)]
        reveal: bool,
    },

    /// Store a key (prompts securely if not provided)
    Add {
        /// API key (omit for hidden prompt)
        key: Option<String>,
    },

    /// Delete a key by index
    Remove {
        /// Key index as shown by `list`
        index: usize,
    },

    /// Make a key the active one
    Use {
        /// Key index as shown by `list`
        index: usize,
    },

    /// Re-fetch usage data for all keys
    Refresh,

    /// Run the alert check once
    Check,

    /// Print a raw data file (keys.enc, current, list_cache.b64)
    Read {
        /// File name
        file: String,
    },

    /// Answer JSON requests on stdin and check alerts periodically
    Serve,

    /// Show or change configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the current configuration
    Show,

    /// Set the usage fetch command
    SetFetch {
        /// Program and arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// Set the background alert check interval
    SetInterval {
        /// Seconds between checks
        seconds: u64,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    // stdout carries command output and the serve protocol
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut paths = Paths::new();
    if let Some(dir) = &cli.dir {
        paths = paths.with_data(dir);
    }
    let config_path = paths.config_file();
    let config = Config::load(&config_path)?;

    if let Some(Commands::Config { action }) = cli.command {
        return cmd_config(config, &config_path, action);
    }

    let notifier: Box<dyn Notifier> = if cli.no_notify || !config.notifications {
        Box::new(Silent)
    } else {
        let backend = Backend::detect();
        tracing::debug!(backend = backend.name(), "notification backend");
        Box::new(backend)
    };
    let service = KeyService::from_config(&paths, &config, notifier);

    match cli.command {
        Some(Commands::List { json, reveal }) => cmd_list(&service, json, reveal),
        Some(Commands::Current { reveal }) => cmd_current(&service, reveal),
        Some(Commands::Add { key }) => cmd_add(&service, key),
        Some(Commands::Remove { index }) => report(service.remove_key(index)),
        Some(Commands::Use { index }) => report(service.use_key(index)),
        Some(Commands::Refresh) => report(service.refresh_cache()),
        Some(Commands::Check) => cmd_check(&service),
        Some(Commands::Read { file }) => cmd_read(&service, &file),
        Some(Commands::Serve) => cmd_serve(service, &config).await,
        Some(Commands::Config { .. }) => unreachable!("handled above"),
        None => cmd_list(&service, false, false),
    }
}

/// Print a successful result or fail with its error
fn report(result: OpResult) -> Result<()> {
    if result.success {
        if let Some(message) = result.message {
            println!("success: {}", message);
        }
        Ok(())
    } else {
        bail!(result
            .error
            .unwrap_or_else(|| "operation failed".to_string()))
    }
}

fn usage_summary(usage: Option<&Usage>) -> String {
    let Some(usage) = usage else {
        return "No usage data".to_string();
    };

    match usage.used_ratio() {
        Some(ratio) => format!(
            "{}% used · Expires: {}",
            format::percent(ratio),
            usage.expires
        ),
        None => "No usage data".to_string(),
    }
}

fn display_key(info: &KeyInfo, reveal: bool) -> String {
    if reveal {
        info.key.clone()
    } else {
        mask(&info.key)
    }
}

/// List all keys
fn cmd_list(service: &KeyService, json: bool, reveal: bool) -> Result<()> {
    let mut keys = service.list_keys();

    if json {
        if !reveal {
            for info in &mut keys {
                info.key = mask(&info.key);
            }
        }
        println!("{}", serde_json::to_string_pretty(&keys)?);
        return Ok(());
    }

    if keys.is_empty() {
        println!("No keys stored. Add one with: oroio add");
        return Ok(());
    }

    println!("Stored Keys");
    println!();

    for info in &keys {
        let marker = if info.is_current { "*" } else { " " };
        println!(
            "  {} {}. {:<14}  {}",
            marker,
            info.index,
            display_key(info, reveal),
            usage_summary(info.usage.as_ref())
        );
    }

    Ok(())
}

/// Show the active key
fn cmd_current(service: &KeyService, reveal: bool) -> Result<()> {
    let Some(info) = service.current_key() else {
        bail!("No keys stored. Add one with: oroio add");
    };

    if reveal {
        println!("{}", info.key);
    } else {
        println!(
            "{}. {}  {}",
            info.index,
            mask(&info.key),
            usage_summary(info.usage.as_ref())
        );
    }

    Ok(())
}

/// Store a key
fn cmd_add(service: &KeyService, key: Option<String>) -> Result<()> {
    let key = match key {
        Some(k) => k,
        None => rpassword::prompt_password("Enter API key: ").context("Failed to read key")?,
    };

    report(service.add_key(&key))
}

/// Run the alert check once
fn cmd_check(service: &KeyService) -> Result<()> {
    let alerts = service.check();

    if alerts.is_empty() {
        println!("No alerts");
        return Ok(());
    }

    for alert in &alerts {
        let notification = alert.to_notification();
        println!("{}: {}", notification.title, notification.message);
    }

    Ok(())
}

/// Print a raw data file
fn cmd_read(service: &KeyService, file: &str) -> Result<()> {
    let Some(bytes) = service.read_data(file) else {
        bail!("Not found: {}", file);
    };

    let mut stdout = std::io::stdout();
    stdout.write_all(&bytes)?;
    stdout.flush()?;
    Ok(())
}

/// Long-running mode
async fn cmd_serve(service: KeyService, config: &Config) -> Result<()> {
    let period = Duration::from_secs(config.check_interval_secs.max(1));
    tracing::info!(
        "Serving on stdio, checking alerts every {}",
        format::duration(period.as_secs_f64())
    );

    protocol::serve(Arc::new(service), period).await
}

/// Show or change configuration
fn cmd_config(mut config: Config, path: &std::path::Path, action: Option<ConfigAction>) -> Result<()> {
    match action {
        None | Some(ConfigAction::Show) => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            return Ok(());
        }
        Some(ConfigAction::SetFetch { command }) => {
            println!("success: Fetch command set to: {}", command.join(" "));
            config.fetch_command = Some(command);
        }
        Some(ConfigAction::SetInterval { seconds }) => {
            if seconds == 0 {
                bail!("Interval must be at least 1 second");
            }
            println!(
                "success: Alert check interval set to {}",
                format::duration(seconds as f64)
            );
            config.check_interval_secs = seconds;
        }
    }

    config.save(path)
}
