//! sitewatch CLI
//!
//! Local entry point: registry management, one-off checks and the daemon.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use sitewatch::{
    Monitor,
    error::{AppError, Result},
    models::{CheckResult, Config, DeliveryStatus, NotifyTarget, Site, SiteKey},
    utils::fs,
};
use tokio_util::sync::CancellationToken;

/// sitewatch - Website Change Monitor
#[derive(Parser, Debug)]
#[command(
    name = "sitewatch",
    version,
    about = "Watch web pages for changes and get notified"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "sitewatch.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Start monitoring a page
    Add {
        /// Page URL
        url: String,

        /// Site key (default: derived from the URL or name)
        #[arg(long)]
        key: Option<String>,

        #[command(flatten)]
        fields: SiteFields,

        /// Add the site disabled
        #[arg(long)]
        disabled: bool,
    },

    /// Stop monitoring a site
    Remove {
        /// Site key, name or URL
        site: String,

        /// Also delete stored snapshots
        #[arg(long)]
        purge: bool,
    },

    /// Change a site's settings
    Edit {
        /// Site key, name or URL
        site: String,

        /// New page URL
        #[arg(long)]
        url: Option<String>,

        #[command(flatten)]
        fields: SiteFields,

        /// Remove the selector and watch the whole page
        #[arg(long, conflicts_with = "selector")]
        clear_selector: bool,

        /// Remove all ignore patterns
        #[arg(long)]
        clear_ignore: bool,

        /// Use the default interval again
        #[arg(long, conflicts_with = "interval")]
        clear_interval: bool,

        /// Use the default notification targets again
        #[arg(long, conflicts_with = "notify")]
        clear_notify: bool,
    },

    /// Resume checking a site
    Enable { site: String },

    /// Pause checking a site
    Disable { site: String },

    /// List monitored sites and their status
    List,

    /// Check sites now
    Check {
        /// Only this site (key, name or URL)
        site: Option<String>,

        /// Check every enabled site, due or not
        #[arg(long)]
        force: bool,
    },

    /// Show the last detected change of a site
    Diff {
        site: String,

        /// Print the HTML report instead of text
        #[arg(long)]
        html: bool,
    },

    /// Store the current content as the new baseline without notifying
    Reset { site: String },

    /// Send a test notification through every configured target
    TestNotify,

    /// Validate the configuration file
    Validate,

    /// Run the scheduler until interrupted
    Daemon,
}

/// Site settings shared by `add` and `edit`.
#[derive(Args, Debug)]
struct SiteFields {
    /// Display name
    #[arg(long)]
    name: Option<String>,

    /// CSS selector of the watched region
    #[arg(long)]
    selector: Option<String>,

    /// Regex whose matches are ignored (repeatable)
    #[arg(long = "ignore")]
    ignore: Vec<String>,

    /// Check interval in seconds
    #[arg(long)]
    interval: Option<u64>,

    /// Notification target: desktop, log, email:ADDR[,ADDR], webhook:URL (repeatable)
    #[arg(long = "notify")]
    notify: Vec<NotifyTarget>,
}

impl SiteFields {
    fn apply(self, site: &mut Site) {
        if let Some(name) = self.name {
            site.name = Some(name);
        }
        if let Some(selector) = self.selector {
            site.selector = Some(selector);
        }
        if !self.ignore.is_empty() {
            site.ignore_patterns.extend(self.ignore);
        }
        if let Some(interval) = self.interval {
            site.interval_secs = Some(interval);
        }
        if !self.notify.is_empty() {
            site.targets = self.notify;
        }
    }
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn open(config_path: &Path) -> Result<Monitor> {
    if !config_path.exists() {
        return Err(AppError::config(format!(
            "{} not found. Run 'sitewatch init' first.",
            config_path.display()
        )));
    }
    Monitor::open(config_path)
}

fn resolve(monitor: &Monitor, site: &str) -> Result<SiteKey> {
    monitor.registry().resolve(site)
}

fn set_enabled(config_path: &Path, site: &str, enabled: bool) -> Result<()> {
    let monitor = open(config_path)?;
    let key = resolve(&monitor, site)?;
    monitor.registry().set_enabled(&key, enabled)?;
    println!("{key} {}", if enabled { "enabled" } else { "disabled" });
    Ok(())
}

fn print_result(result: &CheckResult) {
    let mut line = format!("{}: {}", result.site_key, result.outcome.label());
    if let Some(message) = result.outcome.message() {
        line.push_str(&format!(" ({message})"));
    }
    if let Some(report) = &result.report {
        line.push_str(&format!(" - {}", report.summary()));
    }
    if result.degraded {
        line.push_str(&format!(
            " [DEGRADED: {} consecutive failures]",
            result.consecutive_failures
        ));
    }
    println!("{line}");

    for delivery in &result.deliveries {
        match &delivery.status {
            DeliveryStatus::Delivered => println!("  ✓ notified {}", delivery.target),
            DeliveryStatus::Failed(e) => println!("  ✗ {} failed: {e}", delivery.target),
        }
    }
    let undelivered = result.failed_deliveries().count();
    if undelivered > 0 {
        println!(
            "  {undelivered} of {} notification(s) not delivered",
            result.deliveries.len()
        );
    }
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Init { force } => {
            if cli.config.exists() && !force {
                log::warn!(
                    "Config already exists at {}. Use --force to overwrite.",
                    cli.config.display()
                );
                return Ok(());
            }
            let content = toml::to_string_pretty(&Config::default())?;
            fs::write_atomic(&cli.config, content.as_bytes())?;
            log::info!("Default configuration written to {}", cli.config.display());
        }

        Command::Add {
            url,
            key,
            fields,
            disabled,
        } => {
            let monitor = open(&cli.config)?;
            let key = match (&key, &fields.name) {
                (Some(key), _) => SiteKey::parse(key)?,
                (None, Some(name)) => SiteKey::slug(name)?,
                (None, None) => SiteKey::from_url(&url)?,
            };
            let mut site = Site::with_key(key, url);
            fields.apply(&mut site);
            site.enabled = !disabled;

            let site = monitor.add_site(site)?;
            println!("Added {} ({})", site.key, site.url);
        }

        Command::Remove { site, purge } => {
            let monitor = open(&cli.config)?;
            let key = resolve(&monitor, &site)?;
            let removed = monitor.remove_site(&key, purge).await?;
            println!("Removed {} ({})", removed.key, removed.url);
        }

        Command::Edit {
            site,
            url,
            fields,
            clear_selector,
            clear_ignore,
            clear_interval,
            clear_notify,
        } => {
            let monitor = open(&cli.config)?;
            let key = resolve(&monitor, &site)?;
            let updated = monitor.update_site(&key, |site| {
                if let Some(url) = url {
                    site.url = url;
                }
                if clear_selector {
                    site.selector = None;
                }
                if clear_ignore {
                    site.ignore_patterns.clear();
                }
                if clear_interval {
                    site.interval_secs = None;
                }
                if clear_notify {
                    site.targets.clear();
                }
                fields.apply(site);
            })?;
            println!("Updated {}", updated.key);
        }

        Command::Enable { site } => set_enabled(&cli.config, &site, true)?,

        Command::Disable { site } => set_enabled(&cli.config, &site, false)?,

        Command::List => {
            let monitor = open(&cli.config)?;
            let default_interval = monitor.settings().default_interval_secs;
            let sites = monitor.site_statuses().await;
            if sites.is_empty() {
                println!("No sites monitored yet. Use 'sitewatch add <URL>'.");
            }
            for (i, (site, status)) in sites.iter().enumerate() {
                println!(
                    "{}. {} [{}]{}",
                    i + 1,
                    site.display_name(),
                    site.key,
                    if site.enabled { "" } else { " (disabled)" }
                );
                println!("   URL: {}", site.url);
                if let Some(selector) = &site.selector {
                    println!("   Selector: {selector}");
                }
                println!(
                    "   Interval: {}s",
                    site.interval(default_interval).as_secs()
                );
                match &status.last_checked_at {
                    Some(at) => println!(
                        "   Last check: {} ({})",
                        at.format("%Y-%m-%d %H:%M:%S UTC"),
                        status
                            .last_outcome
                            .as_ref()
                            .map(|o| o.label())
                            .unwrap_or("unknown")
                    ),
                    None => println!("   Last check: never"),
                }
                if let Some(at) = &status.last_changed_at {
                    println!("   Last change: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
                }
                if status.degraded {
                    println!(
                        "   DEGRADED: {} consecutive failures",
                        status.consecutive_failures
                    );
                }
            }
        }

        Command::Check { site, force } => {
            let monitor = Arc::new(open(&cli.config)?);
            let results = match site {
                Some(site) => {
                    let key = resolve(&monitor, &site)?;
                    vec![monitor.check_one(&key).await?]
                }
                None => Arc::clone(&monitor).check_all(force).await,
            };
            for result in &results {
                print_result(result);
            }
        }

        Command::Diff { site, html } => {
            let monitor = open(&cli.config)?;
            let key = resolve(&monitor, &site)?;
            match monitor.get_last_diff(&key).await? {
                Some(report) if html => print!("{}", report.to_html()),
                Some(report) => {
                    println!("{} ({})", report.site_name, report.url);
                    println!(
                        "Detected: {}",
                        report.detected_at.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                    println!("{}\n", report.summary());
                    print!("{}", report.to_text());
                }
                None => println!("No change recorded for {key}"),
            }
        }

        Command::Reset { site } => {
            let monitor = open(&cli.config)?;
            let key = resolve(&monitor, &site)?;
            print_result(&monitor.reset_baseline(&key).await?);
        }

        Command::TestNotify => {
            let monitor = open(&cli.config)?;
            let results = monitor.test_notification().await;
            if results.is_empty() {
                log::warn!("No notification targets configured");
            }
            for result in &results {
                match &result.status {
                    DeliveryStatus::Delivered => println!("✓ {}", result.target),
                    DeliveryStatus::Failed(e) => println!("✗ {}: {e}", result.target),
                }
            }
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            let config = Config::load(&cli.config)?;
            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("✓ Config OK ({} site(s))", config.sites.len());
        }

        Command::Daemon => {
            let monitor = Arc::new(open(&cli.config)?);
            let stop = CancellationToken::new();

            let signal = stop.clone();
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    log::error!("Cannot listen for shutdown signal: {e}");
                    return;
                }
                log::info!("Shutdown signal received");
                signal.cancel();
            });

            monitor.run_daemon(stop).await;
        }
    }

    Ok(())
}
