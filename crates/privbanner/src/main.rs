//! privbanner: command-line front end for the search banner governor.
//!
//! Every invocation is one browser session: the session flag starts clear
//! and is forgotten on exit, while the show count lives in the configured
//! pref store.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use privbanner_core::banner::{BannerVisibility, SearchBanner};
use privbanner_core::config::Config;
use privbanner_core::error::format_error_with_remediation;
use privbanner_core::governor::{BannerGovernor, GovernorStatus, ShowDecision, clamp_show_count};
use privbanner_core::logging::{LogConfig, init_logging};
use privbanner_core::prefs::PrefStore;
use privbanner_core::telemetry::{RecordedEvent, TelemetryRecorder};

#[derive(Debug, Parser)]
#[command(name = "privbanner", version, about = "Private browsing search banner governor")]
struct Cli {
    /// Path to privbanner.toml
    #[arg(long, global = true, env = "PRIVBANNER_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Plain)]
    format: OutputFormat,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Plain,
    Json,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show the governor state
    Status,

    /// Simulate page loads in this session
    Load {
        /// Number of page loads
        #[arg(long, default_value_t = 1)]
        times: u32,

        /// Start a fresh session before every load
        #[arg(long)]
        new_session: bool,
    },

    /// Close the banner; it will not be shown again
    Close,

    /// Follow the banner's settings link; it will not be shown again
    OpenSettings,

    /// Overwrite the persisted show count
    SetCount {
        /// New count, clamped to the allowed range
        #[arg(allow_hyphen_values = true)]
        count: i64,
    },

    /// Turn the banner feature flag on
    Enable,

    /// Turn the banner feature flag off
    Disable,

    /// Remove the persisted show count
    Reset,

    /// List every stored pref
    Prefs,
}

struct App {
    store: Arc<dyn PrefStore>,
    governor: Arc<BannerGovernor>,
    telemetry: Option<Arc<TelemetryRecorder>>,
    config: Config,
    format: OutputFormat,
}

#[derive(Debug, Serialize)]
struct LoadResult {
    load: u32,
    visibility: BannerVisibility,
    show_count: u32,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<privbanner_core::Error>() {
                Some(core) => eprintln!("{}", format_error_with_remediation(core)),
                None => eprintln!("Error: {err:#}"),
            }
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let mut log_config = LogConfig::from(&config.general);
    if cli.verbose {
        log_config = log_config.verbose();
    }
    init_logging(&log_config).context("failed to initialize logging")?;

    let store = config.open_prefs()?;
    let governor = Arc::new(BannerGovernor::with_keys(
        store.clone(),
        config.banner.keys(),
    ));
    let telemetry = config
        .telemetry
        .record_banner_events
        .then(|| Arc::new(TelemetryRecorder::new(config.telemetry.platform, store.clone())));

    let app = App {
        store,
        governor,
        telemetry,
        config,
        format: cli.format,
    };
    debug!(command = ?cli.command, "Running command");

    match cli.command {
        Commands::Status => app.status(),
        Commands::Load { times, new_session } => app.load(times, new_session),
        Commands::Close => app.close(),
        Commands::OpenSettings => app.open_settings(),
        Commands::SetCount { count } => app.set_count(count),
        Commands::Enable => app.set_enabled(true),
        Commands::Disable => app.set_enabled(false),
        Commands::Reset => app.reset(),
        Commands::Prefs => app.prefs(),
    }
}

fn decision_label(decision: ShowDecision) -> &'static str {
    match decision {
        ShowDecision::Show => "show",
        ShowDecision::FeatureDisabled => "feature disabled",
        ShowDecision::AlreadyShownThisSession => "already shown this session",
        ShowDecision::CapReached => "show limit reached",
    }
}

fn visibility_label(visibility: BannerVisibility) -> &'static str {
    match visibility {
        BannerVisibility::Shown => "shown",
        BannerVisibility::Hidden => "hidden",
    }
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

impl App {
    fn banner(&self) -> SearchBanner {
        let banner = SearchBanner::new(self.governor.clone());
        match &self.telemetry {
            Some(telemetry) => banner.with_telemetry(telemetry.clone()),
            None => banner,
        }
    }

    fn events(&self) -> Vec<RecordedEvent> {
        self.telemetry
            .as_ref()
            .map(|t| t.snapshot_events(true))
            .unwrap_or_default()
    }

    fn print_status(&self, status: &GovernorStatus) {
        println!("enabled:            {}", status.enabled);
        println!(
            "show count:         {}/{}",
            status.show_count, status.max_show_count
        );
        println!("shown this session: {}", status.shown_this_session);
        println!("suppressed:         {}", status.suppressed);
        if let Some(pending) = status.pending_write {
            println!("pending write:      {pending}");
        }
        println!("decision:           {}", decision_label(status.decision));
    }

    fn status(&self) -> anyhow::Result<()> {
        let status = self.governor.status();
        match self.format {
            OutputFormat::Json => print_json(&json!({
                "status": status,
                "enabled_pref": self.config.banner.enabled_pref,
                "shown_pref": self.config.banner.shown_pref,
                "backend": self.config.prefs.backend.to_string(),
            })),
            OutputFormat::Plain => {
                self.print_status(&status);
                Ok(())
            }
        }
    }

    fn load(&self, times: u32, new_session: bool) -> anyhow::Result<()> {
        let mut results = Vec::with_capacity(times as usize);
        for load in 1..=times {
            if new_session {
                self.governor.reset_session();
            }
            let visibility = self.banner().on_page_load();
            results.push(LoadResult {
                load,
                visibility,
                show_count: self.governor.show_count(),
            });
        }
        let status = self.governor.status();

        match self.format {
            OutputFormat::Json => print_json(&json!({
                "loads": results,
                "status": status,
                "events": self.events(),
            })),
            OutputFormat::Plain => {
                for result in &results {
                    println!(
                        "load {}: {} (count {}/{})",
                        result.load,
                        visibility_label(result.visibility),
                        result.show_count,
                        status.max_show_count
                    );
                }
                if let Some(pending) = status.pending_write {
                    println!("warning: show count {pending} was not saved");
                }
                Ok(())
            }
        }
    }

    fn close(&self) -> anyhow::Result<()> {
        self.banner().on_close()?;
        self.report_action("closed", None)
    }

    fn open_settings(&self) -> anyhow::Result<()> {
        let target = self.banner().on_open_settings()?;
        self.report_action("open_settings", Some(target.url))
    }

    fn report_action(&self, action: &str, url: Option<String>) -> anyhow::Result<()> {
        let show_count = self.governor.show_count();
        match self.format {
            OutputFormat::Json => print_json(&json!({
                "action": action,
                "show_count": show_count,
                "url": url,
                "events": self.events(),
            })),
            OutputFormat::Plain => {
                println!("banner {action}; show count pinned at {show_count}");
                if let Some(url) = url {
                    println!("open {url}");
                }
                Ok(())
            }
        }
    }

    fn set_count(&self, count: i64) -> anyhow::Result<()> {
        let clamped = clamp_show_count(count);
        self.store
            .set_int(&self.config.banner.shown_pref, i64::from(clamped))
            .map_err(privbanner_core::Error::from)?;
        self.report_pref(&self.config.banner.shown_pref, json!(clamped))
    }

    fn set_enabled(&self, enabled: bool) -> anyhow::Result<()> {
        self.store
            .set_bool(&self.config.banner.enabled_pref, enabled)
            .map_err(privbanner_core::Error::from)?;
        self.report_pref(&self.config.banner.enabled_pref, json!(enabled))
    }

    fn reset(&self) -> anyhow::Result<()> {
        self.store
            .remove(&self.config.banner.shown_pref)
            .map_err(privbanner_core::Error::from)?;
        match self.format {
            OutputFormat::Json => print_json(&json!({
                "removed": self.config.banner.shown_pref,
            })),
            OutputFormat::Plain => {
                println!("removed {}", self.config.banner.shown_pref);
                Ok(())
            }
        }
    }

    fn report_pref(&self, key: &str, value: serde_json::Value) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Json => print_json(&json!({ "key": key, "value": value })),
            OutputFormat::Plain => {
                println!("{key} = {value}");
                Ok(())
            }
        }
    }

    fn prefs(&self) -> anyhow::Result<()> {
        let entries = self
            .store
            .entries()
            .map_err(privbanner_core::Error::from)?;
        match self.format {
            OutputFormat::Json => print_json(&entries),
            OutputFormat::Plain => {
                if entries.is_empty() {
                    println!("no prefs set");
                }
                for (key, value) in &entries {
                    println!("{key} = {value}");
                }
                Ok(())
            }
        }
    }
}
