mod alert;
mod browser;
mod config;
mod diff;
mod error;
mod extract;
mod health;
mod record;
mod retry;
mod runner;
mod store;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use chrono::{Local, NaiveDate};
use clap::{ArgAction, Parser, Subcommand};

use crate::browser::{HttpPageFactory, Profile};
use crate::config::{Settings, SiteConfig};
use crate::runner::RunOptions;
use crate::store::RunLayout;

#[derive(Parser)]
#[command(name = "landing_watch", about = "Landing page scraper with run-over-run diffing and health alerts")]
struct Cli {
    /// Settings file (YAML/JSON/TOML); WATCH_* env vars override it
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape the entry page for each profile, then validate, diff and alert
    Run {
        /// Site key, used as the data subdirectory (e.g. rossmann)
        #[arg(long)]
        site: String,
        /// Site config with entry_url and sections
        #[arg(short, long)]
        config: PathBuf,
        /// Comma-separated device profiles
        #[arg(long, default_value = "desktop")]
        profiles: String,
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        headless: bool,
        /// Record a browser trace where the page backend supports it
        #[arg(long)]
        tracing: bool,
        /// Save landing page snapshots under snapshots/
        #[arg(long)]
        save_snapshots: bool,
        /// Run date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Overrides the data_dir setting
        #[arg(long)]
        data_dir: Option<PathBuf>,
        #[arg(long)]
        proxy: Option<String>,
        /// User agent to rotate through (repeatable)
        #[arg(long = "user-agent")]
        user_agents: Vec<String>,
    },
    /// Diff a run directory against the previous run and print the report
    Diff {
        run_dir: PathBuf,
        /// Also write diff.json into the run directory
        #[arg(long)]
        write: bool,
    },
    /// Validate a run's records against a site config's minimum counts
    Validate {
        #[arg(short, long)]
        config: PathBuf,
        run_dir: PathBuf,
    },
    /// Load and check a site config
    CheckConfig {
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(cli.settings.as_deref())?;

    let result = match cli.command {
        Commands::Run {
            site,
            config,
            profiles,
            headless,
            tracing,
            save_snapshots,
            date,
            data_dir,
            proxy,
            user_agents,
        } => {
            let site_cfg = SiteConfig::load(&config)?;
            let profiles = Profile::parse_list(&profiles)?;
            anyhow::ensure!(!profiles.is_empty(), "No profiles given");
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            let data_dir = data_dir.unwrap_or_else(|| settings.data_dir.clone());
            let layout = RunLayout::new(data_dir, &site, date);
            let opts = RunOptions {
                profiles,
                headless,
                tracing,
                save_snapshots,
                proxy_url: proxy,
                user_agent_pool: (!user_agents.is_empty()).then_some(user_agents),
            };

            let factory = HttpPageFactory::new();
            let out = runner::run_site(
                &factory,
                &site_cfg,
                &opts,
                &settings,
                &layout,
                &alert::LogNotifier,
            )
            .await?;

            let s = &out.summary;
            println!(
                "{} {}: {} records, {}/{} profiles ok, health {:?}, ratio_change {:.3}{}",
                s.site,
                s.date,
                s.records,
                s.profiles.len() - s.errors_count,
                s.profiles.len(),
                out.health.status,
                out.diff.ratio_change,
                if out.alerted { " (alert sent)" } else { "" }
            );
            println!("Output: {}", layout.run_dir().display());
            Ok(())
        }
        Commands::Diff { run_dir, write } => {
            let report = diff::compute_diff(&run_dir)?;
            if write {
                store::write_json(&run_dir.join(store::DIFF_REPORT), &report)?;
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Validate { config, run_dir } => {
            let site_cfg = SiteConfig::load(&config)?;
            let records = store::read_records(&run_dir.join(store::RUN_LOG))
                .with_context(|| format!("No run log in {}", run_dir.display()))?;
            let report = health::validate(&site_cfg.sections, &records);
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::CheckConfig { config } => {
            let site_cfg = SiteConfig::load(&config)?;
            println!(
                "OK: {} sections, entry {}",
                site_cfg.sections.len(),
                site_cfg.site.entry_url
            );
            for s in &site_cfg.sections {
                let kind = if s.list.is_some() { "list" } else { "single" };
                println!(
                    "  {:<20} {:<6} fields={:<3} min_count={}",
                    s.name,
                    kind,
                    s.active_fields().len(),
                    s.validation.min_count
                );
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
