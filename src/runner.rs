use std::time::Instant;

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{info, warn};

use crate::alert::{self, Notifier};
use crate::browser::{BrowserConfig, Page, PageFactory, Profile};
use crate::config::{Settings, SiteConfig};
use crate::diff::{self, DiffReport};
use crate::error::PageError;
use crate::extract::extract_section;
use crate::health::{self, HealthReport};
use crate::record::Record;
use crate::store::{self, RunLayout, RunLog};

/// Per-run switches that are not part of the site config.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub profiles: Vec<Profile>,
    pub headless: bool,
    pub tracing: bool,
    pub save_snapshots: bool,
    pub proxy_url: Option<String>,
    pub user_agent_pool: Option<Vec<String>>,
}

impl RunOptions {
    fn browser_config(&self, profile: Profile) -> BrowserConfig {
        BrowserConfig {
            headless: self.headless,
            tracing: self.tracing,
            proxy_url: self.proxy_url.clone(),
            user_agent_pool: self.user_agent_pool.clone(),
            ..BrowserConfig::new(profile)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileOutcome {
    pub profile: Profile,
    pub started_utc: String,
    pub ok: bool,
    pub error: Option<String>,
    pub snapshot_path: Option<String>,
    pub duration_sec: f64,
    pub navigated_url: Option<String>,
    pub records: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub site: String,
    pub date: String,
    pub profiles: Vec<Profile>,
    pub ok: bool,
    pub visited_profiles: usize,
    pub errors_count: usize,
    pub records: usize,
    pub profiles_detail: Vec<ProfileOutcome>,
    pub generated_at_utc: String,
}

pub struct RunOutcome {
    pub summary: RunSummary,
    pub health: HealthReport,
    pub diff: DiffReport,
    pub alerted: bool,
}

/// Everything one profile task needs, borrowed from the caller.
struct ProfileJob<'a, F> {
    factory: &'a F,
    site: &'a SiteConfig,
    opts: &'a RunOptions,
    settings: &'a Settings,
    layout: &'a RunLayout,
    pb: &'a ProgressBar,
}

/// Run every profile, then persist records, health report, diff report and
/// summary, and dispatch an alert when warranted.
///
/// Profile failures are recorded in the summary; only persistence failures
/// make this return `Err`.
pub async fn run_site<F: PageFactory>(
    factory: &F,
    site: &SiteConfig,
    opts: &RunOptions,
    settings: &Settings,
    layout: &RunLayout,
    notifier: &dyn Notifier,
) -> Result<RunOutcome> {
    layout.ensure_dirs()?;
    info!(
        "Run for site={} profiles={:?} headless={} tracing={}",
        layout.site(),
        opts.profiles,
        opts.headless,
        opts.tracing
    );
    info!("Output dir: {}", layout.run_dir().display());

    let total = (opts.profiles.len() * site.sections.len()) as u64;
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} sections ({msg})")?
            .progress_chars("=> "),
    );

    let job = ProfileJob {
        factory,
        site,
        opts,
        settings,
        layout,
        pb: &pb,
    };
    // Profiles interleave on this task while awaiting I/O; each one's page
    // interactions stay ordered.
    let runs = join_all(opts.profiles.iter().map(|&p| run_profile(&job, p))).await;
    pb.finish_and_clear();

    // Single writer for the run log.
    let mut log = RunLog::open(&layout.run_log())?;
    let mut records: Vec<Record> = Vec::new();
    let mut details = Vec::with_capacity(runs.len());
    for (outcome, recs) in runs {
        log.append_all(&recs)?;
        records.extend(recs);
        details.push(outcome);
    }
    log.close()?;

    let health = health::validate(&site.sections, &records);
    store::write_json(&layout.health_report(), &health)?;
    info!("Health report ({:?}) saved -> {}", health.status, layout.health_report().display());

    let diff = diff::compute_diff(&layout.run_dir())?;
    store::write_json(&layout.diff_report(), &diff)?;
    info!(
        "Diff saved -> {} (+{} / -{}, ratio {:.3})",
        layout.diff_report().display(),
        diff.added.len(),
        diff.removed.len(),
        diff.ratio_change
    );

    let alerted = alert::dispatch(notifier, layout.site(), layout.date(), &health, &diff);

    let visited = details.iter().filter(|d| d.navigated_url.is_some()).count();
    let errors = details.iter().filter(|d| !d.ok).count();
    let summary = RunSummary {
        site: layout.site().to_string(),
        date: layout.date().format("%Y-%m-%d").to_string(),
        profiles: opts.profiles.clone(),
        ok: errors == 0 && visited > 0,
        visited_profiles: visited,
        errors_count: errors,
        records: records.len(),
        profiles_detail: details,
        generated_at_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    };
    store::write_json(&layout.run_summary(), &summary)?;

    Ok(RunOutcome {
        summary,
        health,
        diff,
        alerted,
    })
}

async fn run_profile<F: PageFactory>(
    job: &ProfileJob<'_, F>,
    profile: Profile,
) -> (ProfileOutcome, Vec<Record>) {
    let t0 = Instant::now();
    let mut outcome = ProfileOutcome {
        profile,
        started_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        ok: false,
        error: None,
        snapshot_path: None,
        duration_sec: 0.0,
        navigated_url: None,
        records: 0,
    };
    info!(
        "[{}] start | headless={} tracing={}",
        profile, job.opts.headless, job.opts.tracing
    );

    let records = match job.factory.open(&job.opts.browser_config(profile)).await {
        Ok(page) => {
            let result = drive_page(job, &page, profile, &mut outcome).await;
            page.close().await;
            result
        }
        Err(e) => Err(e),
    };

    let records = match records {
        Ok(records) => {
            outcome.ok = true;
            records
        }
        Err(e) => {
            warn!("[{}] scrape failed: {}", profile, e);
            let msg = e.to_string();
            match store::write_error_note(&job.layout.snapshots_dir(), profile.as_str(), &msg) {
                Ok(path) => outcome.snapshot_path = Some(path.display().to_string()),
                Err(e) => warn!("[{}] could not write error note: {:#}", profile, e),
            }
            outcome.error = Some(msg);
            Vec::new()
        }
    };

    outcome.records = records.len();
    outcome.duration_sec = (t0.elapsed().as_secs_f64() * 1000.0).round() / 1000.0;
    info!(
        "[{}] done | ok={} records={} duration={}s",
        profile, outcome.ok, outcome.records, outcome.duration_sec
    );
    (outcome, records)
}

/// Navigate → settle → snapshot → sections in configured order.
async fn drive_page<F: PageFactory>(
    job: &ProfileJob<'_, F>,
    page: &F::Page,
    profile: Profile,
    outcome: &mut ProfileOutcome,
) -> Result<Vec<Record>, PageError> {
    let url = job.site.site.entry_url.as_str();
    let label = format!("[{}] goto {}", profile, url);
    job.settings
        .retry_policy()
        .run(&label, || {
            page.navigate(url, job.settings.wait_until, job.settings.nav_timeout())
        })
        .await?;
    outcome.navigated_url = Some(url.to_string());
    page.settle(job.settings.settle()).await;

    if job.opts.save_snapshots {
        outcome.snapshot_path = save_landing_snapshot(job, page, profile).await;
    }

    let site_key = job.layout.site();
    let mut records = Vec::new();
    for section in &job.site.sections {
        job.pb.set_message(format!("{}/{}", profile, section.name));
        let extracted = tokio::time::timeout(
            job.settings.section_timeout(),
            extract_section(page, section, site_key, profile),
        )
        .await;
        match extracted {
            Ok(recs) => records.extend(recs),
            Err(_) => warn!(
                "[{}/{}] section {} timed out after {:?}",
                site_key,
                profile,
                section.name,
                job.settings.section_timeout()
            ),
        }
        job.pb.inc(1);
    }
    Ok(records)
}

async fn save_landing_snapshot<F: PageFactory>(
    job: &ProfileJob<'_, F>,
    page: &F::Page,
    profile: Profile,
) -> Option<String> {
    let html = match page.content().await {
        Ok(html) => html,
        Err(e) => {
            warn!("[{}] no page content for snapshot: {}", profile, e);
            return None;
        }
    };
    let png = page.screenshot().await.ok();
    let name = format!("{}-landing", profile);
    match store::save_snapshot(&job.layout.snapshots_dir(), &name, &html, png.as_deref()) {
        Ok(path) => Some(path.display().to_string()),
        Err(e) => {
            warn!("[{}] snapshot not saved: {:#}", profile, e);
            None
        }
    }
}

// ── Tests ──
