//! Sync engine: keyword discovery, content and catalog reconciliation, and
//! the generation workflows, run as independent jobs of one pipeline run.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use acfy_adapters::{
    AdsPlatform, GoogleAdsClient, GoogleAdsConfig, KeywordPlanner, KeywordResult, OpenAiClient,
    RemoteListingClient, Resource, ShopifyClient, TextGenerator,
};
use acfy_core::KeywordRecord;
use acfy_storage::{BackoffPolicy, Database, StoreCounts};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::fs;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod batch;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod identity;
pub mod pagination;
pub mod reconcile;
pub mod retry;
pub mod workflow;

pub use batch::chunk;
pub use config::AppConfig;
pub use enrichment::{AdCopyConstraints, ArticleConstraints, EnrichmentPipeline};
pub use error::{EnrichmentValidationError, SyncError};
pub use pagination::{CursorWalker, KeywordIdeaSource, ListingSource, PageSource};
pub use reconcile::{Decision, ReconcileReport, Reconciler, RecordFailure};
pub use retry::retry_with_backoff;
pub use workflow::{
    AdCampaignSettings, AdCampaignWorkflow, BlogSettings, BlogWorkflow, CreatedResource,
    Sequencer, StepHalt, WorkflowReport, WorkflowStep,
};

pub const CRATE_NAME: &str = "acfy-sync";

/// Remote collaborators; each is present only when its credentials are.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub listing: Option<Arc<dyn RemoteListingClient>>,
    pub text: Option<Arc<dyn TextGenerator>>,
    pub planner: Option<Arc<dyn KeywordPlanner>>,
    pub ads: Option<Arc<dyn AdsPlatform>>,
}

impl Collaborators {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let http = config.http_client_config();
        let mut collaborators = Self::default();

        if let Some(shopify) = &config.shopify {
            let client = ShopifyClient::new(shopify.clone(), http.clone())
                .context("building shopify client")?;
            collaborators.listing = Some(Arc::new(client));
        }
        if let Some(openai) = &config.openai {
            let client = OpenAiClient::new(openai.clone(), http.clone())
                .context("building openai client")?;
            collaborators.text = Some(Arc::new(client));
        }
        if config.google_ads_config_path.exists() {
            let ads_config = GoogleAdsConfig::from_yaml_file(&config.google_ads_config_path)?;
            let client = Arc::new(
                GoogleAdsClient::new(ads_config, http).context("building google ads client")?,
            );
            collaborators.planner = Some(client.clone());
            collaborators.ads = Some(client);
        } else {
            debug!(
                path = %config.google_ads_config_path.display(),
                "no google ads config; keyword and ad jobs disabled"
            );
        }
        Ok(collaborators)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Job {
    KeywordDiscovery,
    KeywordMetrics,
    BlogGeneration,
    BlogSync,
    ProductSync,
    AdCampaign,
}

impl Job {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::KeywordDiscovery => "keyword_discovery",
            Self::KeywordMetrics => "keyword_metrics",
            Self::BlogGeneration => "blog_generation",
            Self::BlogSync => "blog_sync",
            Self::ProductSync => "product_sync",
            Self::AdCampaign => "ad_campaign",
        }
    }
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Completed,
    Skipped,
    Failed,
    /// An earlier auth failure ended the run first.
    NotRun,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::NotRun => "not_run",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub job: Job,
    pub status: JobStatus,
    pub reports: BTreeMap<String, ReconcileReport>,
    pub workflow: Option<WorkflowReport>,
    pub error: Option<String>,
    pub auth_failure: bool,
}

impl JobResult {
    fn new(job: Job, status: JobStatus) -> Self {
        Self {
            job,
            status,
            reports: BTreeMap::new(),
            workflow: None,
            error: None,
            auth_failure: false,
        }
    }

    /// All reconciliation reports of the job added together.
    pub fn totals(&self) -> ReconcileReport {
        let mut total = ReconcileReport::default();
        for report in self.reports.values() {
            total.merge(report.clone());
        }
        total
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub jobs: Vec<JobResult>,
    pub aborted: bool,
    pub store: StoreCounts,
    pub reports_dir: String,
}

#[derive(Debug, Default)]
struct JobOutput {
    reports: BTreeMap<String, ReconcileReport>,
    workflow: Option<WorkflowReport>,
}

impl JobOutput {
    fn single(name: &str, report: ReconcileReport) -> Self {
        let mut out = Self::default();
        out.reports.insert(name.to_string(), report);
        out
    }
}

pub struct SyncPipeline {
    config: AppConfig,
    db: Database,
    reconciler: Reconciler,
    collaborators: Collaborators,
    backoff: BackoffPolicy,
}

impl SyncPipeline {
    pub fn new(config: AppConfig, db: Database, collaborators: Collaborators) -> Self {
        Self {
            config,
            reconciler: Reconciler::new(db.clone()),
            db,
            collaborators,
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Jobs of a scheduled run, in order.
    pub fn planned_jobs(&self) -> Vec<Job> {
        let mut jobs = vec![Job::KeywordDiscovery, Job::KeywordMetrics];
        if self.config.generate_blogs {
            jobs.push(Job::BlogGeneration);
        }
        jobs.extend([Job::BlogSync, Job::ProductSync]);
        jobs
    }

    /// Runs every planned job, then writes the run's reports. An auth
    /// failure stops the remaining jobs; any other failure does not.
    pub async fn run_once(&self) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        info!(%run_id, "sync run started");

        let mut jobs = Vec::new();
        let mut aborted = false;
        for job in self.planned_jobs() {
            if aborted {
                jobs.push(JobResult::new(job, JobStatus::NotRun));
                continue;
            }
            let result = self.run_job(job, run_id).await;
            if result.auth_failure {
                error!(%run_id, job = %job, "auth failure; ending run");
                aborted = true;
            }
            jobs.push(result);
        }

        let store = match self.db.counts().await {
            Ok(counts) => counts,
            Err(err) => {
                warn!(error = %err, "store counts unavailable");
                StoreCounts::default()
            }
        };

        let mut summary = SyncRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            jobs,
            aborted,
            store,
            reports_dir: String::new(),
        };
        let reports_dir = self.write_reports(&summary).await?;
        summary.reports_dir = reports_dir.display().to_string();
        info!(%run_id, aborted, reports_dir = %summary.reports_dir, "sync run finished");
        Ok(summary)
    }

    /// Runs one job and classifies its outcome. Never fails as a whole.
    pub async fn run_job(&self, job: Job, run_id: Uuid) -> JobResult {
        if let Some(missing) = self.missing_collaborator(job) {
            info!(job = %job, missing, "job skipped");
            let mut result = JobResult::new(job, JobStatus::Skipped);
            result.error = Some(format!("{missing} is not configured"));
            return result;
        }

        let span = info_span!("job", %run_id, job = %job);
        let outcome = self.execute(job, run_id).instrument(span).await;

        match outcome {
            Ok(output) => {
                let mut result = JobResult::new(job, JobStatus::Completed);
                if let Some(halt) = output.workflow.as_ref().and_then(|w| w.halted.as_ref()) {
                    result.status = if halt.empty_input {
                        JobStatus::Skipped
                    } else {
                        JobStatus::Failed
                    };
                    result.error = Some(format!("halted at {}: {}", halt.step, halt.error));
                    result.auth_failure = halt.auth_failure;
                }
                if output.reports.values().any(|r| r.aborted) {
                    result.status = JobStatus::Failed;
                    result.error = Some("auth failure; unprocessed records left pending".to_string());
                    result.auth_failure = true;
                }
                result.reports = output.reports;
                result.workflow = output.workflow;
                result
            }
            Err(err) => {
                let status = if matches!(err, SyncError::EmptyInput { .. }) {
                    JobStatus::Skipped
                } else {
                    JobStatus::Failed
                };
                if status == JobStatus::Failed {
                    error!(job = %job, error = %err, "job failed");
                }
                let mut result = JobResult::new(job, status);
                result.auth_failure = err.is_auth_failure();
                result.error = Some(err.to_string());
                result
            }
        }
    }

    fn missing_collaborator(&self, job: Job) -> Option<&'static str> {
        let c = &self.collaborators;
        match job {
            Job::KeywordDiscovery | Job::KeywordMetrics if c.planner.is_none() => {
                Some("keyword planner")
            }
            Job::BlogGeneration if c.text.is_none() => Some("text generator"),
            Job::BlogSync | Job::ProductSync if c.listing.is_none() => Some("content platform"),
            Job::AdCampaign if c.text.is_none() => Some("text generator"),
            Job::AdCampaign if c.ads.is_none() => Some("ads platform"),
            _ => None,
        }
    }

    async fn execute(&self, job: Job, run_id: Uuid) -> Result<JobOutput, SyncError> {
        match job {
            Job::KeywordDiscovery => Ok(JobOutput::single(
                "keywords",
                self.discover_keywords(&[]).await?,
            )),
            Job::KeywordMetrics => Ok(JobOutput::single(
                "metrics",
                self.refresh_keyword_metrics().await?,
            )),
            Job::BlogGeneration => Ok(JobOutput {
                workflow: Some(self.generate_blogs(run_id).await?),
                ..Default::default()
            }),
            Job::BlogSync => {
                let mut out = JobOutput::single("pull", self.pull_blogs().await?);
                out.reports.insert("push".to_string(), self.push_blogs().await?);
                Ok(out)
            }
            Job::ProductSync => Ok(JobOutput::single("products", self.pull_products().await?)),
            Job::AdCampaign => Ok(JobOutput {
                workflow: Some(self.create_ad_campaign(run_id).await?),
                ..Default::default()
            }),
        }
    }

    fn listing(&self) -> Result<&Arc<dyn RemoteListingClient>, SyncError> {
        self.collaborators
            .listing
            .as_ref()
            .ok_or_else(|| SyncError::Config("content platform is not configured".to_string()))
    }

    fn planner(&self) -> Result<&Arc<dyn KeywordPlanner>, SyncError> {
        self.collaborators
            .planner
            .as_ref()
            .ok_or_else(|| SyncError::Config("keyword planner is not configured".to_string()))
    }

    fn enrichment(&self) -> Result<EnrichmentPipeline, SyncError> {
        self.collaborators
            .text
            .clone()
            .map(EnrichmentPipeline::new)
            .ok_or_else(|| SyncError::Config("text generator is not configured".to_string()))
    }

    /// Keyword ideas for the stored and configured seeds, insert-only.
    pub async fn discover_keywords(&self, extra_seeds: &[String]) -> Result<ReconcileReport, SyncError> {
        let planner = self.planner()?;
        let mut seeds = self
            .db
            .keyword_texts()
            .await
            .map_err(|e| SyncError::persistence("seed keywords", e))?;
        seeds.extend(self.config.seed_keywords.iter().cloned());
        seeds.extend(extra_seeds.iter().map(|s| s.trim().to_string()));
        let mut seen = HashSet::new();
        seeds.retain(|s| !s.is_empty() && seen.insert(s.clone()));
        if seeds.is_empty() {
            return Err(SyncError::empty("seed keywords"));
        }

        let mut report = ReconcileReport::default();
        for (index, batch) in chunk(seeds, self.config.keyword_chunk_size).enumerate() {
            let ideas = retry_with_backoff(&self.backoff, "keyword ideas", || {
                let planner = Arc::clone(planner);
                let batch = batch.clone();
                async move {
                    let mut walker = CursorWalker::new(KeywordIdeaSource::new(planner, batch));
                    walker.collect_all().await
                }
            })
            .await;
            match ideas {
                Ok(ideas) => {
                    debug!(batch = index, ideas = ideas.len(), "keyword ideas fetched");
                    let ideas = accept_decoded(ideas, &mut report);
                    report.merge(self.reconciler.insert_new_keywords(ideas).await);
                }
                Err(err) if err.is_auth_failure() => return Err(err),
                Err(err) => report.fail(format!("seed batch {index}"), &err),
            }
        }
        info!(
            inserted = report.inserted,
            skipped = report.skipped,
            failed = report.failures.len(),
            "keyword discovery done"
        );
        Ok(report)
    }

    /// Historical metrics for every stored keyword, in batches.
    pub async fn refresh_keyword_metrics(&self) -> Result<ReconcileReport, SyncError> {
        let planner = self.planner()?;
        let keywords = self
            .db
            .keyword_texts()
            .await
            .map_err(|e| SyncError::persistence("stored keywords", e))?;
        if keywords.is_empty() {
            return Err(SyncError::empty("stored keywords"));
        }

        let mut report = ReconcileReport::default();
        for (index, batch) in chunk(keywords, self.config.metrics_chunk_size).enumerate() {
            let metrics: Result<Vec<KeywordResult>, SyncError> =
                retry_with_backoff(&self.backoff, "historical metrics", || {
                    let planner = Arc::clone(planner);
                    let batch = batch.clone();
                    async move {
                        planner
                            .historical_metrics(&batch)
                            .await
                            .map_err(|e| SyncError::fetch("historical metrics", e))
                    }
                })
                .await;
            match metrics {
                Ok(metrics) => {
                    let metrics = accept_decoded(metrics, &mut report);
                    report.merge(self.reconciler.upsert_keyword_metrics(metrics).await);
                }
                Err(err) if err.is_auth_failure() => return Err(err),
                Err(err) => report.fail(format!("metrics batch {index}"), &err),
            }
        }
        info!(
            inserted = report.inserted,
            updated = report.updated,
            skipped = report.skipped,
            "keyword metrics refreshed"
        );
        Ok(report)
    }

    async fn walk_listing(&self, resource: Resource) -> Result<Vec<JsonValue>, SyncError> {
        let client = self.listing()?;
        retry_with_backoff(&self.backoff, resource.as_str(), || {
            let client = Arc::clone(client);
            async move {
                let mut walker = CursorWalker::new(ListingSource::new(client, resource));
                walker.collect_all().await
            }
        })
        .await
    }

    pub async fn pull_blogs(&self) -> Result<ReconcileReport, SyncError> {
        let articles = self.walk_listing(Resource::Articles).await?;
        Ok(self.reconciler.pull_content(articles).await)
    }

    pub async fn push_blogs(&self) -> Result<ReconcileReport, SyncError> {
        let client = self.listing()?;
        self.reconciler.push_pending_content(client.as_ref()).await
    }

    pub async fn generate_blogs(&self, run_id: Uuid) -> Result<WorkflowReport, SyncError> {
        let settings = BlogSettings {
            title_count: self.config.blog_title_count,
            ..Default::default()
        };
        let workflow = BlogWorkflow::new(self.reconciler.clone(), self.enrichment()?, settings);
        Ok(workflow.run(run_id).await)
    }

    pub async fn pull_products(&self) -> Result<ReconcileReport, SyncError> {
        let products = self.walk_listing(Resource::Products).await?;
        Ok(self.reconciler.pull_catalog(products).await)
    }

    pub async fn delete_product(&self, remote_id: i64) -> Result<bool, SyncError> {
        self.reconciler.delete_catalog_item(remote_id).await
    }

    pub async fn create_ad_campaign(&self, run_id: Uuid) -> Result<WorkflowReport, SyncError> {
        let ads = self
            .collaborators
            .ads
            .clone()
            .ok_or_else(|| SyncError::Config("ads platform is not configured".to_string()))?;
        let final_url = self
            .config
            .final_url
            .clone()
            .ok_or_else(|| SyncError::Config("ACFY_FINAL_URL is required for ad campaigns".to_string()))?;
        let mut settings = AdCampaignSettings::new(final_url);
        settings.min_monthly_searches = self.config.min_monthly_searches;

        let workflow = AdCampaignWorkflow::new(self.db.clone(), self.enrichment()?, ads, settings);
        Ok(workflow.run(run_id).await)
    }

    pub async fn maybe_build_scheduler(self: &Arc<Self>) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        for cron in [&self.config.sync_cron_1, &self.config.sync_cron_2] {
            let pipeline = Arc::clone(self);
            let job = CronJob::new_async(cron.as_str(), move |_uuid, _l| {
                let pipeline = Arc::clone(&pipeline);
                Box::pin(async move {
                    match pipeline.run_once().await {
                        Ok(summary) => info!(run_id = %summary.run_id, "scheduled sync finished"),
                        Err(err) => error!(error = %err, "scheduled sync failed"),
                    }
                })
            })
            .with_context(|| format!("creating scheduler job for cron {cron}"))?;
            sched.add(job).await.context("adding scheduler job")?;
        }
        Ok(Some(sched))
    }

    async fn write_reports(&self, summary: &SyncRunSummary) -> Result<PathBuf> {
        let reports_dir = self.config.reports_root().join(summary.run_id.to_string());
        fs::create_dir_all(&reports_dir)
            .await
            .with_context(|| format!("creating {}", reports_dir.display()))?;

        let json = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
        fs::write(reports_dir.join("run_summary.json"), json)
            .await
            .context("writing run_summary.json")?;
        fs::write(reports_dir.join("daily_brief.md"), daily_brief(summary))
            .await
            .context("writing daily_brief.md")?;
        Ok(reports_dir)
    }
}

/// Keeps the decoded keywords and records every rejected result as a failure.
fn accept_decoded(results: Vec<KeywordResult>, report: &mut ReconcileReport) -> Vec<KeywordRecord> {
    let mut accepted = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(record) => accepted.push(record),
            Err(err) => {
                let key = format!("keyword {}", err.key);
                report.fail(key, &SyncError::from(err));
            }
        }
    }
    accepted
}

/// Markdown digest of one run.
pub fn daily_brief(summary: &SyncRunSummary) -> String {
    let jobs = summary
        .jobs
        .iter()
        .map(|job| {
            let totals = job.totals();
            let mut line = format!(
                "- {}: {} (inserted {}, updated {}, skipped {}, failed {})",
                job.job,
                job.status.as_str(),
                totals.inserted,
                totals.updated,
                totals.skipped,
                totals.failures.len()
            );
            if let Some(err) = &job.error {
                line.push_str(&format!("\n  - {err}"));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n");

    let s = &summary.store;
    format!(
        "# AutoContentify Daily Brief\n\n- Run ID: `{}`\n- Started: {}\n- Finished: {}\n- Aborted: {}\n\n## Jobs\n{}\n\n## Store\n- keywords: {}\n- content pending: {}\n- content synced: {}\n- catalog items: {}\n- catalog variants: {}\n- ad campaigns: {}\n",
        summary.run_id,
        summary.started_at,
        summary.finished_at,
        if summary.aborted { "yes" } else { "no" },
        jobs,
        s.keywords,
        s.content_pending,
        s.content_synced,
        s.catalog_items,
        s.catalog_variants,
        s.ad_campaigns,
    )
}

pub async fn open_database(config: &AppConfig) -> Result<Database> {
    let db = Database::connect(&config.database_url).await?;
    db.ensure_schema().await?;
    Ok(db)
}

pub async fn run_sync_once_from_env() -> Result<SyncRunSummary> {
    let config = AppConfig::from_env()?;
    let db = open_database(&config).await?;
    let collaborators = Collaborators::from_config(&config)?;
    SyncPipeline::new(config, db, collaborators).run_once().await
}
