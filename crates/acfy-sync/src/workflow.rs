//! Fixed-order multi-step workflows with halt-on-failure.
//!
//! Steps run discovery, enrichment, remote creation, local persistence, in
//! that order (a workflow may leave one out). The first failing step halts
//! the run; what earlier steps created stays in place and is listed in the
//! report.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use acfy_adapters::AdsPlatform;
use acfy_core::{AdCampaignRecord, ContentDraft, StructuredContent};
use acfy_storage::{db, Database};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::enrichment::{AdCopyConstraints, ArticleConstraints, EnrichmentPipeline};
use crate::reconcile::Reconciler;
use crate::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    Discovery,
    Enrichment,
    RemoteCreation,
    LocalPersistence,
}

impl WorkflowStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Enrichment => "enrichment",
            Self::RemoteCreation => "remote_creation",
            Self::LocalPersistence => "local_persistence",
        }
    }
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepHalt {
    pub step: WorkflowStep,
    pub error: String,
    pub auth_failure: bool,
    /// The step had nothing to work on.
    pub empty_input: bool,
}

/// A remote entity that exists because of this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedResource {
    pub kind: String,
    pub resource: String,
}

impl CreatedResource {
    pub fn new(kind: &str, resource: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            resource: resource.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowReport {
    pub workflow: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub completed_steps: Vec<WorkflowStep>,
    pub created_resources: Vec<CreatedResource>,
    pub halted: Option<StepHalt>,
}

impl WorkflowReport {
    pub fn succeeded(&self) -> bool {
        self.halted.is_none()
    }
}

pub struct Sequencer {
    report: WorkflowReport,
}

impl Sequencer {
    pub fn new(workflow: &str, run_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            report: WorkflowReport {
                workflow: workflow.to_string(),
                run_id,
                started_at: now,
                finished_at: now,
                completed_steps: Vec::new(),
                created_resources: Vec::new(),
                halted: None,
            },
        }
    }

    pub fn is_halted(&self) -> bool {
        self.report.halted.is_some()
    }

    /// Runs one step. Returns `None` when the step fails or the workflow has
    /// already halted; the future is then never polled.
    pub async fn step<T, F>(&mut self, step: WorkflowStep, fut: F) -> Option<T>
    where
        F: Future<Output = Result<T, SyncError>>,
    {
        if let Some(halt) = &self.report.halted {
            debug!(step = %step, halted_at = %halt.step, "step not run");
            return None;
        }
        if let Some(last) = self.report.completed_steps.last().copied() {
            if step <= last {
                let err = SyncError::Config(format!("step {step} cannot run after {last}"));
                self.halt(step, &err);
                return None;
            }
        }

        let span = info_span!(
            "workflow_step",
            workflow = %self.report.workflow,
            run_id = %self.report.run_id,
            step = %step
        );
        match fut.instrument(span).await {
            Ok(value) => {
                self.report.completed_steps.push(step);
                Some(value)
            }
            Err(err) => {
                self.halt(step, &err);
                None
            }
        }
    }

    fn halt(&mut self, step: WorkflowStep, err: &SyncError) {
        error!(
            workflow = %self.report.workflow,
            run_id = %self.report.run_id,
            step = %step,
            completed = ?self.report.completed_steps,
            created = ?self.report.created_resources,
            error = %err,
            "workflow halted"
        );
        self.report.halted = Some(StepHalt {
            step,
            error: err.to_string(),
            auth_failure: err.is_auth_failure(),
            empty_input: matches!(err, SyncError::EmptyInput { .. }),
        });
    }

    pub fn record_resources(&mut self, created: Vec<CreatedResource>) {
        self.report.created_resources.extend(created);
    }

    pub fn finish(mut self) -> WorkflowReport {
        self.report.finished_at = Utc::now();
        self.report
    }
}

/// Entity name in the `<prefix> <entity> - <timestamp>` form.
pub fn resource_name(prefix: &str, entity: &str, at: DateTime<Utc>) -> String {
    format!("{prefix} {entity} - {}", at.format("%Y-%m-%d-%H%M%S"))
        .trim_start()
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdCampaignSettings {
    pub min_monthly_searches: i64,
    pub max_keywords: usize,
    pub budget_micros: i64,
    pub cpc_bid_micros: i64,
    pub final_url: String,
    pub name_prefix: String,
}

impl AdCampaignSettings {
    pub fn new(final_url: impl Into<String>) -> Self {
        Self {
            min_monthly_searches: 100,
            max_keywords: 15,
            budget_micros: 10_000_000,
            cpc_bid_micros: 1_000_000,
            final_url: final_url.into(),
            name_prefix: "SEARCH".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct CampaignResources {
    budget: String,
    campaign: String,
    ad_group: String,
    ad: String,
}

/// Keywords to ad copy to a paused search campaign, recorded locally.
pub struct AdCampaignWorkflow {
    db: Database,
    enrichment: EnrichmentPipeline,
    ads: Arc<dyn AdsPlatform>,
    settings: AdCampaignSettings,
    constraints: AdCopyConstraints,
}

impl AdCampaignWorkflow {
    pub fn new(
        db: Database,
        enrichment: EnrichmentPipeline,
        ads: Arc<dyn AdsPlatform>,
        settings: AdCampaignSettings,
    ) -> Self {
        Self {
            db,
            enrichment,
            ads,
            settings,
            constraints: AdCopyConstraints::default(),
        }
    }

    pub async fn run(&self, run_id: Uuid) -> WorkflowReport {
        let mut seq = Sequencer::new("ad_campaign", run_id);

        let keywords = seq
            .step(WorkflowStep::Discovery, self.discover_keywords())
            .await;
        let copy = match &keywords {
            Some(keywords) => {
                seq.step(
                    WorkflowStep::Enrichment,
                    self.enrichment.enrich(keywords, &self.constraints),
                )
                .await
            }
            None => None,
        };

        let mut created = Vec::new();
        let resources = match &copy {
            Some(copy) => {
                let outcome = seq
                    .step(
                        WorkflowStep::RemoteCreation,
                        self.create_remote(copy, &mut created),
                    )
                    .await;
                seq.record_resources(created);
                outcome
            }
            None => None,
        };

        if let (Some(keywords), Some(copy), Some(resources)) = (keywords, copy, resources) {
            let record = AdCampaignRecord {
                budget_resource: resources.budget,
                campaign_resource: resources.campaign,
                ad_group_resource: resources.ad_group,
                ad_resource: resources.ad,
                keywords,
                headlines: copy.headlines,
                descriptions: copy.descriptions,
                final_url: self.settings.final_url.clone(),
                created_at: Utc::now(),
            };
            seq.step(WorkflowStep::LocalPersistence, self.persist(record))
                .await;
        }

        let report = seq.finish();
        info!(
            run_id = %run_id,
            completed = report.completed_steps.len(),
            created = report.created_resources.len(),
            halted = report.halted.is_some(),
            "ad campaign workflow finished"
        );
        report
    }

    async fn discover_keywords(&self) -> Result<Vec<String>, SyncError> {
        let keywords = self
            .db
            .keywords_with_min_searches(self.settings.min_monthly_searches, self.settings.max_keywords)
            .await
            .map_err(|e| SyncError::persistence("keywords by search volume", e))?;
        if keywords.is_empty() {
            return Err(SyncError::empty(format!(
                "keywords with at least {} monthly searches",
                self.settings.min_monthly_searches
            )));
        }
        Ok(keywords.into_iter().map(|k| k.text).collect())
    }

    async fn create_remote(
        &self,
        copy: &StructuredContent,
        created: &mut Vec<CreatedResource>,
    ) -> Result<CampaignResources, SyncError> {
        let now = Utc::now();
        let prefix = &self.settings.name_prefix;
        let remote = |e| SyncError::fetch("ads platform", e);

        let budget = self
            .ads
            .create_campaign_budget(&resource_name(prefix, "Budget", now), self.settings.budget_micros)
            .await
            .map_err(remote)?;
        created.push(CreatedResource::new("campaign_budget", &budget));

        let campaign = self
            .ads
            .create_search_campaign(&resource_name(prefix, "Campaign", now), &budget)
            .await
            .map_err(remote)?;
        created.push(CreatedResource::new("campaign", &campaign));

        let criteria = self
            .ads
            .add_campaign_targeting(&campaign)
            .await
            .map_err(remote)?;
        created.extend(
            criteria
                .into_iter()
                .map(|c| CreatedResource::new("campaign_criterion", c)),
        );

        let ad_group = self
            .ads
            .create_ad_group(
                &resource_name("", "Ad Group", now),
                &campaign,
                self.settings.cpc_bid_micros,
            )
            .await
            .map_err(remote)?;
        created.push(CreatedResource::new("ad_group", &ad_group));

        let ad = self
            .ads
            .create_responsive_search_ad(&ad_group, copy, &self.settings.final_url)
            .await
            .map_err(remote)?;
        created.push(CreatedResource::new("ad_group_ad", &ad));

        Ok(CampaignResources {
            budget,
            campaign,
            ad_group,
            ad,
        })
    }

    async fn persist(&self, record: AdCampaignRecord) -> Result<(), SyncError> {
        let key = record.campaign_resource.clone();
        let persist = |e| SyncError::persistence(key.clone(), e);
        let mut tx = self.db.begin().await.map_err(persist)?;
        db::insert_ad_campaign(&mut tx, &record).await.map_err(persist)?;
        tx.commit().await.map_err(persist)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlogSettings {
    pub title_count: usize,
    pub max_keywords: usize,
    pub min_monthly_searches: i64,
}

impl Default for BlogSettings {
    fn default() -> Self {
        Self {
            title_count: 5,
            max_keywords: 15,
            min_monthly_searches: 0,
        }
    }
}

/// Keywords to titles to articles, queued as PENDING content through the
/// reconciler. Publishing is left to the next push.
pub struct BlogWorkflow {
    reconciler: Reconciler,
    enrichment: EnrichmentPipeline,
    settings: BlogSettings,
    article: ArticleConstraints,
}

impl BlogWorkflow {
    pub fn new(reconciler: Reconciler, enrichment: EnrichmentPipeline, settings: BlogSettings) -> Self {
        Self {
            reconciler,
            enrichment,
            settings,
            article: ArticleConstraints::default(),
        }
    }

    pub fn with_article_constraints(mut self, article: ArticleConstraints) -> Self {
        self.article = article;
        self
    }

    pub async fn run(&self, run_id: Uuid) -> WorkflowReport {
        let mut seq = Sequencer::new("blog_generation", run_id);

        let keywords = seq
            .step(WorkflowStep::Discovery, self.discover_keywords())
            .await;
        let articles = match &keywords {
            Some(keywords) => {
                seq.step(WorkflowStep::Enrichment, self.write_articles(keywords))
                    .await
            }
            None => None,
        };
        if let Some(articles) = articles {
            seq.step(WorkflowStep::LocalPersistence, self.persist(articles))
                .await;
        }

        let report = seq.finish();
        info!(
            run_id = %run_id,
            completed = report.completed_steps.len(),
            halted = report.halted.is_some(),
            "blog workflow finished"
        );
        report
    }

    async fn discover_keywords(&self) -> Result<Vec<String>, SyncError> {
        let keywords = self
            .reconciler
            .database()
            .keywords_with_min_searches(self.settings.min_monthly_searches, self.settings.max_keywords)
            .await
            .map_err(|e| SyncError::persistence("keywords for blog generation", e))?;
        if keywords.is_empty() {
            return Err(SyncError::empty("keywords for blog generation"));
        }
        Ok(keywords.into_iter().map(|k| k.text).collect())
    }

    async fn write_articles(&self, keywords: &[String]) -> Result<Vec<ContentDraft>, SyncError> {
        let titles = self
            .enrichment
            .blog_titles(keywords, self.settings.title_count)
            .await?;
        let mut articles = Vec::with_capacity(titles.len());
        for title in titles {
            let body = self
                .enrichment
                .blog_article(&title, keywords, &self.article)
                .await?;
            articles.push(ContentDraft { title, body });
        }
        Ok(articles)
    }

    async fn persist(&self, articles: Vec<ContentDraft>) -> Result<(), SyncError> {
        let ids = self.reconciler.queue_new_content(articles).await?;
        debug!(queued = ids.len(), "generated articles stored as pending");
        Ok(())
    }
}
