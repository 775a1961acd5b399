use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use acfy_adapters::openai::DEFAULT_MODEL;
use acfy_adapters::shopify::DEFAULT_API_VERSION;
use acfy_adapters::{OpenAiConfig, ShopifyConfig};
use acfy_storage::HttpClientConfig;

use crate::SyncError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub workspace_root: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub keyword_chunk_size: NonZeroUsize,
    pub metrics_chunk_size: NonZeroUsize,
    pub min_monthly_searches: i64,
    pub seed_keywords: Vec<String>,
    pub generate_blogs: bool,
    pub blog_title_count: usize,
    pub final_url: Option<String>,
    pub scheduler_enabled: bool,
    pub sync_cron_1: String,
    pub sync_cron_2: String,
    pub bind_addr: String,
    pub shopify: Option<ShopifyConfig>,
    pub openai: Option<OpenAiConfig>,
    pub google_ads_config_path: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let shopify = match (
            var("SHOPIFY_STORE_URL"),
            var("SHOPIFY_ACCESS_TOKEN"),
            var("SHOPIFY_BLOG_ID"),
        ) {
            (Some(store_url), Some(access_token), Some(blog_id)) => Some(ShopifyConfig {
                store_url,
                access_token,
                blog_id,
                api_version: var("SHOPIFY_API_VERSION")
                    .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            }),
            _ => None,
        };

        let openai = var("OPENAI_API_KEY").map(|key| {
            let mut config = OpenAiConfig::new(key);
            config.model = var("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
            config
        });

        Ok(Self {
            database_url: var("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://autocontentify.db".to_string()),
            workspace_root: var("ACFY_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            user_agent: var("ACFY_USER_AGENT").unwrap_or_else(|| "autocontentify/0.1".to_string()),
            http_timeout_secs: parse_or("ACFY_HTTP_TIMEOUT_SECS", var("ACFY_HTTP_TIMEOUT_SECS"), 30)?,
            keyword_chunk_size: chunk_size("ACFY_KEYWORD_CHUNK_SIZE", var("ACFY_KEYWORD_CHUNK_SIZE"), 20)?,
            metrics_chunk_size: chunk_size("ACFY_METRICS_CHUNK_SIZE", var("ACFY_METRICS_CHUNK_SIZE"), 1000)?,
            min_monthly_searches: parse_or(
                "ACFY_MIN_MONTHLY_SEARCHES",
                var("ACFY_MIN_MONTHLY_SEARCHES"),
                100,
            )?,
            seed_keywords: var("ACFY_SEED_KEYWORDS")
                .map(|raw| split_list(&raw))
                .unwrap_or_default(),
            generate_blogs: var("ACFY_GENERATE_BLOGS").is_some_and(|v| is_truthy(&v)),
            blog_title_count: parse_or("ACFY_BLOG_TITLE_COUNT", var("ACFY_BLOG_TITLE_COUNT"), 5)?,
            final_url: var("ACFY_FINAL_URL"),
            scheduler_enabled: var("ACFY_SCHEDULER_ENABLED").is_some_and(|v| is_truthy(&v)),
            sync_cron_1: var("SYNC_CRON_1").unwrap_or_else(|| "0 6 * * *".to_string()),
            sync_cron_2: var("SYNC_CRON_2").unwrap_or_else(|| "0 18 * * *".to_string()),
            bind_addr: var("ACFY_BIND").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            shopify,
            openai,
            google_ads_config_path: var("GOOGLE_ADS_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config/google_ads.yaml")),
        })
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            ..Default::default()
        }
    }

    pub fn reports_root(&self) -> PathBuf {
        self.workspace_root.join("reports")
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "True" | "yes")
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_or<T: std::str::FromStr>(key: &str, value: Option<String>, default: T) -> Result<T, SyncError> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| SyncError::Config(format!("{key} has invalid value {raw:?}"))),
    }
}

fn chunk_size(key: &str, value: Option<String>, default: usize) -> Result<NonZeroUsize, SyncError> {
    let size: usize = parse_or(key, value, default)?;
    NonZeroUsize::new(size).ok_or_else(|| SyncError::Config(format!("{key} must be greater than 0")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, SyncError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config_from(&[]).expect("config");
        assert_eq!(config.database_url, "sqlite://autocontentify.db");
        assert_eq!(config.keyword_chunk_size.get(), 20);
        assert_eq!(config.metrics_chunk_size.get(), 1000);
        assert_eq!(config.min_monthly_searches, 100);
        assert_eq!(config.sync_cron_1, "0 6 * * *");
        assert_eq!(config.sync_cron_2, "0 18 * * *");
        assert!(!config.generate_blogs);
        assert!(config.shopify.is_none());
        assert!(config.openai.is_none());
        assert_eq!(config.reports_root(), PathBuf::from("./reports"));
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let err = config_from(&[("ACFY_KEYWORD_CHUNK_SIZE", "0")]).expect_err("zero");
        assert!(matches!(err, SyncError::Config(msg) if msg.contains("ACFY_KEYWORD_CHUNK_SIZE")));
    }

    #[test]
    fn malformed_numbers_are_config_errors() {
        let err = config_from(&[("ACFY_HTTP_TIMEOUT_SECS", "soon")]).expect_err("bad number");
        assert!(err.to_string().contains("ACFY_HTTP_TIMEOUT_SECS"));
    }

    #[test]
    fn shopify_needs_store_token_and_blog() {
        let partial = config_from(&[
            ("SHOPIFY_STORE_URL", "https://eco.myshopify.com"),
            ("SHOPIFY_ACCESS_TOKEN", "shpat_x"),
        ])
        .expect("config");
        assert!(partial.shopify.is_none());

        let full = config_from(&[
            ("SHOPIFY_STORE_URL", "https://eco.myshopify.com"),
            ("SHOPIFY_ACCESS_TOKEN", "shpat_x"),
            ("SHOPIFY_BLOG_ID", "90210"),
        ])
        .expect("config");
        let shopify = full.shopify.expect("shopify");
        assert_eq!(shopify.api_version, "2023-10");
        assert_eq!(shopify.blog_id, "90210");
    }

    #[test]
    fn seed_keywords_are_split_and_trimmed() {
        let config = config_from(&[
            ("ACFY_SEED_KEYWORDS", " eco bag, ,compost bin "),
            ("ACFY_GENERATE_BLOGS", "true"),
            ("OPENAI_API_KEY", "sk-test"),
        ])
        .expect("config");
        assert_eq!(config.seed_keywords, vec!["eco bag", "compost bin"]);
        assert!(config.generate_blogs);
        assert_eq!(config.openai.expect("openai").model, "gpt-4o");
    }
}
