//! Generated ad copy and blog content, validated before anything uses it.
//!
//! Responses are parsed strictly. Oversized or duplicated entries are
//! reported as violations; nothing is trimmed to fit.

use std::collections::HashMap;
use std::sync::Arc;

use acfy_adapters::TextGenerator;
use acfy_core::StructuredContent;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument};

use crate::error::EnrichmentValidationError;
use crate::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLimits {
    pub min_entries: usize,
    pub max_entries: usize,
    pub max_chars: usize,
}

/// Responsive search ad limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdCopyConstraints {
    pub headlines: FieldLimits,
    pub descriptions: FieldLimits,
    pub max_seed_keywords: usize,
}

impl Default for AdCopyConstraints {
    fn default() -> Self {
        Self {
            headlines: FieldLimits {
                min_entries: 3,
                max_entries: 15,
                max_chars: 30,
            },
            descriptions: FieldLimits {
                min_entries: 2,
                max_entries: 4,
                max_chars: 90,
            },
            max_seed_keywords: 15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArticleConstraints {
    pub min_chars: usize,
}

impl Default for ArticleConstraints {
    fn default() -> Self {
        Self { min_chars: 1500 }
    }
}

#[derive(Clone)]
pub struct EnrichmentPipeline {
    text: Arc<dyn TextGenerator>,
}

impl EnrichmentPipeline {
    pub fn new(text: Arc<dyn TextGenerator>) -> Self {
        Self { text }
    }

    /// Ad copy for the given seed keywords. No retry on a bad response.
    #[instrument(level = "info", skip_all, fields(seed_count = seeds.len()))]
    pub async fn enrich(
        &self,
        seeds: &[String],
        constraints: &AdCopyConstraints,
    ) -> Result<StructuredContent, SyncError> {
        let seeds = distinct_seeds(seeds, constraints.max_seed_keywords);
        if seeds.is_empty() {
            return Err(SyncError::empty("seed keywords for ad copy"));
        }

        let prompt = ad_copy_prompt(&seeds, constraints);
        let response = self
            .text
            .complete(&prompt)
            .await
            .map_err(|e| SyncError::fetch("ad copy generation", e))?;
        debug!(chars = response.len(), "ad copy response");

        let copy = parse_structured_content(&response, constraints)?;
        info!(
            headlines = copy.headlines.len(),
            descriptions = copy.descriptions.len(),
            "ad copy accepted"
        );
        Ok(copy)
    }

    #[instrument(level = "info", skip_all, fields(keyword_count = keywords.len(), count = count))]
    pub async fn blog_titles(&self, keywords: &[String], count: usize) -> Result<Vec<String>, SyncError> {
        if keywords.is_empty() || count == 0 {
            return Err(SyncError::empty("keywords for blog titles"));
        }
        let prompt = format!(
            "Generate {count} blog titles based on these keywords and return them as a JSON array of strings: {}.",
            keywords.join(", ")
        );
        let response = self
            .text
            .complete(&prompt)
            .await
            .map_err(|e| SyncError::fetch("blog title generation", e))?;

        let mut titles = parse_titles(&response)?;
        if titles.len() > count {
            info!(
                requested = count,
                returned = titles.len(),
                dropped = ?&titles[count..],
                "extra blog titles dropped"
            );
            titles.truncate(count);
        }
        Ok(titles)
    }

    #[instrument(level = "info", skip(self, keywords, constraints))]
    pub async fn blog_article(
        &self,
        title: &str,
        keywords: &[String],
        constraints: &ArticleConstraints,
    ) -> Result<String, SyncError> {
        let prompt = article_prompt(title, keywords, constraints);
        let response = self
            .text
            .complete(&prompt)
            .await
            .map_err(|e| SyncError::fetch(format!("article generation for {title:?}"), e))?;

        let body = strip_code_fences(&response).to_string();
        validate_article(&body, constraints)?;
        Ok(body)
    }
}

fn distinct_seeds(seeds: &[String], limit: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    seeds
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty() && seen.insert(s.to_lowercase()))
        .take(limit)
        .map(str::to_string)
        .collect()
}

fn ad_copy_prompt(seeds: &[String], c: &AdCopyConstraints) -> String {
    format!(
        "Generate {hmax} unique headlines and {dmax} unique descriptions for a Google Ads \
         responsive search ad.\n\
         Headlines: at most {hchars} characters including spaces, short and clear, no \
         duplicates, no `!` or `?` and no line breaks.\n\
         Descriptions: at most {dchars} characters including spaces, state the product benefit \
         and end with a call to action, no duplicates.\n\
         Follow Google Ads policies on punctuation and wording.\n\
         Optimise for these keywords: {keywords}.\n\
         Return only JSON in the form {{\"headlines\": [\"...\"], \"descriptions\": [\"...\"]}}.",
        hmax = c.headlines.max_entries,
        dmax = c.descriptions.max_entries,
        hchars = c.headlines.max_chars,
        dchars = c.descriptions.max_chars,
        keywords = seeds.join(", "),
    )
}

fn article_prompt(title: &str, keywords: &[String], c: &ArticleConstraints) -> String {
    format!(
        "Write an SEO-optimised blog article for the title below, with an introduction, body \
         sections, a conclusion and an FAQ section with three questions and answers.\n\
         Use verified data and avoid speculation.\n\
         Return HTML only: start with a <p> introduction, use <h2> for every section heading, \
         never use <h1> or numbered headings.\n\
         The article must be at least {min} characters long.\n\n\
         Title: {title}\n\
         Keywords: {keywords}",
        min = c.min_chars,
        keywords = keywords.join(", "),
    )
}

/// Removes a surrounding markdown code fence (with or without a language tag).
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[derive(Debug, Deserialize)]
struct RawAdCopy {
    #[serde(default)]
    headlines: Vec<String>,
    #[serde(default)]
    descriptions: Vec<String>,
}

/// Parses and validates generated ad copy, collecting every violation.
pub fn parse_structured_content(
    response: &str,
    constraints: &AdCopyConstraints,
) -> Result<StructuredContent, EnrichmentValidationError> {
    let raw: RawAdCopy = serde_json::from_str(strip_code_fences(response)).map_err(|err| {
        EnrichmentValidationError::single(format!("response is not the expected JSON object: {err}"))
    })?;

    let mut violations = Vec::new();
    let headlines = check_field("headline", raw.headlines, &constraints.headlines, &mut violations);
    let descriptions = check_field(
        "description",
        raw.descriptions,
        &constraints.descriptions,
        &mut violations,
    );

    if violations.is_empty() {
        Ok(StructuredContent {
            headlines,
            descriptions,
        })
    } else {
        Err(EnrichmentValidationError { violations })
    }
}

fn check_field(
    name: &str,
    entries: Vec<String>,
    limits: &FieldLimits,
    violations: &mut Vec<String>,
) -> Vec<String> {
    if entries.is_empty() {
        violations.push(format!("{name}s is empty"));
        return entries;
    }
    if entries.len() < limits.min_entries {
        violations.push(format!(
            "expected at least {} {name}s, got {}",
            limits.min_entries,
            entries.len()
        ));
    }
    if entries.len() > limits.max_entries {
        violations.push(format!(
            "expected at most {} {name}s, got {}",
            limits.max_entries,
            entries.len()
        ));
    }

    let mut first_seen: HashMap<String, usize> = HashMap::new();
    let mut cleaned = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let position = index + 1;
        let text = entry.trim().to_string();
        let chars = text.chars().count();
        if chars == 0 {
            violations.push(format!("{name} {position} is blank"));
        } else if chars > limits.max_chars {
            violations.push(format!(
                "{name} {position} is {chars} characters (max {})",
                limits.max_chars
            ));
        }
        if chars > 0 {
            if let Some(earlier) = first_seen.get(&text.to_lowercase()) {
                violations.push(format!("{name} {position} duplicates {name} {earlier}"));
            } else {
                first_seen.insert(text.to_lowercase(), position);
            }
        }
        cleaned.push(text);
    }
    cleaned
}

/// Accepts a JSON array of strings or `{"title": ...}` objects, or a single
/// such object.
pub fn parse_titles(response: &str) -> Result<Vec<String>, EnrichmentValidationError> {
    let value: JsonValue = serde_json::from_str(strip_code_fences(response)).map_err(|err| {
        EnrichmentValidationError::single(format!("titles are not valid JSON: {err}"))
    })?;

    let entries = match value {
        JsonValue::Array(items) => items,
        JsonValue::Object(_) => vec![value],
        _ => {
            return Err(EnrichmentValidationError::single(
                "titles must be a JSON array",
            ))
        }
    };
    if entries.is_empty() {
        return Err(EnrichmentValidationError::single("no titles returned"));
    }

    let mut violations = Vec::new();
    let mut first_seen: HashMap<String, usize> = HashMap::new();
    let mut titles = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let position = index + 1;
        let title = match entry {
            JsonValue::String(s) => Some(s.as_str()),
            JsonValue::Object(map) => map.get("title").and_then(JsonValue::as_str),
            _ => None,
        };
        match title.map(str::trim) {
            Some(t) if !t.is_empty() => {
                let folded = t.to_lowercase();
                if let Some(earlier) = first_seen.get(&folded) {
                    violations.push(format!("title {position} duplicates title {earlier}"));
                } else {
                    first_seen.insert(folded, position);
                }
                titles.push(t.to_string());
            }
            _ => violations.push(format!("title {position} is blank or missing")),
        }
    }

    if violations.is_empty() {
        Ok(titles)
    } else {
        Err(EnrichmentValidationError { violations })
    }
}

/// Structural checks on a generated HTML article.
pub fn validate_article(
    body: &str,
    constraints: &ArticleConstraints,
) -> Result<(), EnrichmentValidationError> {
    let mut violations = Vec::new();
    let lowered = body.trim_start().to_ascii_lowercase();
    if !(lowered.starts_with("<p>") || lowered.starts_with("<p ")) {
        violations.push("article must start with a <p> introduction".to_string());
    }

    let html = Html::parse_fragment(body);
    if count_elements(&html, "h2")? == 0 {
        violations.push("article has no <h2> sections".to_string());
    }
    if count_elements(&html, "h1")? > 0 {
        violations.push("article must not contain <h1>".to_string());
    }

    let chars = body.chars().count();
    if chars < constraints.min_chars {
        violations.push(format!(
            "article is {chars} characters (min {})",
            constraints.min_chars
        ));
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(EnrichmentValidationError { violations })
    }
}

fn count_elements(html: &Html, selector: &str) -> Result<usize, EnrichmentValidationError> {
    let sel = Selector::parse(selector)
        .map_err(|e| EnrichmentValidationError::single(format!("selector {selector}: {e}")))?;
    Ok(html.select(&sel).count())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use acfy_storage::FetchError;
    use async_trait::async_trait;

    use super::*;

    struct CannedText {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl CannedText {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for CannedText {
        async fn complete(&self, prompt: &str) -> Result<String, FetchError> {
            self.prompts.lock().expect("prompts").push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    fn article_body(extra: usize) -> String {
        format!(
            "<p>Why reusable bags matter.</p><h2>Materials</h2><p>{}</p>",
            "Jute is sturdy. ".repeat(extra)
        )
    }

    #[test]
    fn fences_with_language_tag_are_stripped() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n[1]\n```"), "[1]");
    }

    #[test]
    fn valid_copy_parses_and_trims_entries() {
        let response = r#"{"headlines":[" Eco Bags ","Jute Totes","Compost Bins"],
            "descriptions":["Durable bags for daily use.","Order today and save."]}"#;
        let copy = parse_structured_content(response, &AdCopyConstraints::default()).expect("copy");
        assert_eq!(copy.headlines[0], "Eco Bags");
        assert_eq!(copy.descriptions.len(), 2);
    }

    #[test]
    fn oversized_and_duplicate_entries_are_reported_not_corrected() {
        let long = "A headline that is far too long to fit";
        let response = format!(
            r#"{{"headlines":["Eco Bags","{long}","eco bags "],"descriptions":["Only one"]}}"#
        );
        let err = parse_structured_content(&response, &AdCopyConstraints::default())
            .expect_err("violations");

        assert!(err.violations.iter().any(|v| v.starts_with("headline 2 is 38 characters")));
        assert!(err.violations.iter().any(|v| v == "headline 3 duplicates headline 1"));
        assert!(err.violations.iter().any(|v| v.contains("at least 2 descriptions")));
        assert_eq!(err.violations.len(), 3);
    }

    #[test]
    fn missing_field_and_bad_json_fail_validation() {
        let err = parse_structured_content(r#"{"headlines":["a","b","c"]}"#, &AdCopyConstraints::default())
            .expect_err("empty descriptions");
        assert_eq!(err.violations, vec!["descriptions is empty".to_string()]);

        let err = parse_structured_content("Sure! Here you go.", &AdCopyConstraints::default())
            .expect_err("not json");
        assert!(err.violations[0].contains("not the expected JSON object"));
    }

    #[test]
    fn character_limit_counts_scalar_values() {
        let headline = "é".repeat(30);
        let response = format!(
            r#"{{"headlines":["{headline}","b","c"],"descriptions":["x","y"]}}"#
        );
        assert!(parse_structured_content(&response, &AdCopyConstraints::default()).is_ok());
    }

    #[test]
    fn titles_accept_strings_and_objects() {
        let titles = parse_titles(r#"["Why Jute", {"title": "Composting 101"}]"#).expect("titles");
        assert_eq!(titles, vec!["Why Jute", "Composting 101"]);

        let single = parse_titles(r#"{"title": "Only One"}"#).expect("single");
        assert_eq!(single, vec!["Only One"]);

        let err = parse_titles(r#"["Fine", {"title": "  "}]"#).expect_err("blank");
        assert_eq!(err.violations, vec!["title 2 is blank or missing".to_string()]);
    }

    #[test]
    fn repeated_titles_are_reported() {
        let err = parse_titles(r#"["Why Jute", "Composting 101", "why jute "]"#)
            .expect_err("duplicate");
        assert_eq!(err.violations, vec!["title 3 duplicates title 1".to_string()]);
    }

    #[tokio::test]
    async fn extra_titles_beyond_the_requested_count_are_dropped() {
        let text = CannedText::new(r#"["Why Jute", "Composting 101", "Tote Care"]"#);
        let pipeline = EnrichmentPipeline::new(text);
        let titles = pipeline
            .blog_titles(&["jute".to_string()], 2)
            .await
            .expect("titles");
        assert_eq!(titles, vec!["Why Jute", "Composting 101"]);
    }

    #[tokio::test]
    async fn duplicate_titles_fail_blog_title_generation() {
        let pipeline = EnrichmentPipeline::new(CannedText::new(r#"["Why Jute", "Why Jute"]"#));
        let err = pipeline
            .blog_titles(&["jute".to_string()], 5)
            .await
            .expect_err("duplicates");
        assert!(matches!(err, SyncError::EnrichmentValidation(_)));
    }

    #[test]
    fn article_structure_is_checked() {
        let constraints = ArticleConstraints { min_chars: 100 };
        assert!(validate_article(&article_body(10), &constraints).is_ok());

        let err = validate_article("<h1>Title</h1><p>short</p>", &constraints).expect_err("bad");
        assert_eq!(err.violations.len(), 4);
    }

    #[tokio::test]
    async fn enrich_rejects_empty_seed_set() {
        let pipeline = EnrichmentPipeline::new(CannedText::new("{}"));
        let err = pipeline
            .enrich(&["  ".to_string()], &AdCopyConstraints::default())
            .await
            .expect_err("empty");
        assert!(matches!(err, SyncError::EmptyInput { .. }));
    }

    #[tokio::test]
    async fn enrich_caps_and_dedups_seed_keywords() {
        let text = CannedText::new(
            r#"```json
{"headlines":["Eco Bags","Jute Totes","Compost Bins"],"descriptions":["Durable.","Order now."]}
```"#,
        );
        let pipeline = EnrichmentPipeline::new(text.clone());
        let seeds: Vec<String> = ["eco bag", "Eco Bag", "compost bin"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let constraints = AdCopyConstraints {
            max_seed_keywords: 1,
            ..Default::default()
        };

        pipeline.enrich(&seeds, &constraints).await.expect("copy");
        let prompts = text.prompts.lock().expect("prompts");
        assert!(prompts[0].contains("keywords: eco bag."));
        assert!(!prompts[0].contains("compost bin"));
    }

    #[tokio::test]
    async fn short_article_is_a_validation_error() {
        let pipeline = EnrichmentPipeline::new(CannedText::new(&article_body(1)));
        let err = pipeline
            .blog_article("Why Jute", &["jute".to_string()], &ArticleConstraints::default())
            .await
            .expect_err("too short");
        assert!(matches!(err, SyncError::EnrichmentValidation(_)));
    }
}
