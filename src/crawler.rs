use futures::future::join_all;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeSet, HashMap, HashSet};
use url::Url;

use crate::error::{CrawlError, FailureKind};
use crate::links::PageLink;
use crate::renderer::PageRenderer;
use crate::utils::{Throttle, hostname_of, matches_any, normalize_url};

/// Substrings that keep a URL out of the frontier unless overridden
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    "mailto:", "tel:", "javascript:", "#", ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".ppt",
    ".pptx", ".zip", ".rar", ".tar", ".gz", ".7z", ".exe", ".dmg",
];

/// Limits for one crawl run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlOptions {
    /// Number of breadth-first levels to fetch (1 = start page only)
    pub max_depth: usize,

    /// Maximum number of URLs dispatched for fetching
    pub max_pages: usize,

    /// Only follow links on the start URL's hostname
    pub same_domain: bool,

    /// URLs containing any of these substrings are never followed
    pub exclude_patterns: Vec<String>,

    /// When non-empty, a URL must contain one of these substrings to be followed
    pub include_patterns: Vec<String>,

    /// Pause between depth levels, in milliseconds
    pub delay_ms: u64,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_pages: 100,
            same_domain: true,
            exclude_patterns: DEFAULT_EXCLUDE_PATTERNS.iter().map(|p| p.to_string()).collect(),
            include_patterns: Vec::new(),
            delay_ms: 1000,
        }
    }
}

/// Visited URL → links found on it, in the order pages were recorded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkMap {
    entries: Vec<(String, Vec<PageLink>)>,
    index: HashMap<String, usize>,
}

impl LinkMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the links recorded for `url`.
    pub fn insert(&mut self, url: String, links: Vec<PageLink>) {
        match self.index.get(&url) {
            Some(&slot) => self.entries[slot].1 = links,
            None => {
                self.index.insert(url.clone(), self.entries.len());
                self.entries.push((url, links));
            }
        }
    }

    pub fn get(&self, url: &str) -> Option<&[PageLink]> {
        self.index
            .get(url)
            .map(|&slot| self.entries[slot].1.as_slice())
    }

    pub fn contains(&self, url: &str) -> bool {
        self.index.contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(u, _)| u.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[PageLink])> {
        self.entries.iter().map(|(u, l)| (u.as_str(), l.as_slice()))
    }

    pub fn total_links(&self) -> usize {
        self.entries.iter().map(|(_, l)| l.len()).sum()
    }

    fn filtered(&self, keep: impl Fn(&PageLink) -> bool) -> LinkMap {
        LinkMap {
            entries: self
                .entries
                .iter()
                .map(|(u, links)| (u.clone(), links.iter().filter(|l| keep(l)).cloned().collect()))
                .collect(),
            index: self.index.clone(),
        }
    }
}

impl Serialize for LinkMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (url, links) in &self.entries {
            map.serialize_entry(url, links)?;
        }
        map.end()
    }
}

/// Flattened link-map entry for export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedPage {
    pub url: String,
    pub links: Vec<PageLink>,
}

/// A page that was dispatched but produced no link-map entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageFailure {
    pub url: String,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrawlResult {
    pub run_id: String,
    pub success: bool,
    pub start_url: String,
    pub link_map: LinkMap,
    /// Pages fetched successfully
    pub total_pages: usize,
    pub total_links: usize,
    pub failures: Vec<PageFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: String,
    pub finished_at: String,
}

impl CrawlResult {
    /// Completed, but some pages could not be fetched.
    pub fn is_partial(&self) -> bool {
        self.success && !self.failures.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlStats {
    pub visited_count: usize,
    pub total_links: usize,
    pub domains: Vec<String>,
    pub average_links_per_page: f64,
}

#[derive(Debug, Default)]
struct RunState {
    visited: HashSet<String>,
    link_map: LinkMap,
    failures: Vec<PageFailure>,
    depth: usize,
}

/// Breadth-first crawler over a [`PageRenderer`].
///
/// `crawl` takes `&mut self`, so a crawler runs one crawl at a time; each call
/// starts from fresh state and the post-run views reflect the latest run.
pub struct SiteCrawler<R: PageRenderer> {
    renderer: R,
    last_run: RunState,
}

impl<R: PageRenderer> SiteCrawler<R> {
    pub fn new(renderer: R) -> Self {
        Self {
            renderer,
            last_run: RunState::default(),
        }
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub async fn crawl(&mut self, start_url: &str, options: &CrawlOptions) -> CrawlResult {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = chrono::Utc::now().to_rfc3339();
        self.last_run = RunState::default();

        log::info!(
            "Starting crawl {} of {} (max depth {}, max pages {})",
            run_id,
            start_url,
            options.max_depth,
            options.max_pages
        );

        match self.run(start_url, options).await {
            Ok((start, state)) => {
                let total_pages = state.link_map.len();
                let total_links = state.link_map.total_links();

                log::info!(
                    "Crawl {} finished: {} pages, {} links, {} failures, depth {}",
                    run_id,
                    total_pages,
                    total_links,
                    state.failures.len(),
                    state.depth
                );

                let result = CrawlResult {
                    run_id,
                    success: true,
                    start_url: start,
                    link_map: state.link_map.clone(),
                    total_pages,
                    total_links,
                    failures: state.failures.clone(),
                    error: None,
                    started_at,
                    finished_at: chrono::Utc::now().to_rfc3339(),
                };
                self.last_run = state;
                result
            }
            Err(e) => {
                log::error!("Crawl {} aborted: {}", run_id, e);
                CrawlResult {
                    run_id,
                    success: false,
                    start_url: normalize_url(start_url),
                    link_map: LinkMap::new(),
                    total_pages: 0,
                    total_links: 0,
                    failures: Vec::new(),
                    error: Some(e.to_string()),
                    started_at,
                    finished_at: chrono::Utc::now().to_rfc3339(),
                }
            }
        }
    }

    async fn run(&self, start_url: &str, options: &CrawlOptions) -> Result<(String, RunState), CrawlError> {
        let start = normalize_url(start_url);
        let parsed = Url::parse(&start).map_err(|e| CrawlError::InvalidStartUrl {
            url: start_url.to_string(),
            reason: e.to_string(),
        })?;
        let start_host = parsed
            .host_str()
            .ok_or_else(|| CrawlError::InvalidStartUrl {
                url: start_url.to_string(),
                reason: "URL has no host".to_string(),
            })?
            .to_string();

        self.renderer
            .check_ready()
            .await
            .map_err(|e| CrawlError::RunAborted(e.to_string()))?;

        let throttle = Throttle::from_millis(options.delay_ms);
        let mut state = RunState::default();
        let mut frontier = vec![start.clone()];

        while !frontier.is_empty() && state.depth < options.max_depth {
            let batch = std::mem::take(&mut frontier);

            // Claim every URL in the visited set before anything is in flight.
            let mut dispatched = Vec::with_capacity(batch.len());
            for url in batch {
                if state.visited.contains(&url) {
                    log::debug!("Already visited: {}", url);
                    continue;
                }
                if state.visited.len() >= options.max_pages {
                    log::debug!("Page budget reached, skipping {}", url);
                    continue;
                }
                state.visited.insert(url.clone());
                dispatched.push(url);
            }

            log::info!("Depth {}: fetching {} page(s)", state.depth + 1, dispatched.len());

            let outcomes = join_all(dispatched.iter().map(|url| self.renderer.fetch_links(url))).await;

            let mut discovered = Vec::new();
            for (url, outcome) in dispatched.into_iter().zip(outcomes) {
                match outcome {
                    Ok(links) => {
                        discovered.extend(links.iter().map(|l| l.url.clone()));
                        state.link_map.insert(url, links);
                    }
                    Err(e) => {
                        log::warn!("Failed to fetch {}: {}", url, e);
                        state.failures.push(PageFailure {
                            url,
                            kind: e.kind(),
                            message: e.to_string(),
                        });
                    }
                }
            }

            let mut queued = HashSet::new();
            for link in discovered {
                let candidate = normalize_url(&link);
                if queued.contains(&candidate) {
                    continue;
                }
                if admits(&candidate, &start_host, options, &state.visited) {
                    queued.insert(candidate.clone());
                    frontier.push(candidate);
                }
            }

            state.depth += 1;

            if state.visited.len() >= options.max_pages {
                log::info!("Page budget of {} exhausted", options.max_pages);
                break;
            }

            if !frontier.is_empty() && state.depth < options.max_depth && throttle.is_enabled() {
                throttle.wait().await;
            }
        }

        Ok((start, state))
    }

    /// Aggregate numbers for the last run.
    pub fn stats(&self) -> CrawlStats {
        let run = &self.last_run;
        let domains: BTreeSet<String> = run.visited.iter().filter_map(|u| hostname_of(u)).collect();
        let total_links = run.link_map.total_links();
        let average_links_per_page = if run.link_map.is_empty() {
            0.0
        } else {
            total_links as f64 / run.link_map.len() as f64
        };

        CrawlStats {
            visited_count: run.visited.len(),
            total_links,
            domains: domains.into_iter().collect(),
            average_links_per_page,
        }
    }

    pub fn internal_links(&self) -> LinkMap {
        self.last_run.link_map.filtered(|l| l.is_internal)
    }

    pub fn external_links(&self) -> LinkMap {
        self.last_run.link_map.filtered(|l| !l.is_internal)
    }

    pub fn export_link_map(&self) -> Vec<ExportedPage> {
        self.last_run
            .link_map
            .iter()
            .map(|(url, links)| ExportedPage {
                url: url.to_string(),
                links: links.to_vec(),
            })
            .collect()
    }

    pub fn visited(&self) -> &HashSet<String> {
        &self.last_run.visited
    }

    pub fn failures(&self) -> &[PageFailure] {
        &self.last_run.failures
    }
}

/// Frontier admission for a normalized candidate URL.
fn admits(candidate: &str, start_host: &str, options: &CrawlOptions, visited: &HashSet<String>) -> bool {
    if visited.contains(candidate) {
        return false;
    }

    let parsed = match Url::parse(candidate) {
        Ok(u) => u,
        Err(_) => {
            log::debug!("Dropping unparseable link {}", candidate);
            return false;
        }
    };

    if options.same_domain && parsed.host_str() != Some(start_host) {
        return false;
    }

    if matches_any(candidate, &options.exclude_patterns) {
        log::debug!("Excluded by pattern: {}", candidate);
        return false;
    }

    if !options.include_patterns.is_empty() && !matches_any(candidate, &options.include_patterns) {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, PoolError};
    use crate::pool::{PoolConfig, ResourcePool};
    use crate::renderer::PooledRenderer;
    use crate::testing::MockEngine;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct StubRenderer {
        pages: HashMap<String, Result<Vec<PageLink>, FetchError>>,
        fetched: Mutex<Vec<String>>,
        delay: Duration,
        not_ready: bool,
    }

    impl StubRenderer {
        fn page(mut self, url: &str, links: &[&str]) -> Self {
            let links = links.iter().map(|l| PageLink::new(*l, "link", url)).collect();
            self.pages.insert(url.to_string(), Ok(links));
            self
        }

        fn failing(mut self, url: &str) -> Self {
            self.pages.insert(
                url.to_string(),
                Err(FetchError::Failed(crate::error::EngineError::Timeout {
                    url: url.to_string(),
                })),
            );
            self
        }

        fn fetched(&self) -> Vec<String> {
            self.fetched.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageRenderer for StubRenderer {
        async fn fetch_links(&self, url: &str) -> Result<Vec<PageLink>, FetchError> {
            self.fetched.lock().unwrap().push(url.to_string());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.pages.get(url).cloned().unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn check_ready(&self) -> Result<(), FetchError> {
            if self.not_ready {
                return Err(PoolError::Closed.into());
            }
            Ok(())
        }
    }

    fn options(max_depth: usize, max_pages: usize) -> CrawlOptions {
        CrawlOptions {
            max_depth,
            max_pages,
            delay_ms: 0,
            ..CrawlOptions::default()
        }
    }

    #[tokio::test]
    async fn test_depth_one_fetches_only_start_page() {
        let renderer = StubRenderer::default().page(
            "https://example.com/",
            &["https://example.com/a", "https://example.com/b"],
        );
        let mut crawler = SiteCrawler::new(renderer);

        let result = crawler.crawl("https://example.com/", &options(1, 5)).await;

        assert!(result.success);
        assert_eq!(result.total_pages, 1);
        assert_eq!(result.total_links, 2);
        assert_eq!(result.link_map.len(), 1);
        assert_eq!(crawler.renderer().fetched(), vec!["https://example.com/"]);
    }

    #[tokio::test]
    async fn test_breadth_first_order_and_dedup() {
        let renderer = StubRenderer::default()
            .page("https://example.com/", &["https://example.com/a", "https://example.com/b"])
            .page("https://example.com/a", &["https://example.com/c", "https://example.com/"])
            .page("https://example.com/b", &["https://example.com/a", "https://example.com/c#top"])
            .page("https://example.com/c", &["https://example.com/a"]);
        let mut crawler = SiteCrawler::new(renderer);

        let result = crawler.crawl("https://example.com", &options(5, 100)).await;

        let keys: Vec<&str> = result.link_map.urls().collect();
        assert_eq!(
            keys,
            vec![
                "https://example.com/",
                "https://example.com/a",
                "https://example.com/b",
                "https://example.com/c",
            ]
        );

        let fetched = crawler.renderer().fetched();
        let unique: HashSet<&String> = fetched.iter().collect();
        assert_eq!(fetched.len(), unique.len());
        assert_eq!(crawler.visited().len(), 4);
    }

    #[tokio::test]
    async fn test_page_budget_is_never_exceeded() {
        let links: Vec<String> = (0..10).map(|i| format!("https://example.com/p{}", i)).collect();
        let link_refs: Vec<&str> = links.iter().map(|s| s.as_str()).collect();
        let renderer = StubRenderer::default().page("https://example.com/", &link_refs);
        let mut crawler = SiteCrawler::new(renderer);

        let result = crawler.crawl("https://example.com/", &options(3, 4)).await;

        assert_eq!(result.total_pages, 4);
        assert_eq!(crawler.renderer().fetched().len(), 4);
        assert_eq!(crawler.visited().len(), 4);
    }

    #[tokio::test]
    async fn test_same_domain_restriction() {
        let renderer = StubRenderer::default().page(
            "https://example.com/",
            &["https://other.org/x", "https://example.com/in"],
        );
        let mut crawler = SiteCrawler::new(renderer);

        let result = crawler.crawl("https://example.com/", &options(2, 10)).await;
        assert!(result.link_map.urls().all(|u| hostname_of(u).as_deref() == Some("example.com")));
        assert!(!crawler.renderer().fetched().contains(&"https://other.org/x".to_string()));

        let open = CrawlOptions {
            same_domain: false,
            ..options(2, 10)
        };
        crawler.crawl("https://example.com/", &open).await;
        assert!(crawler.renderer().fetched().contains(&"https://other.org/x".to_string()));
        assert_eq!(crawler.stats().domains, vec!["example.com", "other.org"]);
    }

    #[tokio::test]
    async fn test_excluded_link_is_recorded_but_not_followed() {
        let renderer = StubRenderer::default().page(
            "https://example.com/",
            &["https://example.com/doc.pdf", "https://example.com/page"],
        );
        let mut crawler = SiteCrawler::new(renderer);

        let result = crawler.crawl("https://example.com/", &options(2, 10)).await;

        let start_links = result.link_map.get("https://example.com/").unwrap();
        assert!(start_links.iter().any(|l| l.url == "https://example.com/doc.pdf"));
        assert!(!crawler.renderer().fetched().contains(&"https://example.com/doc.pdf".to_string()));
        assert!(result.link_map.contains("https://example.com/page"));
    }

    #[tokio::test]
    async fn test_include_patterns_restrict_frontier() {
        let renderer = StubRenderer::default().page(
            "https://example.com/",
            &["https://example.com/blog/one", "https://example.com/shop/item"],
        );
        let mut crawler = SiteCrawler::new(renderer);
        let opts = CrawlOptions {
            include_patterns: vec!["/blog/".to_string()],
            ..options(2, 10)
        };

        crawler.crawl("https://example.com/", &opts).await;

        let fetched = crawler.renderer().fetched();
        assert!(fetched.contains(&"https://example.com/blog/one".to_string()));
        assert!(!fetched.contains(&"https://example.com/shop/item".to_string()));
    }

    #[tokio::test]
    async fn test_failed_page_is_recorded_and_not_retried() {
        let renderer = StubRenderer::default()
            .page("https://example.com/", &["https://example.com/bad", "https://example.com/ok"])
            .page("https://example.com/ok", &["https://example.com/bad"])
            .failing("https://example.com/bad");
        let mut crawler = SiteCrawler::new(renderer);

        let result = crawler.crawl("https://example.com/", &options(3, 10)).await;

        assert!(result.success);
        assert!(result.is_partial());
        assert_eq!(result.total_pages, 2);
        assert!(!result.link_map.contains("https://example.com/bad"));
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].url, "https://example.com/bad");
        assert_eq!(result.failures[0].kind, FailureKind::FetchFailed);
        assert!(crawler.visited().contains("https://example.com/bad"));

        let bad_fetches = crawler
            .renderer()
            .fetched()
            .iter()
            .filter(|u| u.as_str() == "https://example.com/bad")
            .count();
        assert_eq!(bad_fetches, 1);
        assert_eq!(crawler.stats().visited_count, 3);
    }

    #[tokio::test]
    async fn test_invalid_start_url_aborts() {
        let mut crawler = SiteCrawler::new(StubRenderer::default());

        let result = crawler.crawl("not a url", &options(3, 10)).await;

        assert!(!result.success);
        assert!(result.error.is_some());
        assert_eq!(result.total_pages, 0);
        assert_eq!(result.total_links, 0);
        assert!(result.link_map.is_empty());
        assert!(crawler.renderer().fetched().is_empty());
    }

    #[tokio::test]
    async fn test_unready_renderer_aborts() {
        let renderer = StubRenderer {
            not_ready: true,
            ..StubRenderer::default()
        };
        let mut crawler = SiteCrawler::new(renderer);

        let result = crawler.crawl("https://example.com/", &options(3, 10)).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("shut down"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_runs_concurrently_and_delay_is_per_level() {
        let renderer = StubRenderer {
            delay: Duration::from_millis(100),
            ..StubRenderer::default()
        }
        .page(
            "https://example.com/",
            &[
                "https://example.com/1",
                "https://example.com/2",
                "https://example.com/3",
                "https://example.com/4",
            ],
        )
        .page("https://example.com/1", &["https://example.com/deep"]);
        let mut crawler = SiteCrawler::new(renderer);
        let opts = CrawlOptions {
            delay_ms: 1000,
            ..options(3, 100)
        };

        let started = tokio::time::Instant::now();
        let result = crawler.crawl("https://example.com/", &opts).await;
        let elapsed = started.elapsed();

        // Three levels of 100ms fetches plus two inter-level pauses.
        assert_eq!(result.total_pages, 6);
        assert!(elapsed >= Duration::from_millis(2300));
        assert!(elapsed < Duration::from_millis(2600));
    }

    #[tokio::test]
    async fn test_views_over_last_run() {
        let renderer = StubRenderer::default()
            .page(
                "https://example.com/",
                &["https://example.com/a", "https://other.org/", "https://example.com/b"],
            )
            .page("https://example.com/a", &["https://cdn.example.net/x"]);
        let mut crawler = SiteCrawler::new(renderer);

        assert_eq!(crawler.stats().visited_count, 0);
        assert!(crawler.export_link_map().is_empty());

        crawler.crawl("https://example.com/", &options(2, 10)).await;

        let stats = crawler.stats();
        assert_eq!(stats.visited_count, 3);
        assert_eq!(stats.total_links, 4);
        assert_eq!(stats.domains, vec!["example.com"]);
        assert!((stats.average_links_per_page - 4.0 / 3.0).abs() < f64::EPSILON);

        let internal = crawler.internal_links();
        assert_eq!(internal.get("https://example.com/").unwrap().len(), 2);
        assert!(internal.get("https://example.com/a").unwrap().is_empty());

        let external = crawler.external_links();
        assert_eq!(external.get("https://example.com/").unwrap().len(), 1);
        assert_eq!(external.get("https://example.com/a").unwrap()[0].url, "https://cdn.example.net/x");

        let exported = crawler.export_link_map();
        assert_eq!(exported.len(), 3);
        assert_eq!(exported[0].url, "https://example.com/");

        let json = serde_json::to_value(&exported).unwrap();
        assert_eq!(json[0]["links"][0]["url"], "https://example.com/a");
    }

    #[tokio::test]
    async fn test_each_crawl_starts_fresh() {
        let renderer = StubRenderer::default()
            .page("https://example.com/", &["https://example.com/a"])
            .page("https://example.org/", &[]);
        let mut crawler = SiteCrawler::new(renderer);

        crawler.crawl("https://example.com/", &options(2, 10)).await;
        assert_eq!(crawler.visited().len(), 2);

        let second = crawler.crawl("https://example.org/", &options(2, 10)).await;
        assert_eq!(second.total_pages, 1);
        assert_eq!(crawler.visited().len(), 1);
        assert!(crawler.visited().contains("https://example.org/"));
    }

    #[tokio::test]
    async fn test_result_serializes_link_map_as_object() {
        let renderer = StubRenderer::default().page("https://example.com/", &["https://example.com/a"]);
        let mut crawler = SiteCrawler::new(renderer);

        let result = crawler.crawl("https://example.com/#intro", &options(1, 10)).await;
        assert_eq!(result.start_url, "https://example.com/");

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["total_pages"], 1);
        assert!(json["link_map"]["https://example.com/"].is_array());
        assert!(json.get("error").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_exhaustion_is_a_page_failure() {
        let engine = Arc::new(MockEngine::with_fetch_delay(Duration::from_secs(10)));
        engine.set_page(
            "https://example.com/",
            &["https://example.com/1", "https://example.com/2", "https://example.com/3"],
        );
        let pool = ResourcePool::new(
            Arc::clone(&engine),
            PoolConfig {
                capacity: 1,
                acquire_timeout: Duration::from_secs(5),
                ..PoolConfig::default()
            },
        );
        let mut crawler = SiteCrawler::new(PooledRenderer::new(Arc::new(pool)));

        let result = crawler.crawl("https://example.com/", &options(2, 10)).await;

        assert!(result.success);
        assert_eq!(result.total_pages, 2);
        assert_eq!(result.failures.len(), 2);
        assert!(result.failures.iter().all(|f| f.kind == FailureKind::PoolExhausted));
        assert_eq!(crawler.visited().len(), 4);
        assert!(engine.max_live.load(std::sync::atomic::Ordering::SeqCst) <= 1);
    }

    #[test]
    fn test_admission_rules() {
        let visited: HashSet<String> = ["https://example.com/seen".to_string()].into();
        let opts = CrawlOptions::default();

        assert!(admits("https://example.com/new", "example.com", &opts, &visited));
        assert!(!admits("https://example.com/seen", "example.com", &opts, &visited));
        assert!(!admits("https://sub.example.com/x", "example.com", &opts, &visited));
        assert!(!admits("https://example.com/file.zip", "example.com", &opts, &visited));
        assert!(!admits("mailto:someone@example.com", "example.com", &opts, &visited));
        assert!(!admits("not a url", "example.com", &opts, &visited));
    }

    #[test]
    fn test_link_map_keeps_order_and_replaces_in_place() {
        let page = "https://example.com/";
        let mut map = LinkMap::new();
        map.insert(format!("{}a", page), vec![PageLink::new("https://example.com/x", "", page)]);
        map.insert(format!("{}b", page), Vec::new());
        map.insert(
            format!("{}a", page),
            vec![
                PageLink::new("https://example.com/y", "", page),
                PageLink::new("https://other.org/", "", page),
            ],
        );

        assert_eq!(map.len(), 2);
        assert_eq!(
            map.urls().collect::<Vec<_>>(),
            vec!["https://example.com/a", "https://example.com/b"]
        );
        assert_eq!(map.get("https://example.com/a").map(|l| l.len()), Some(2));
        assert_eq!(map.total_links(), 2);
        assert!(!map.contains("https://example.com/c"));

        let external = map.filtered(|l| !l.is_internal);
        assert_eq!(external.get("https://example.com/a").map(|l| l.len()), Some(1));
        assert_eq!(external.get("https://example.com/b").map(|l| l.len()), Some(0));
    }
}
