// Rust Site Crawler Library
//
// Breadth-first site crawling on top of a bounded pool of page-rendering
// sessions. The pool decides how many pages may be in flight; the crawler
// decides which pages to visit and when.

pub mod config;
pub mod crawler;
pub mod engine;
pub mod error;
pub mod http_engine;
pub mod links;
pub mod pool;
pub mod renderer;
pub mod utils;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use config::{AppConfig, EngineSettings, PoolSettings};
pub use crawler::{
    CrawlOptions, CrawlResult, CrawlStats, ExportedPage, LinkMap, PageFailure, SiteCrawler,
    DEFAULT_EXCLUDE_PATTERNS,
};
pub use engine::BrowserEngine;
pub use error::{CrawlError, EngineError, FailureKind, FetchError, PoolError};
pub use http_engine::{HttpEngine, HttpPage};
pub use links::{PageLink, extract_links};
pub use pool::{PoolConfig, PoolStatus, ResourcePool, Session, SessionId};
pub use renderer::{PageRenderer, PooledRenderer};
pub use utils::{Throttle, get_random_user_agent, normalize_url, USER_AGENTS};
