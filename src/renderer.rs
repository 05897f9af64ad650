use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

use crate::engine::BrowserEngine;
use crate::error::{FetchError, PoolError};
use crate::links::PageLink;
use crate::pool::{PoolStatus, ResourcePool};

/// Source of outbound links for a URL. This is all the crawler sees.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn fetch_links(&self, url: &str) -> Result<Vec<PageLink>, FetchError>;

    /// Whether the renderer can take work at all. Checked once per crawl run.
    async fn check_ready(&self) -> Result<(), FetchError> {
        Ok(())
    }
}

/// Renders pages on sessions leased from a [`ResourcePool`].
pub struct PooledRenderer<E: BrowserEngine> {
    pool: Arc<ResourcePool<E>>,
}

impl<E: BrowserEngine> PooledRenderer<E> {
    pub fn new(pool: Arc<ResourcePool<E>>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<ResourcePool<E>> {
        &self.pool
    }

    pub async fn status(&self) -> PoolStatus {
        self.pool.status().await
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

impl<E: BrowserEngine> Clone for PooledRenderer<E> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
        }
    }
}

#[async_trait]
impl<E: BrowserEngine> PageRenderer for PooledRenderer<E> {
    async fn fetch_links(&self, url: &str) -> Result<Vec<PageLink>, FetchError> {
        let target = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let session = self.pool.acquire().await?;
        log::debug!("Fetching {} on {}", target, session.id());

        let result = self
            .pool
            .engine()
            .fetch_links(session.page(), &target)
            .await;

        // A cancelled fetch never gets here; the lease returns itself on drop.
        self.pool.release(session).await;

        Ok(result?)
    }

    async fn check_ready(&self) -> Result<(), FetchError> {
        if self.pool.is_closed().await {
            return Err(PoolError::Closed.into());
        }
        Ok(())
    }
}
