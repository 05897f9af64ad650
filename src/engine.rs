use async_trait::async_trait;
use url::Url;

use crate::error::EngineError;
use crate::links::PageLink;

/// The rendering engine a [`crate::pool::ResourcePool`] drives.
///
/// An engine is started once and then hands out pages (tabs). The pool owns
/// page lifetimes; the engine only knows how to create, use and close them.
#[async_trait]
pub trait BrowserEngine: Send + Sync + 'static {
    type Page: Send + Sync + 'static;

    /// Start the engine. Called lazily by the pool, at most once per
    /// initialization cycle.
    async fn start(&self) -> Result<(), EngineError>;

    /// Tear the engine down. Pages already handed out become unusable.
    async fn stop(&self);

    /// False once the engine has gone away unexpectedly or been stopped.
    fn is_connected(&self) -> bool;

    async fn open_page(&self) -> Result<Self::Page, EngineError>;

    async fn close_page(&self, page: &Self::Page);

    /// Navigate `page` to `url` and return the outbound links found there.
    async fn fetch_links(&self, page: &Self::Page, url: &Url) -> Result<Vec<PageLink>, EngineError>;
}
