//! Scripted engine used by unit tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

use crate::engine::BrowserEngine;
use crate::error::EngineError;
use crate::links::PageLink;

pub struct MockPage {
    pub serial: usize,
}

#[derive(Default)]
pub struct MockEngine {
    pub connected: AtomicBool,
    pub fail_start: AtomicBool,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub live: AtomicUsize,
    pub max_live: AtomicUsize,
    pub start_delay: Duration,
    pub open_delay: Duration,
    pub fetch_delay: Duration,
    pub pages: Mutex<HashMap<String, Result<Vec<PageLink>, EngineError>>>,
    pub fetched: Mutex<Vec<String>>,
}

impl MockEngine {
    pub fn with_start_delay(delay: Duration) -> Self {
        Self {
            start_delay: delay,
            ..Self::default()
        }
    }

    pub fn with_open_delay(delay: Duration) -> Self {
        Self {
            open_delay: delay,
            ..Self::default()
        }
    }

    pub fn with_fetch_delay(delay: Duration) -> Self {
        Self {
            fetch_delay: delay,
            ..Self::default()
        }
    }

    pub fn set_page(&self, url: &str, links: &[&str]) {
        let links = links.iter().map(|l| PageLink::new(*l, "", url)).collect();
        self.pages.lock().unwrap().insert(url.to_string(), Ok(links));
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrowserEngine for MockEngine {
    type Page = MockPage;

    async fn start(&self) -> Result<(), EngineError> {
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(EngineError::Launch("scripted failure".into()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn open_page(&self) -> Result<MockPage, EngineError> {
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        let serial = self.opened.fetch_add(1, Ordering::SeqCst);
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);
        Ok(MockPage { serial })
    }

    async fn close_page(&self, _page: &MockPage) {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_sub(1, Ordering::SeqCst);
    }

    async fn fetch_links(&self, _page: &MockPage, url: &Url) -> Result<Vec<PageLink>, EngineError> {
        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }
        self.fetched.lock().unwrap().push(url.to_string());
        self.pages
            .lock()
            .unwrap()
            .get(url.as_str())
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}
