use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use url::Url;

use crate::config::EngineSettings;
use crate::engine::BrowserEngine;
use crate::error::EngineError;
use crate::links::{PageLink, extract_links};
use crate::utils::get_random_user_agent;

/// One tab: an HTTP client with its own cookie jar and user agent.
pub struct HttpPage {
    client: reqwest::Client,
    user_agent: String,
}

impl HttpPage {
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }
}

/// [`BrowserEngine`] that renders pages as plain HTTP fetches.
pub struct HttpEngine {
    settings: EngineSettings,
    connected: AtomicBool,
}

impl HttpEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            connected: AtomicBool::new(false),
        }
    }

    fn navigation_timeout(&self) -> Duration {
        self.settings.navigation_timeout()
    }
}

impl Default for HttpEngine {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

#[async_trait]
impl BrowserEngine for HttpEngine {
    type Page = HttpPage;

    async fn start(&self) -> Result<(), EngineError> {
        self.connected.store(true, Ordering::SeqCst);
        log::debug!("HTTP engine started (navigation timeout {:?})", self.navigation_timeout());
        Ok(())
    }

    async fn stop(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn open_page(&self) -> Result<HttpPage, EngineError> {
        if !self.is_connected() {
            return Err(EngineError::Disconnected);
        }

        let user_agent = self
            .settings
            .user_agent
            .clone()
            .unwrap_or_else(|| get_random_user_agent().to_string());

        let client = reqwest::Client::builder()
            .user_agent(user_agent.clone())
            .timeout(self.navigation_timeout())
            .connect_timeout(Duration::from_secs(10))
            .cookie_store(true)
            .build()
            .map_err(|e| EngineError::Launch(format!("Failed to build HTTP client: {}", e)))?;

        Ok(HttpPage { client, user_agent })
    }

    async fn close_page(&self, _page: &HttpPage) {}

    async fn fetch_links(&self, page: &HttpPage, url: &Url) -> Result<Vec<PageLink>, EngineError> {
        if !self.is_connected() {
            return Err(EngineError::Disconnected);
        }

        let response = page
            .client
            .get(url.clone())
            .header(ACCEPT, "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.5")
            .send()
            .await
            .map_err(|e| request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        // Relative links resolve against where redirects landed.
        let final_url = response.url().to_string();
        let html = response.text().await.map_err(|e| request_error(url, e))?;

        let links = extract_links(&html, &final_url);
        log::debug!("Found {} links on {}", links.len(), url);
        Ok(links)
    }
}

fn request_error(url: &Url, e: reqwest::Error) -> EngineError {
    if e.is_timeout() {
        EngineError::Timeout {
            url: url.to_string(),
        }
    } else {
        EngineError::Navigation {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}
