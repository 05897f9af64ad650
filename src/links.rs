use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use url::Url;

/// A link discovered on a rendered page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLink {
    pub url: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub is_internal: bool,
}

impl PageLink {
    /// Build a link, deriving `is_internal` from the page it was found on.
    pub fn new(url: impl Into<String>, text: impl Into<String>, page_url: &str) -> Self {
        let url = url.into();
        let is_internal = is_same_host(page_url, &url);
        Self {
            url,
            text: text.into(),
            title: None,
            is_internal,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// True when both URLs parse and share a hostname. Parse failures count as external.
pub fn is_same_host(page_url: &str, link_url: &str) -> bool {
    match (Url::parse(page_url), Url::parse(link_url)) {
        (Ok(page), Ok(link)) => match (page.host_str(), link.host_str()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        _ => false,
    }
}

fn is_navigable(href: &str) -> bool {
    let href = href.trim();
    !(href.is_empty()
        || href.starts_with('#')
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("javascript:"))
}

/// Extract every `a[href]` from an HTML document, resolved against `page_url`.
pub fn extract_links(html: &str, page_url: &str) -> Vec<PageLink> {
    let mut links = Vec::new();

    let base = match Url::parse(page_url) {
        Ok(u) => u,
        Err(_) => return links,
    };

    let document = Html::parse_document(html);
    let selector = match Selector::parse("a[href]") {
        Ok(s) => s,
        Err(_) => return links,
    };

    let mut seen = HashSet::new();

    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        if !is_navigable(href) {
            continue;
        }

        let absolute = match base.join(href.trim()) {
            Ok(u) => u.to_string(),
            Err(e) => {
                log::debug!("Skipping unresolvable href '{}' on {}: {}", href, page_url, e);
                continue;
            }
        };

        if !seen.insert(absolute.clone()) {
            continue;
        }

        let title = element
            .value()
            .attr("title")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        let text: String = element.text().collect::<Vec<_>>().join(" ");
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let text = if text.is_empty() {
            title.clone().unwrap_or_default()
        } else {
            text
        };

        let mut link = PageLink::new(absolute, text, page_url);
        link.title = title;
        links.push(link);
    }

    links
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"
        <!DOCTYPE html>
        <html>
            <body>
                <nav>
                    <a href="/docs">  Docs
                        home </a>
                    <a href="https://other.org/x" title="Other site">Other</a>
                    <a href="#top">Top</a>
                    <a href="mailto:team@example.com">Mail</a>
                    <a href="javascript:void(0)">Click</a>
                    <a href="/docs">Docs again</a>
                    <a href="contact" title="Contact us"></a>
                </nav>
            </body>
        </html>
    "##;

    #[test]
    fn test_extract_links_resolves_and_filters() {
        let links = extract_links(PAGE, "https://example.com/about/");
        let urls: Vec<&str> = links.iter().map(|l| l.url.as_str()).collect();

        assert_eq!(
            urls,
            vec![
                "https://example.com/docs",
                "https://other.org/x",
                "https://example.com/about/contact",
            ]
        );
    }

    #[test]
    fn test_extract_links_text_title_and_internal_flag() {
        let links = extract_links(PAGE, "https://example.com/about/");

        assert_eq!(links[0].text, "Docs home");
        assert!(links[0].is_internal);
        assert_eq!(links[0].title, None);

        assert_eq!(links[1].title.as_deref(), Some("Other site"));
        assert!(!links[1].is_internal);

        assert_eq!(links[2].text, "Contact us");
    }

    #[test]
    fn test_extract_links_bad_base() {
        assert!(extract_links(PAGE, "not a url").is_empty());
    }

    #[test]
    fn test_is_same_host() {
        assert!(is_same_host("https://example.com/a", "http://example.com/b"));
        assert!(!is_same_host("https://example.com/a", "https://www.example.com/b"));
        assert!(!is_same_host("https://example.com/a", "nonsense"));
    }
}
