//! Page text extraction
//!
//! Fetches a page and reduces it to readable text: script, style and markup
//! are stripped, entities decoded, whitespace collapsed. Transport failures
//! are retried with exponential backoff; HTTP errors are not.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use regex::Regex;
use tracing::debug;

use crate::types::{ForgeError, Result};

#[async_trait]
pub trait ContentExtractor: Send + Sync {
    /// Readable text of the page at `url`
    async fn extract(&self, url: &str) -> Result<String>;
}

pub type SharedExtractor = Arc<dyn ContentExtractor>;

pub struct HttpContentExtractor {
    client: reqwest::Client,
    max_retries: usize,
    noise: Regex,
    tags: Regex,
    whitespace: Regex,
}

impl HttpContentExtractor {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Self::with_client(client)
    }

    pub fn with_client(client: reqwest::Client) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| ForgeError::Config(format!("extractor pattern: {}", e)))
        };
        Ok(Self {
            client,
            max_retries: 2,
            noise: compile(r"(?is)<(script|style|noscript|svg|head)[^>]*>.*?</(script|style|noscript|svg|head)>|<!--.*?-->")?,
            tags: compile(r"(?s)<[^>]+>")?,
            whitespace: compile(r"\s+")?,
        })
    }

    pub fn with_max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    /// Markup to plain text
    pub fn html_to_text(&self, html: &str) -> String {
        let without_noise = self.noise.replace_all(html, " ");
        let without_tags = self.tags.replace_all(&without_noise, " ");
        let decoded = decode_entities(&without_tags);
        self.whitespace.replace_all(&decoded, " ").trim().to_string()
    }

    async fn fetch(&self, url: &str) -> std::result::Result<String, reqwest::Error> {
        self.client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}

#[async_trait]
impl ContentExtractor for HttpContentExtractor {
    async fn extract(&self, url: &str) -> Result<String> {
        let body = (|| self.fetch(url))
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(300))
                    .with_max_times(self.max_retries),
            )
            .when(|e: &reqwest::Error| e.is_timeout() || e.is_connect())
            .notify(|e, wait| debug!(%url, error = %e, ?wait, "Retrying page fetch"))
            .await
            .map_err(|e| ForgeError::Search(format!("fetch {}: {}", url, e)))?;

        Ok(self.html_to_text(&body))
    }
}

fn decode_entities(text: &str) -> String {
    const ENTITIES: [(&str, &str); 8] = [
        ("&nbsp;", " "),
        ("&lt;", "<"),
        ("&gt;", ">"),
        ("&quot;", "\""),
        ("&#39;", "'"),
        ("&apos;", "'"),
        ("&ccedil;", "ç"),
        ("&amp;", "&"),
    ];
    ENTITIES
        .iter()
        .fold(text.to_string(), |acc, (entity, plain)| acc.replace(entity, plain))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Serves canned page text keyed by URL
    pub(crate) struct StaticExtractor {
        pages: HashMap<String, String>,
    }

    impl StaticExtractor {
        pub(crate) fn new(pages: &[(&str, String)]) -> Self {
            Self {
                pages: pages
                    .iter()
                    .map(|(url, text)| (url.to_string(), text.clone()))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl ContentExtractor for StaticExtractor {
        async fn extract(&self, url: &str) -> Result<String> {
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| ForgeError::Search(format!("fetch {}: 404", url)))
        }
    }

    fn extractor() -> HttpContentExtractor {
        HttpContentExtractor::new(Duration::from_millis(200), "test-agent").unwrap()
    }

    #[test]
    fn test_html_to_text() {
        let html = r#"<html><head><title>x</title><style>p{color:red}</style></head>
            <body><script>alert("oi")</script><!-- nav -->
            <h1>Mercado   de</h1><p>Café &amp; pão&nbsp;quentes</p></body></html>"#;
        assert_eq!(extractor().html_to_text(html), "Mercado de Café & pão quentes");
    }

    #[test]
    fn test_html_to_text_plain_input() {
        assert_eq!(extractor().html_to_text("  só texto\n\tsimples "), "só texto simples");
    }

    #[tokio::test]
    async fn test_unreachable_url_is_search_error() {
        let err = extractor()
            .with_max_retries(0)
            .extract("http://127.0.0.1:9/pagina")
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::Search(_)));
    }
}
