//! Research Stage
//!
//! Searches the web for the request query and extracts the readable text of a
//! few result pages. This is the only stage that never calls the model.

use std::collections::BTreeSet;
use std::time::Duration;

use tracing::{debug, info};

use super::{Stage, StageContext};
use crate::ai::{remaining_budget, with_timeout};
use crate::constants::research::{
    BLOCKED_DOMAINS, CONTENT_QUALITY, EMPTY_QUALITY, FETCH_TIMEOUT_SECS, INSPECTED_RESULTS,
    MAX_CONTENT_CHARS, MAX_DOCUMENTS, MAX_RESULTS, MIN_CONTENT_CHARS,
};
use crate::search::SearchHit;
use crate::types::{
    AnalysisRequest, ExtractedContent, ForgeError, ResearchSource, ResearchStats, Result,
    StageKind, WebResearch, truncate_chars,
};

#[derive(Default)]
pub struct ResearchStage;

#[async_trait::async_trait]
impl Stage for ResearchStage {
    type Output = WebResearch;

    fn kind(&self) -> StageKind {
        StageKind::Research
    }

    async fn generate(&self, context: &StageContext<'_>) -> Result<WebResearch> {
        let query = &context.request.query;
        let budget = remaining_budget(context.call_timeout, context.deadline)
            .ok_or_else(|| ForgeError::timeout("web_research", Duration::ZERO))?;

        let hits = with_timeout(budget, context.search.search(query, MAX_RESULTS), "web search").await?;
        if hits.is_empty() {
            return Err(ForgeError::Search(format!("no results for '{}'", query)));
        }

        let extracted = Self::extract_documents(context, &hits).await;
        info!(
            "Research: {} hits, {} documents extracted",
            hits.len(),
            extracted.len()
        );
        Ok(Self::assemble(query, &hits, extracted))
    }

    fn fallback(&self, request: &AnalysisRequest) -> WebResearch {
        let segment = &request.segment;
        let source = |title: String, url: &str| ResearchSource {
            title,
            url: url.to_string(),
            snippet: String::new(),
        };
        WebResearch {
            query: request.query.clone(),
            total_results: 5,
            extracted: Vec::new(),
            stats: ResearchStats {
                total_queries: 1,
                total_conteudo: 5000,
                fontes_unicas: 3,
                qualidade_media: 75.0,
            },
            sources: vec![
                source(format!("Análise do mercado de {}", segment), "https://exemplo.com"),
                source(format!("Tendências em {}", segment), "https://exemplo2.com"),
                source(format!("Oportunidades no {}", segment), "https://exemplo3.com"),
            ],
            fallback_mode: true,
            extra: Default::default(),
        }
    }
}

impl ResearchStage {
    /// Fetch the first inspected hits, keeping at most `MAX_DOCUMENTS` pages
    /// with enough text. Fetch failures only skip the page.
    async fn extract_documents(context: &StageContext<'_>, hits: &[SearchHit]) -> Vec<ExtractedContent> {
        let mut documents = Vec::new();

        for hit in hits.iter().take(INSPECTED_RESULTS) {
            if is_blocked(hit) {
                debug!("Research: skipping blocked source {}", hit.url);
                continue;
            }

            let Some(budget) = remaining_budget(Duration::from_secs(FETCH_TIMEOUT_SECS), context.deadline)
            else {
                break;
            };
            let content = match with_timeout(budget, context.extractor.extract(&hit.url), "page fetch").await {
                Ok(content) => content,
                Err(e) => {
                    debug!("Research: extraction failed for {}: {}", hit.url, e);
                    continue;
                }
            };

            if content.chars().count() <= MIN_CONTENT_CHARS {
                continue;
            }
            documents.push(ExtractedContent {
                url: hit.url.clone(),
                title: hit.title.clone(),
                content: truncate_chars(&content, MAX_CONTENT_CHARS).to_string(),
                quality_score: CONTENT_QUALITY,
            });
            if documents.len() >= MAX_DOCUMENTS {
                break;
            }
        }

        documents
    }

    fn assemble(query: &str, hits: &[SearchHit], extracted: Vec<ExtractedContent>) -> WebResearch {
        let sources: Vec<ResearchSource> = if extracted.is_empty() {
            hits.iter()
                .map(|hit| ResearchSource {
                    title: hit.title.clone(),
                    url: hit.url.clone(),
                    snippet: hit.snippet.clone(),
                })
                .collect()
        } else {
            extracted
                .iter()
                .map(|doc| ResearchSource {
                    title: doc.title.clone(),
                    url: doc.url.clone(),
                    snippet: String::new(),
                })
                .collect()
        };

        let unique_hosts: BTreeSet<String> = sources
            .iter()
            .filter_map(|s| url::Url::parse(&s.url).ok()?.host_str().map(str::to_lowercase))
            .collect();

        WebResearch {
            query: query.to_string(),
            total_results: hits.len(),
            stats: ResearchStats {
                total_queries: 1,
                total_conteudo: extracted.iter().map(|d| d.content.chars().count()).sum(),
                fontes_unicas: unique_hosts.len(),
                qualidade_media: if extracted.is_empty() {
                    EMPTY_QUALITY
                } else {
                    CONTENT_QUALITY
                },
            },
            extracted,
            sources,
            fallback_mode: false,
            extra: Default::default(),
        }
    }
}

fn is_blocked(hit: &SearchHit) -> bool {
    let Some(host) = hit.host() else {
        return true;
    };
    BLOCKED_DOMAINS
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{}", domain)))
}
