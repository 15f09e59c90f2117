//! Analysis request: the raw client draft and its validated, immutable form.

use serde::{Deserialize, Serialize};

use super::SessionId;
use super::error::{Result, ValidationError, ValidationErrorKind};
use super::utils::{de_lenient_f64, de_non_blank};

/// Request exactly as a client submitted it. Every field is optional so that a
/// missing field never fails deserialization; [`AnalysisRequest::from_draft`]
/// decides what is actually required.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestDraft {
    #[serde(
        rename = "segmento",
        default,
        deserialize_with = "de_non_blank",
        skip_serializing_if = "Option::is_none"
    )]
    pub segment: Option<String>,

    #[serde(
        rename = "produto",
        default,
        deserialize_with = "de_non_blank",
        skip_serializing_if = "Option::is_none"
    )]
    pub product: Option<String>,

    #[serde(
        rename = "publico",
        default,
        deserialize_with = "de_non_blank",
        skip_serializing_if = "Option::is_none"
    )]
    pub audience: Option<String>,

    #[serde(
        rename = "preco",
        default,
        deserialize_with = "de_lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub price: Option<f64>,

    #[serde(
        rename = "objetivo_receita",
        default,
        deserialize_with = "de_lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub revenue_goal: Option<f64>,

    #[serde(
        rename = "orcamento_marketing",
        default,
        deserialize_with = "de_lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub marketing_budget: Option<f64>,

    #[serde(
        rename = "prazo_lancamento",
        default,
        deserialize_with = "de_non_blank",
        skip_serializing_if = "Option::is_none"
    )]
    pub launch_window: Option<String>,

    #[serde(
        rename = "concorrentes",
        default,
        deserialize_with = "de_non_blank",
        skip_serializing_if = "Option::is_none"
    )]
    pub competitors: Option<String>,

    #[serde(
        rename = "dados_adicionais",
        default,
        deserialize_with = "de_non_blank",
        skip_serializing_if = "Option::is_none"
    )]
    pub extra_data: Option<String>,

    #[serde(
        default,
        deserialize_with = "de_non_blank",
        skip_serializing_if = "Option::is_none"
    )]
    pub query: Option<String>,

    #[serde(
        default,
        deserialize_with = "de_non_blank",
        skip_serializing_if = "Option::is_none"
    )]
    pub session_id: Option<String>,
}

impl RequestDraft {
    /// Draft with only a segment, mostly useful for the CLI and tests.
    pub fn for_segment(segment: impl Into<String>) -> Self {
        Self {
            segment: Some(segment.into()),
            ..Default::default()
        }
    }
}

/// Validated request. Built once, then only ever borrowed by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    #[serde(rename = "segmento")]
    pub segment: String,

    #[serde(rename = "produto", default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,

    #[serde(rename = "publico", default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,

    #[serde(rename = "preco", default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,

    #[serde(
        rename = "objetivo_receita",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub revenue_goal: Option<f64>,

    #[serde(
        rename = "orcamento_marketing",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub marketing_budget: Option<f64>,

    #[serde(
        rename = "prazo_lancamento",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub launch_window: Option<String>,

    #[serde(rename = "concorrentes", default, skip_serializing_if = "Option::is_none")]
    pub competitors: Option<String>,

    #[serde(
        rename = "dados_adicionais",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub extra_data: Option<String>,

    pub query: String,

    pub session_id: SessionId,
}

impl AnalysisRequest {
    /// Validate a draft, assigning a session id and synthesizing the search
    /// query when the client did not provide them.
    pub fn from_draft(draft: RequestDraft) -> Result<Self> {
        let segment = draft
            .segment
            .ok_or_else(|| ValidationError::missing_field("segmento"))?;

        let query = draft
            .query
            .unwrap_or_else(|| synthesize_query(&segment, draft.product.as_deref()));

        let session_id = match draft.session_id {
            Some(id) if !SessionId::is_valid(&id) => {
                let mut err = ValidationError::new(
                    ValidationErrorKind::Format,
                    "'session_id' may only contain letters, digits, '_' and '-' (max 128)",
                );
                err.field = Some("session_id".to_string());
                return Err(err.into());
            }
            Some(id) => SessionId::new(id),
            None => SessionId::generate(),
        };

        Ok(Self {
            segment,
            product: draft.product,
            audience: draft.audience,
            price: draft.price,
            revenue_goal: draft.revenue_goal,
            marketing_budget: draft.marketing_budget,
            launch_window: draft.launch_window,
            competitors: draft.competitors,
            extra_data: draft.extra_data,
            query,
            session_id,
        })
    }

    /// Product name, or the segment when no product was given.
    pub fn product_or_segment(&self) -> &str {
        self.product.as_deref().unwrap_or(&self.segment)
    }

    /// Compact summary of the inputs, attached to result metadata.
    pub fn input_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "segmento": self.segment,
            "produto": self.product,
            "query": self.query,
        })
    }
}

/// Build the default research query from segment and optional product.
pub fn synthesize_query(segment: &str, product: Option<&str>) -> String {
    match product {
        Some(product) => format!(
            "mercado {} {} Brasil tendências oportunidades 2024",
            segment, product
        ),
        None => format!(
            "análise mercado {} Brasil dados estatísticas crescimento",
            segment
        ),
    }
}
