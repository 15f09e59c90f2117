//! Stage Helper Functions
//!
//! `run_generation` covers the common path of every model-backed stage:
//! 1. Budget -> 2. Build prompt -> 3. Call provider -> 4. Extract JSON -> 5. Parse payload -> 6. Log
//!
//! `run_stage` wraps any [`Stage`] in its failure boundary.

use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{Stage, StageContext};
use crate::ai::{parse_structured, remaining_budget, with_timeout};
use crate::recorder::StepCategory;
use crate::types::{
    AnalysisRequest, ForgeError, Result, StageKind, StagePayload, StageResult, capitalize_first,
    log_filter_warn, truncate_chars,
};

// =============================================================================
// Generation Runner
// =============================================================================

/// Stage-specific behavior for [`run_generation`].
#[allow(clippy::type_complexity)]
pub struct GenerationConfig<'a, T> {
    pub kind: StageKind,
    pub build_prompt: Box<dyn Fn(&StageContext<'_>) -> String + Send + Sync + 'a>,
    /// Turns the extracted JSON into the typed payload
    pub parse_result: Box<dyn Fn(Value) -> Result<T> + Send + Sync + 'a>,
    /// One-line description for the debug log
    pub debug_result: Box<dyn Fn(&T) -> String + Send + Sync + 'a>,
}

/// Single provider call for one stage. No retries happen here; the provider
/// chain owns retry and failover.
pub async fn run_generation<T>(context: &StageContext<'_>, config: GenerationConfig<'_, T>) -> Result<T> {
    let name = config.kind.name();
    debug!(
        "{}Stage: generating for segment '{}'",
        capitalize_first(name),
        context.segment()
    );

    let budget = remaining_budget(context.call_timeout, context.deadline)
        .ok_or_else(|| ForgeError::timeout(name, Duration::ZERO))?;

    let prompt = (config.build_prompt)(context);
    let max_tokens = context.budgets.for_stage(config.kind);

    let response = with_timeout(budget, context.provider.generate(&prompt, max_tokens), name).await?;

    let value = parse_structured(&response.content, name)?;
    if !value.is_object() && !value.is_array() {
        return Err(ForgeError::parse(name, "expected a JSON object or array"));
    }

    let payload = (config.parse_result)(value)?;
    debug!("{}Stage: {}", capitalize_first(name), (config.debug_result)(&payload));
    Ok(payload)
}

// =============================================================================
// Failure Boundary
// =============================================================================

/// Run `stage` and always come back with a payload. Failures and blank payloads
/// are logged, recorded as errors and replaced by the stage fallback.
pub async fn run_stage<S: Stage + ?Sized>(stage: &S, context: &StageContext<'_>) -> StageResult<S::Output> {
    let kind = stage.kind();
    let category = StepCategory::for_stage(kind);

    let failure = match stage.generate(context).await {
        Ok(payload) if !payload.is_blank() => {
            record_output(context, kind, category, &payload);
            info!("Stage '{}' completed", kind);
            return StageResult::Success(payload);
        }
        Ok(_) => "empty payload".to_string(),
        Err(e) => e.to_string(),
    };

    warn!("Stage '{}' degraded to fallback: {}", kind, failure);
    log_filter_warn(
        context.recorder.record_error(
            context.session_id(),
            kind.name(),
            &failure,
            &json!({ "segmento": context.segment(), "fallback": true }),
        ),
        "Failed to record stage error",
    );

    let payload = stage.fallback(context.request);
    record_output(context, kind, category, &payload);
    StageResult::degraded(payload, failure)
}

fn record_output<T: serde::Serialize>(
    context: &StageContext<'_>,
    kind: StageKind,
    category: StepCategory,
    payload: &T,
) {
    let value = match serde_json::to_value(payload) {
        Ok(value) => value,
        Err(e) => {
            warn!("Stage '{}' payload is not serializable: {}", kind, e);
            return;
        }
    };
    log_filter_warn(
        context
            .recorder
            .record(context.session_id(), kind.name(), &value, category),
        "Failed to record stage output",
    );
}

// =============================================================================
// Prompt Fragments
// =============================================================================

/// Project fields as prompt lines, skipping the ones the client left out.
pub fn project_brief(request: &AnalysisRequest) -> String {
    let money = |v: Option<f64>| v.map(|v| format!("R$ {:.2}", v));
    let lines = [
        ("Segmento", Some(request.segment.clone())),
        ("Produto", request.product.clone()),
        ("Público", request.audience.clone()),
        ("Preço", money(request.price)),
        ("Objetivo de receita", money(request.revenue_goal)),
        ("Orçamento de marketing", money(request.marketing_budget)),
        ("Prazo de lançamento", request.launch_window.clone()),
        ("Concorrentes", request.competitors.clone()),
        ("Dados adicionais", request.extra_data.clone()),
    ];

    lines
        .into_iter()
        .filter_map(|(label, value)| value.map(|v| format!("- {}: {}", label, v)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Avatar highlights for downstream prompts.
pub fn avatar_brief(context: &StageContext<'_>) -> String {
    let Some(avatar) = context.upstream.avatar.as_ref() else {
        return "Avatar ainda não disponível.".to_string();
    };
    let list = |items: &[String]| {
        items
            .iter()
            .take(5)
            .map(|i| format!("  - {}", i))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "Nome: {}\nDores:\n{}\nDesejos:\n{}\nObjeções:\n{}",
        avatar.fictional_name,
        list(&avatar.pains),
        list(&avatar.desires),
        list(&avatar.objections)
    )
}

/// Research highlights for downstream prompts.
pub fn research_brief(context: &StageContext<'_>) -> String {
    let Some(research) = context.upstream.web_research.as_ref() else {
        return "Pesquisa ainda não disponível.".to_string();
    };
    let mut brief = String::new();
    for doc in research.extracted.iter().take(3) {
        brief.push_str(&format!(
            "- {} ({}): {}\n",
            doc.title,
            doc.url,
            truncate_chars(&doc.content, 400)
        ));
    }
    if brief.is_empty() {
        for source in research.sources.iter().take(5) {
            brief.push_str(&format!("- {}: {}\n", source.title, source.snippet));
        }
    }
    if brief.is_empty() {
        brief = "Sem resultados de pesquisa.".to_string();
    }
    brief
}

/// Unwraps `{"<key>": {...}}` envelopes some models add around the payload.
pub fn unwrap_envelope(value: Value, keys: &[&str]) -> Value {
    if let Value::Object(map) = &value
        && map.len() == 1
        && let Some(inner) = keys.iter().find_map(|k| map.get(*k))
    {
        return inner.clone();
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RequestDraft;

    #[test]
    fn test_project_brief_skips_missing_fields() {
        let request = AnalysisRequest::from_draft(RequestDraft {
            product: Some("Mentoria".into()),
            price: Some(997.0),
            ..RequestDraft::for_segment("consultoria")
        })
        .unwrap();
        let brief = project_brief(&request);
        assert!(brief.contains("- Segmento: consultoria"));
        assert!(brief.contains("- Produto: Mentoria"));
        assert!(brief.contains("- Preço: R$ 997.00"));
        assert!(!brief.contains("Público"));
    }

    #[test]
    fn test_unwrap_envelope() {
        let wrapped = json!({"avatar": {"nome_ficticio": "Ana"}});
        assert_eq!(
            unwrap_envelope(wrapped, &["avatar"]),
            json!({"nome_ficticio": "Ana"})
        );

        let plain = json!({"nome_ficticio": "Ana", "dores_viscerais": []});
        assert_eq!(unwrap_envelope(plain.clone(), &["avatar"]), plain);
    }
}
