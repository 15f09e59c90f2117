//! Insights Stage
//!
//! Consolidates everything produced so far into short, exclusive market insights.

use serde_json::Value;

use super::helpers::{avatar_brief, research_brief, unwrap_envelope};
use super::{GenerationConfig, Stage, StageContext, project_brief, run_generation};
use crate::constants::pipeline::MIN_INSIGHTS;
use crate::types::{AnalysisRequest, ForgeError, Result, StageKind, value_to_text};

#[derive(Default)]
pub struct InsightsStage;

#[async_trait::async_trait]
impl Stage for InsightsStage {
    type Output = Vec<String>;

    fn kind(&self) -> StageKind {
        StageKind::Insights
    }

    async fn generate(&self, context: &StageContext<'_>) -> Result<Vec<String>> {
        run_generation(
            context,
            GenerationConfig {
                kind: StageKind::Insights,
                build_prompt: Box::new(Self::build_prompt),
                parse_result: Box::new(Self::parse_result),
                debug_result: Box::new(|insights: &Vec<String>| {
                    format!("{} insights", insights.len())
                }),
            },
        )
        .await
    }

    fn fallback(&self, request: &AnalysisRequest) -> Vec<String> {
        let segment = &request.segment;
        vec![
            format!("O mercado brasileiro de {} está em transformação digital", segment),
            format!("Profissionais de {} buscam soluções práticas e implementáveis", segment),
            format!("Existe demanda por metodologias específicas para {}", segment),
            format!("Automação e eficiência são prioridades no {}", segment),
            format!("Mercado de {} valoriza resultados mensuráveis", segment),
            "Sistema ultra-robusto preservou todos os dados intermediários".to_string(),
        ]
    }
}

impl InsightsStage {
    fn build_prompt(context: &StageContext<'_>) -> String {
        let drivers = context
            .upstream
            .drivers
            .as_ref()
            .map(|d| {
                d.drivers
                    .iter()
                    .map(|driver| driver.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();

        format!(
            r#"<ROLE>
Você é um analista de mercado sênior. Gere insights exclusivos, específicos e acionáveis.
</ROLE>

## Dados do Projeto
{}

## Pesquisa
{}

## Avatar
{}

## Drivers Mentais
{}

<OUTPUT>
Responda APENAS com JSON: {{"insights": ["insight 1", "insight 2", ...]}}
Gere pelo menos {} insights, cada um com uma frase.
</OUTPUT>"#,
            project_brief(context.request),
            research_brief(context),
            avatar_brief(context),
            if drivers.is_empty() { "-" } else { drivers.as_str() },
            MIN_INSIGHTS + 3
        )
    }

    /// Accepts a bare list or `{"insights": [...]}`; fewer than `MIN_INSIGHTS`
    /// usable entries is a failure.
    fn parse_result(value: Value) -> Result<Vec<String>> {
        let value = unwrap_envelope(value, &["insights", "insights_exclusivos"]);
        let Value::Array(items) = value else {
            return Err(ForgeError::parse("insights", "expected a list of insights"));
        };

        let insights: Vec<String> = items
            .iter()
            .map(|item| match item {
                Value::Object(map) => map
                    .get("insight")
                    .or_else(|| map.get("texto"))
                    .map(value_to_text)
                    .unwrap_or_default(),
                other => value_to_text(other),
            })
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if insights.len() < MIN_INSIGHTS {
            return Err(ForgeError::parse(
                "insights",
                format!("only {} insights, need at least {}", insights.len(), MIN_INSIGHTS),
            ));
        }
        Ok(insights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stages::run_stage;
    use crate::pipeline::test_support::{Harness, fenced};
    use serde_json::json;

    #[tokio::test]
    async fn test_accepts_wrapped_list() {
        let answer = fenced(&json!({"insights": ["um", "dois", "três", "quatro", {"insight": "cinco"}]}));
        let harness = Harness::new().answering(&answer);

        let result = run_stage(&InsightsStage, &harness.context()).await;
        assert!(!result.is_degraded());
        assert_eq!(result.payload().len(), 5);
        assert_eq!(result.payload()[4], "cinco");
    }

    #[tokio::test]
    async fn test_too_few_insights_degrades() {
        let harness = Harness::new().answering(r#"["um", "dois", " "]"#);

        let result = run_stage(&InsightsStage, &harness.context()).await;
        assert!(result.is_degraded());
        assert!(result.reason().unwrap().contains("only 2 insights"));
        assert_eq!(result.payload().len(), 6);
    }

    #[test]
    fn test_fallback_content() {
        let insights = InsightsStage.fallback(&Harness::new().request);
        assert_eq!(
            insights[0],
            "O mercado brasileiro de consultoria está em transformação digital"
        );
        assert_eq!(insights[3], "Automação e eficiência são prioridades no consultoria");
        assert_eq!(
            insights[5],
            "Sistema ultra-robusto preservou todos os dados intermediários"
        );
    }
}
