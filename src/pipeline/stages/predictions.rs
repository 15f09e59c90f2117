//! Future Predictions Stage

use serde_json::{Value, json};

use super::helpers::{research_brief, unwrap_envelope};
use super::{GenerationConfig, Stage, StageContext, project_brief, run_generation};
use crate::types::{AnalysisRequest, FuturePredictions, Result, StageKind};

#[derive(Default)]
pub struct PredictionsStage;

#[async_trait::async_trait]
impl Stage for PredictionsStage {
    type Output = FuturePredictions;

    fn kind(&self) -> StageKind {
        StageKind::FuturePredictions
    }

    async fn generate(&self, context: &StageContext<'_>) -> Result<FuturePredictions> {
        run_generation(
            context,
            GenerationConfig {
                kind: StageKind::FuturePredictions,
                build_prompt: Box::new(Self::build_prompt),
                parse_result: Box::new(Self::parse_result),
                debug_result: Box::new(|p: &FuturePredictions| {
                    format!("{} trends, {} opportunities", p.trends.len(), p.opportunities.len())
                }),
            },
        )
        .await
    }

    fn fallback(&self, request: &AnalysisRequest) -> FuturePredictions {
        let segment = &request.segment;
        FuturePredictions {
            trends: vec![
                format!("Digitalização acelerada no {}", segment),
                format!("Automação de processos em {}", segment),
                format!("Personalização em massa no {}", segment),
            ],
            opportunities: vec![
                format!("Liderança tecnológica em {}", segment),
                format!("Expansão de mercado em {}", segment),
                format!("Inovação disruptiva em {}", segment),
            ],
            fallback_mode: true,
            extra: Default::default(),
        }
    }
}

impl PredictionsStage {
    fn build_prompt(context: &StageContext<'_>) -> String {
        format!(
            r#"<ROLE>
Você é um futurista de mercado. Projete os próximos 36 meses do segmento.
</ROLE>

## Dados do Projeto
{}

## Pesquisa
{}

<OUTPUT>
Responda APENAS com JSON:
{}
</OUTPUT>"#,
            project_brief(context.request),
            research_brief(context),
            json!({"tendencias_emergentes": [""], "oportunidades_futuras": [""]})
        )
    }

    fn parse_result(value: Value) -> Result<FuturePredictions> {
        let value = unwrap_envelope(value, &["predicoes_futuro_completas", "predicoes"]);
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stages::run_stage;
    use crate::pipeline::test_support::{Harness, fenced};

    #[tokio::test]
    async fn test_parses_predictions() {
        let answer = fenced(&json!({
            "tendencias_emergentes": ["IA generativa"],
            "oportunidades_futuras": "Nichos regionais",
            "cenarios": {"otimista": "x"}
        }));
        let harness = Harness::new().answering(&answer);

        let predictions = run_stage(&PredictionsStage, &harness.context()).await.into_payload();
        assert_eq!(predictions.trends, vec!["IA generativa"]);
        assert_eq!(predictions.opportunities, vec!["Nichos regionais"]);
        assert!(predictions.extra.contains_key("cenarios"));
    }

    #[test]
    fn test_fallback_content() {
        let predictions = PredictionsStage.fallback(&Harness::new().request);
        assert_eq!(predictions.trends[0], "Digitalização acelerada no consultoria");
        assert_eq!(predictions.trends[2], "Personalização em massa no consultoria");
        assert_eq!(predictions.opportunities[1], "Expansão de mercado em consultoria");
        assert!(predictions.fallback_mode);
    }
}
