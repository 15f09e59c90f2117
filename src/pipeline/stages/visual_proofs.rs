//! Visual Proofs Stage
//!
//! Suggests physical demonstrations that make the promise tangible.

use serde_json::{Value, json};

use super::helpers::{avatar_brief, unwrap_envelope};
use super::{GenerationConfig, Stage, StageContext, project_brief, run_generation};
use crate::types::{AnalysisRequest, ForgeError, Result, StageKind, VisualProof};

#[derive(Default)]
pub struct VisualProofsStage;

#[async_trait::async_trait]
impl Stage for VisualProofsStage {
    type Output = Vec<VisualProof>;

    fn kind(&self) -> StageKind {
        StageKind::VisualProofs
    }

    async fn generate(&self, context: &StageContext<'_>) -> Result<Vec<VisualProof>> {
        run_generation(
            context,
            GenerationConfig {
                kind: StageKind::VisualProofs,
                build_prompt: Box::new(Self::build_prompt),
                parse_result: Box::new(Self::parse_result),
                debug_result: Box::new(|proofs: &Vec<VisualProof>| {
                    format!("{} proofs", proofs.len())
                }),
            },
        )
        .await
    }

    fn fallback(&self, request: &AnalysisRequest) -> Vec<VisualProof> {
        let segment = &request.segment;
        let proof = |name: String, experiment: String, materials: [&str; 2]| VisualProof {
            name,
            experiment,
            materials: materials.iter().map(|m| m.to_string()).collect(),
            extra: Default::default(),
        };
        vec![
            proof(
                format!("Resultados em {}", segment),
                format!("Demonstração de resultados reais em {}", segment),
                ["Gráficos de crescimento", "Dados de performance"],
            ),
            proof(
                "Comparação de Métodos".to_string(),
                format!("Comparação entre abordagem tradicional e otimizada em {}", segment),
                ["Tabelas comparativas", "Métricas de eficiência"],
            ),
        ]
    }
}

impl VisualProofsStage {
    fn build_prompt(context: &StageContext<'_>) -> String {
        format!(
            r#"<ROLE>
Você cria provas visuais: experimentos simples e demonstrações físicas que tornam
a promessa do produto impossível de ignorar.
</ROLE>

## Dados do Projeto
{}

## Avatar
{}

<OUTPUT>
Sugira de 3 a 5 provas. Responda APENAS com JSON:
{}
</OUTPUT>"#,
            project_brief(context.request),
            avatar_brief(context),
            json!({"provas_visuais": [{"nome": "", "experimento": "", "materiais": [""]}]})
        )
    }

    fn parse_result(value: Value) -> Result<Vec<VisualProof>> {
        let value = unwrap_envelope(
            value,
            &["provas_visuais", "provas_visuais_sugeridas", "provas"],
        );
        match value {
            Value::Array(_) => Ok(serde_json::from_value(value)?),
            Value::Object(_) => Ok(vec![serde_json::from_value(value)?]),
            _ => Err(ForgeError::parse("visual_proofs", "expected a list of proofs")),
        }
    }
}
