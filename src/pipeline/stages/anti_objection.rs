//! Anti-Objection Stage
//!
//! Maps the avatar's objections to counter-arguments and ready-made scripts.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use super::helpers::{avatar_brief, unwrap_envelope};
use super::{GenerationConfig, Stage, StageContext, project_brief, run_generation};
use crate::types::{AnalysisRequest, AntiObjection, Objection, Result, StageKind};

#[derive(Default)]
pub struct AntiObjectionStage;

#[async_trait::async_trait]
impl Stage for AntiObjectionStage {
    type Output = AntiObjection;

    fn kind(&self) -> StageKind {
        StageKind::AntiObjection
    }

    async fn generate(&self, context: &StageContext<'_>) -> Result<AntiObjection> {
        run_generation(
            context,
            GenerationConfig {
                kind: StageKind::AntiObjection,
                build_prompt: Box::new(Self::build_prompt),
                parse_result: Box::new(Self::parse_result),
                debug_result: Box::new(|system: &AntiObjection| {
                    format!(
                        "{} objections, {} emergency lines",
                        system.objections.len(),
                        system.emergency_arsenal.len()
                    )
                }),
            },
        )
        .await
    }

    fn fallback(&self, request: &AnalysisRequest) -> AntiObjection {
        let segment = &request.segment;
        let objection = |objection: &str, counter: String| Objection {
            objection: objection.to_string(),
            counter,
            ..Default::default()
        };

        let mut objections = BTreeMap::new();
        objections.insert(
            "tempo".to_string(),
            objection(
                "Não tenho tempo",
                format!("Cada mês sem otimizar {} custa oportunidades", segment),
            ),
        );
        objections.insert(
            "dinheiro".to_string(),
            objection(
                "Não tenho orçamento",
                format!("ROI em {} paga investimento rapidamente", segment),
            ),
        );

        AntiObjection {
            objections,
            emergency_arsenal: vec![
                format!("Quantas oportunidades em {} você já perdeu por hesitar?", segment),
                format!("Seus concorrentes em {} não estão esperando você se decidir", segment),
                format!("O custo de não agir em {} é maior que o investimento", segment),
            ],
            validation_status: None,
            fallback_mode: true,
            extra: Default::default(),
        }
    }
}

impl AntiObjectionStage {
    fn build_prompt(context: &StageContext<'_>) -> String {
        format!(
            r#"<ROLE>
Você é um especialista em neutralização de objeções de venda.
</ROLE>

## Dados do Projeto
{}

## Avatar
{}

<OUTPUT>
Cubra pelo menos as objeções de tempo, dinheiro e confiança. Responda APENAS com JSON:
{}
</OUTPUT>"#,
            project_brief(context.request),
            avatar_brief(context),
            json!({
                "objecoes_universais": {
                    "tempo": {"objecao": "", "contra_ataque": "", "scripts": [""]},
                    "dinheiro": {"objecao": "", "contra_ataque": "", "scripts": [""]},
                    "confianca": {"objecao": "", "contra_ataque": "", "scripts": [""]}
                },
                "arsenal_emergencia": [""]
            })
        )
    }

    fn parse_result(value: Value) -> Result<AntiObjection> {
        let value = unwrap_envelope(value, &["sistema_anti_objecao"]);
        match value {
            Value::Array(items) => {
                let list: Vec<Objection> = serde_json::from_value(Value::Array(items))?;
                Ok(AntiObjection {
                    objections: list
                        .into_iter()
                        .enumerate()
                        .map(|(i, o)| (format!("objecao_{}", i + 1), o))
                        .collect(),
                    ..Default::default()
                })
            }
            other => Ok(serde_json::from_value(other)?),
        }
    }
}
