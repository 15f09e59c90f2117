//! Pre-Pitch Stage
//!
//! Three-beat script (opening, development, closing) that warms the audience
//! up before the offer.

use serde_json::{Value, json};

use super::helpers::{avatar_brief, unwrap_envelope};
use super::{GenerationConfig, Stage, StageContext, project_brief, run_generation};
use crate::types::{AnalysisRequest, PitchBeat, PitchScript, PrePitch, Result, StageKind};

#[derive(Default)]
pub struct PrePitchStage;

#[async_trait::async_trait]
impl Stage for PrePitchStage {
    type Output = PrePitch;

    fn kind(&self) -> StageKind {
        StageKind::PrePitch
    }

    async fn generate(&self, context: &StageContext<'_>) -> Result<PrePitch> {
        run_generation(
            context,
            GenerationConfig {
                kind: StageKind::PrePitch,
                build_prompt: Box::new(Self::build_prompt),
                parse_result: Box::new(Self::parse_result),
                debug_result: Box::new(|pitch: &PrePitch| {
                    let chars: usize = pitch
                        .script
                        .beats()
                        .iter()
                        .map(|(_, beat)| beat.script.chars().count())
                        .sum();
                    format!("script with {} chars", chars)
                }),
            },
        )
        .await
    }

    fn fallback(&self, request: &AnalysisRequest) -> PrePitch {
        let segment = &request.segment;
        let beat = |script: String, goal: &str| PitchBeat {
            script,
            goal: goal.to_string(),
        };
        PrePitch {
            script: PitchScript {
                opening: beat(
                    format!("Deixa eu te fazer uma pergunta sobre {}...", segment),
                    "Quebrar padrão",
                ),
                development: beat(
                    format!("Cada dia sem otimizar {} é oportunidade perdida...", segment),
                    "Amplificar dor",
                ),
                closing: beat(
                    "Agora você tem duas escolhas...".to_string(),
                    "Criar urgência",
                ),
            },
            fallback_mode: true,
            extra: Default::default(),
        }
    }
}

impl PrePitchStage {
    fn build_prompt(context: &StageContext<'_>) -> String {
        let drivers = context
            .upstream
            .drivers
            .as_ref()
            .map(|d| {
                d.drivers
                    .iter()
                    .map(|driver| format!("- {}: {}", driver.name, driver.trigger))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();

        format!(
            r#"<ROLE>
Você é um roteirista de lançamentos. Escreva o pré-pitch invisível: a sequência que prepara
o público emocionalmente antes da oferta, orquestrando os drivers mentais abaixo.
</ROLE>

## Dados do Projeto
{}

## Avatar
{}

## Drivers Mentais
{}

<OUTPUT>
Responda APENAS com JSON:
{}
</OUTPUT>"#,
            project_brief(context.request),
            avatar_brief(context),
            drivers,
            json!({
                "roteiro_completo": {
                    "abertura": {"script": "", "objetivo": ""},
                    "desenvolvimento": {"script": "", "objetivo": ""},
                    "fechamento": {"script": "", "objetivo": ""}
                }
            })
        )
    }

    fn parse_result(value: Value) -> Result<PrePitch> {
        let value = unwrap_envelope(value, &["pre_pitch_invisivel", "pre_pitch"]);
        // Some answers skip the `roteiro_completo` level
        let value = match value {
            Value::Object(map) if !map.contains_key("roteiro_completo") && map.contains_key("abertura") => {
                json!({ "roteiro_completo": Value::Object(map) })
            }
            other => other,
        };
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stages::run_stage;
    use crate::pipeline::test_support::{Harness, fenced};

    #[tokio::test]
    async fn test_accepts_flat_script() {
        let answer = fenced(&json!({
            "abertura": {"script": "Você já parou para pensar...", "objetivo": "Curiosidade"},
            "fechamento": {"script": "As portas abrem amanhã.", "objetivo": "Urgência"}
        }));
        let harness = Harness::new().answering(&answer);

        let pitch = run_stage(&PrePitchStage, &harness.context()).await.into_payload();
        assert_eq!(pitch.script.opening.goal, "Curiosidade");
        assert_eq!(pitch.script.closing.script, "As portas abrem amanhã.");
        assert!(pitch.script.development.script.is_empty());
    }

    #[test]
    fn test_fallback_content() {
        let pitch = PrePitchStage.fallback(&Harness::new().request);
        let beats = pitch.script.beats();
        assert_eq!(beats[0].1.script, "Deixa eu te fazer uma pergunta sobre consultoria...");
        assert_eq!(beats[0].1.goal, "Quebrar padrão");
        assert_eq!(beats[1].1.goal, "Amplificar dor");
        assert_eq!(beats[2].1.script, "Agora você tem duas escolhas...");
        assert_eq!(beats[2].1.goal, "Criar urgência");
    }
}
