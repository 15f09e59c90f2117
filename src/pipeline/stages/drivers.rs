//! Mental Drivers Stage
//!
//! Custom psychological triggers built on top of the avatar's pains and desires.

use serde_json::{Value, json};

use super::helpers::{avatar_brief, unwrap_envelope};
use super::{GenerationConfig, Stage, StageContext, project_brief, run_generation};
use crate::types::{AnalysisRequest, Driver, MentalDrivers, Result, StageKind};

#[derive(Default)]
pub struct DriversStage;

#[async_trait::async_trait]
impl Stage for DriversStage {
    type Output = MentalDrivers;

    fn kind(&self) -> StageKind {
        StageKind::Drivers
    }

    async fn generate(&self, context: &StageContext<'_>) -> Result<MentalDrivers> {
        run_generation(
            context,
            GenerationConfig {
                kind: StageKind::Drivers,
                build_prompt: Box::new(Self::build_prompt),
                parse_result: Box::new(Self::parse_result),
                debug_result: Box::new(|drivers: &MentalDrivers| {
                    format!("{} drivers", drivers.drivers.len())
                }),
            },
        )
        .await
    }

    fn fallback(&self, request: &AnalysisRequest) -> MentalDrivers {
        let segment = &request.segment;
        let driver = |name: String, trigger: String, definition: String| Driver {
            name,
            trigger,
            definition,
            ..Default::default()
        };
        MentalDrivers {
            drivers: vec![
                driver(
                    format!("Urgência {}", segment),
                    format!("Tempo limitado para dominar {}", segment),
                    format!("Cada dia sem otimizar {} é oportunidade perdida", segment),
                ),
                driver(
                    "Método vs Sorte".to_string(),
                    "Diferença entre método e tentativa".to_string(),
                    format!("Parar de tentar e começar a aplicar método em {}", segment),
                ),
            ],
            total_drivers: 2,
            validation_status: None,
            fallback_mode: true,
            extra: Default::default(),
        }
    }
}

impl DriversStage {
    fn build_prompt(context: &StageContext<'_>) -> String {
        format!(
            r#"<ROLE>
Você é um arquiteto de drivers mentais: gatilhos psicológicos que instalam no público
a urgência e a convicção necessárias para a compra.
</ROLE>

## Dados do Projeto
{}

## Avatar
{}

<OUTPUT>
Crie de 3 a 7 drivers customizados para este avatar. Responda APENAS com JSON:
{}
</OUTPUT>"#,
            project_brief(context.request),
            avatar_brief(context),
            json!({
                "drivers_customizados": [{
                    "nome": "",
                    "gatilho_central": "",
                    "definicao_visceral": "",
                    "roteiro_ativacao": {
                        "pergunta_abertura": "",
                        "historia_analogia": "",
                        "comando_acao": ""
                    },
                    "frases_ancoragem": [""]
                }]
            })
        )
    }

    fn parse_result(value: Value) -> Result<MentalDrivers> {
        let value = unwrap_envelope(value, &["drivers_mentais_customizados", "drivers_mentais"]);
        let mut drivers: MentalDrivers = match value {
            Value::Array(items) => MentalDrivers {
                drivers: serde_json::from_value(Value::Array(items))?,
                ..Default::default()
            },
            other => serde_json::from_value(other)?,
        };
        drivers.total_drivers = drivers.drivers.len();
        Ok(drivers)
    }
}
