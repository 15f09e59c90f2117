//! Avatar Stage
//!
//! Builds the ideal-customer profile from the project data and research.

use serde_json::Value;

use super::helpers::{research_brief, unwrap_envelope};
use super::{GenerationConfig, Stage, StageContext, project_brief, run_generation};
use crate::types::{
    AnalysisRequest, Avatar, Demographics, ForgeError, Psychographics, Result, StageKind,
};

#[derive(Default)]
pub struct AvatarStage;

#[async_trait::async_trait]
impl Stage for AvatarStage {
    type Output = Avatar;

    fn kind(&self) -> StageKind {
        StageKind::Avatar
    }

    async fn generate(&self, context: &StageContext<'_>) -> Result<Avatar> {
        run_generation(
            context,
            GenerationConfig {
                kind: StageKind::Avatar,
                build_prompt: Box::new(Self::build_prompt),
                parse_result: Box::new(Self::parse_result),
                debug_result: Box::new(|avatar: &Avatar| {
                    format!(
                        "'{}' with {} pains, {} desires, {} objections",
                        avatar.fictional_name,
                        avatar.pains.len(),
                        avatar.desires.len(),
                        avatar.objections.len()
                    )
                }),
            },
        )
        .await
    }

    fn fallback(&self, request: &AnalysisRequest) -> Avatar {
        let segment = &request.segment;
        Avatar {
            fictional_name: format!("Profissional {} Brasileiro", segment),
            demographics: Demographics {
                age: "30-45 anos - faixa de maior poder aquisitivo".to_string(),
                gender: "Distribuição equilibrada".to_string(),
                income: "R$ 8.000 - R$ 35.000 - classe média alta".to_string(),
                education: "Superior completo".to_string(),
                location: "Grandes centros urbanos".to_string(),
                extra: Default::default(),
            },
            psychographics: Psychographics {
                personality: "Ambiciosos, determinados, orientados a resultados".to_string(),
                values: "Liberdade financeira, reconhecimento profissional".to_string(),
                interests: "Crescimento profissional, tecnologia, investimentos".to_string(),
                buying_behavior: "Pesquisam extensivamente, decidem por lógica mas compram por emoção"
                    .to_string(),
                extra: Default::default(),
            },
            pains: vec![
                format!("Trabalhar excessivamente em {} sem ver crescimento proporcional", segment),
                "Sentir-se sempre correndo atrás da concorrência".to_string(),
                "Ver competidores menores crescendo mais rapidamente".to_string(),
                "Não conseguir se desconectar do trabalho".to_string(),
                "Desperdiçar potencial em tarefas operacionais".to_string(),
            ],
            desires: vec![
                format!("Ser reconhecido como autoridade no mercado de {}", segment),
                "Ter um negócio que funcione sem presença constante".to_string(),
                "Ganhar dinheiro de forma passiva".to_string(),
                "Ter liberdade total de horários e decisões".to_string(),
                "Deixar um legado significativo".to_string(),
            ],
            objections: vec![
                "Já tentei várias estratégias e nenhuma funcionou".to_string(),
                "Não tenho tempo para implementar nova estratégia".to_string(),
                format!("Meu nicho em {} é muito específico", segment),
                "Preciso ver resultados rápidos".to_string(),
            ],
            fallback_mode: true,
            extra: Default::default(),
        }
    }
}

impl AvatarStage {
    fn build_prompt(context: &StageContext<'_>) -> String {
        format!(
            r#"<ROLE>
Você é um estrategista de marketing especializado em psicologia do consumidor brasileiro.
Sua tarefa é construir o avatar do cliente ideal com base nos dados do projeto e na pesquisa.
</ROLE>

## Dados do Projeto
{}

## Pesquisa de Mercado
{}

<OUTPUT>
Responda APENAS com um objeto JSON neste formato:
{{
  "nome_ficticio": "nome que represente o avatar",
  "perfil_demografico": {{"idade": "", "genero": "", "renda": "", "escolaridade": "", "localizacao": ""}},
  "perfil_psicografico": {{"personalidade": "", "valores": "", "interesses": "", "comportamento_compra": ""}},
  "dores_viscerais": ["pelo menos 5 dores específicas do segmento"],
  "desejos_secretos": ["pelo menos 5 desejos"],
  "objecoes_reais": ["pelo menos 4 objeções"]
}}
</OUTPUT>"#,
            project_brief(context.request),
            research_brief(context)
        )
    }

    fn parse_result(value: Value) -> Result<Avatar> {
        let value = unwrap_envelope(value, &["avatar", "avatar_ultra_detalhado"]);
        if !value.is_object() {
            return Err(ForgeError::parse("avatar", "expected a JSON object"));
        }
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stages::run_stage;
    use crate::pipeline::test_support::{Harness, fenced};
    use crate::types::StagePayload;
    use serde_json::json;

    #[tokio::test]
    async fn test_parses_live_avatar() {
        let answer = fenced(&json!({
            "avatar_ultra_detalhado": {
                "nome_ficticio": "Marina, a consultora sobrecarregada",
                "perfil_demografico": {"idade": "35-44", "renda": "R$ 15 mil"},
                "dores_viscerais": ["Agenda lotada", "Clientes que pechincham"],
                "desejos_secretos": ["Escalar sem contratar"],
                "arquetipo": "cuidadora"
            }
        }));
        let harness = Harness::new().answering(&answer);

        let result = run_stage(&AvatarStage, &harness.context()).await;
        assert!(!result.is_degraded());
        let avatar = result.payload();
        assert_eq!(avatar.fictional_name, "Marina, a consultora sobrecarregada");
        assert_eq!(avatar.demographics.age, "35-44");
        assert_eq!(avatar.pains.len(), 2);
        assert_eq!(avatar.extra["arquetipo"], "cuidadora");
        assert!(!avatar.fallback_mode);
    }

    #[tokio::test]
    async fn test_unparseable_answer_degrades() {
        let harness = Harness::new().answering("Desculpe, não consigo ajudar com isso.");
        let result = run_stage(&AvatarStage, &harness.context()).await;

        assert!(result.is_degraded());
        assert!(result.reason().unwrap().contains("avatar"));
        assert_eq!(result.payload(), &AvatarStage.fallback(&harness.request));
    }

    #[tokio::test]
    async fn test_empty_object_degrades() {
        let harness = Harness::new().answering("{}");
        let result = run_stage(&AvatarStage, &harness.context()).await;
        assert_eq!(result.reason(), Some("empty payload"));
    }

    #[test]
    fn test_fallback_content() {
        let request = Harness::new().request;
        let avatar = AvatarStage.fallback(&request);
        assert_eq!(avatar.fictional_name, "Profissional consultoria Brasileiro");
        assert_eq!(avatar.pains.len(), 5);
        assert_eq!(avatar.desires.len(), 5);
        assert_eq!(avatar.objections.len(), 4);
        assert_eq!(avatar.objections[2], "Meu nicho em consultoria é muito específico");
        assert_eq!(avatar.demographics.income, "R$ 8.000 - R$ 35.000 - classe média alta");
        assert!(avatar.fallback_mode);
        assert!(!avatar.is_blank());
    }
}
