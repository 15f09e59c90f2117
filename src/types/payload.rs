//! Typed stage payloads.
//!
//! Each payload names the keys the rest of the system relies on and keeps
//! anything else a model produced in a flattened `extra` map. Deserialization
//! is deliberately loose: text fields accept lists and numbers, list fields
//! accept a single string.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::utils::{de_loose_list, de_loose_text};

fn is_false(value: &bool) -> bool {
    !*value
}

/// Emptiness check shared by every payload. A blank payload is treated the
/// same as a missing one by the completeness guarantee.
pub trait StagePayload {
    fn is_blank(&self) -> bool;
}

impl StagePayload for Vec<String> {
    fn is_blank(&self) -> bool {
        self.iter().all(|s| s.trim().is_empty())
    }
}

// =============================================================================
// Research
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebResearch {
    #[serde(rename = "query_executada")]
    pub query: String,
    #[serde(rename = "total_resultados")]
    pub total_results: usize,
    #[serde(rename = "conteudo_extraido", skip_serializing_if = "Vec::is_empty")]
    pub extracted: Vec<ExtractedContent>,
    #[serde(rename = "estatisticas")]
    pub stats: ResearchStats,
    #[serde(rename = "fontes")]
    pub sources: Vec<ResearchSource>,
    #[serde(skip_serializing_if = "is_false")]
    pub fallback_mode: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractedContent {
    pub url: String,
    #[serde(rename = "titulo")]
    pub title: String,
    #[serde(rename = "conteudo")]
    pub content: String,
    pub quality_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchStats {
    pub total_queries: usize,
    pub total_conteudo: usize,
    pub fontes_unicas: usize,
    pub qualidade_media: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchSource {
    pub title: String,
    pub url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub snippet: String,
}

impl StagePayload for WebResearch {
    fn is_blank(&self) -> bool {
        self.query.trim().is_empty() && self.sources.is_empty() && self.extracted.is_empty()
    }
}

// =============================================================================
// Avatar
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Avatar {
    #[serde(rename = "nome_ficticio", deserialize_with = "de_loose_text")]
    pub fictional_name: String,
    #[serde(rename = "perfil_demografico")]
    pub demographics: Demographics,
    #[serde(rename = "perfil_psicografico")]
    pub psychographics: Psychographics,
    #[serde(rename = "dores_viscerais", deserialize_with = "de_loose_list")]
    pub pains: Vec<String>,
    #[serde(rename = "desejos_secretos", deserialize_with = "de_loose_list")]
    pub desires: Vec<String>,
    #[serde(rename = "objecoes_reais", deserialize_with = "de_loose_list")]
    pub objections: Vec<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub fallback_mode: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Demographics {
    #[serde(rename = "idade", deserialize_with = "de_loose_text")]
    pub age: String,
    #[serde(rename = "genero", deserialize_with = "de_loose_text")]
    pub gender: String,
    #[serde(rename = "renda", deserialize_with = "de_loose_text")]
    pub income: String,
    #[serde(rename = "escolaridade", deserialize_with = "de_loose_text")]
    pub education: String,
    #[serde(rename = "localizacao", deserialize_with = "de_loose_text")]
    pub location: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Demographics {
    /// Labelled entries in display order, skipping empty values.
    pub fn entries(&self) -> Vec<(&'static str, &str)> {
        [
            ("idade", self.age.as_str()),
            ("genero", self.gender.as_str()),
            ("renda", self.income.as_str()),
            ("escolaridade", self.education.as_str()),
            ("localizacao", self.location.as_str()),
        ]
        .into_iter()
        .filter(|(_, v)| !v.trim().is_empty())
        .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Psychographics {
    #[serde(rename = "personalidade", deserialize_with = "de_loose_text")]
    pub personality: String,
    #[serde(rename = "valores", deserialize_with = "de_loose_text")]
    pub values: String,
    #[serde(rename = "interesses", deserialize_with = "de_loose_text")]
    pub interests: String,
    #[serde(rename = "comportamento_compra", deserialize_with = "de_loose_text")]
    pub buying_behavior: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Psychographics {
    pub fn entries(&self) -> Vec<(&'static str, &str)> {
        [
            ("personalidade", self.personality.as_str()),
            ("valores", self.values.as_str()),
            ("interesses", self.interests.as_str()),
            ("comportamento_compra", self.buying_behavior.as_str()),
        ]
        .into_iter()
        .filter(|(_, v)| !v.trim().is_empty())
        .collect()
    }
}

impl StagePayload for Avatar {
    fn is_blank(&self) -> bool {
        self.fictional_name.trim().is_empty() && self.pains.is_empty() && self.desires.is_empty()
    }
}

// =============================================================================
// Mental Drivers
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MentalDrivers {
    #[serde(rename = "drivers_customizados")]
    pub drivers: Vec<Driver>,
    pub total_drivers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_status: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub fallback_mode: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Driver {
    #[serde(rename = "nome", deserialize_with = "de_loose_text")]
    pub name: String,
    #[serde(rename = "gatilho_central", deserialize_with = "de_loose_text")]
    pub trigger: String,
    #[serde(rename = "definicao_visceral", deserialize_with = "de_loose_text")]
    pub definition: String,
    #[serde(rename = "roteiro_ativacao", skip_serializing_if = "Option::is_none")]
    pub activation: Option<ActivationScript>,
    #[serde(
        rename = "frases_ancoragem",
        deserialize_with = "de_loose_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub anchor_phrases: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivationScript {
    #[serde(rename = "pergunta_abertura", deserialize_with = "de_loose_text")]
    pub opening_question: String,
    #[serde(rename = "historia_analogia", deserialize_with = "de_loose_text")]
    pub analogy: String,
    #[serde(rename = "comando_acao", deserialize_with = "de_loose_text")]
    pub call_to_action: String,
}

impl StagePayload for MentalDrivers {
    fn is_blank(&self) -> bool {
        self.drivers.is_empty()
    }
}

// =============================================================================
// Anti-Objection
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiObjection {
    #[serde(rename = "objecoes_universais")]
    pub objections: BTreeMap<String, Objection>,
    #[serde(
        rename = "arsenal_emergencia",
        deserialize_with = "de_loose_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub emergency_arsenal: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_status: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub fallback_mode: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Objection {
    #[serde(rename = "objecao", deserialize_with = "de_loose_text")]
    pub objection: String,
    #[serde(rename = "contra_ataque", deserialize_with = "de_loose_text")]
    pub counter: String,
    #[serde(deserialize_with = "de_loose_list", skip_serializing_if = "Vec::is_empty")]
    pub scripts: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StagePayload for AntiObjection {
    fn is_blank(&self) -> bool {
        self.objections.is_empty()
    }
}

// =============================================================================
// Pre-Pitch
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrePitch {
    #[serde(rename = "roteiro_completo")]
    pub script: PitchScript,
    #[serde(skip_serializing_if = "is_false")]
    pub fallback_mode: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchScript {
    #[serde(rename = "abertura")]
    pub opening: PitchBeat,
    #[serde(rename = "desenvolvimento")]
    pub development: PitchBeat,
    #[serde(rename = "fechamento")]
    pub closing: PitchBeat,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchBeat {
    #[serde(deserialize_with = "de_loose_text")]
    pub script: String,
    #[serde(rename = "objetivo", deserialize_with = "de_loose_text")]
    pub goal: String,
}

impl PitchScript {
    pub fn beats(&self) -> [(&'static str, &PitchBeat); 3] {
        [
            ("abertura", &self.opening),
            ("desenvolvimento", &self.development),
            ("fechamento", &self.closing),
        ]
    }
}

impl StagePayload for PrePitch {
    fn is_blank(&self) -> bool {
        self.script
            .beats()
            .iter()
            .all(|(_, beat)| beat.script.trim().is_empty())
    }
}

// =============================================================================
// Visual Proofs
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualProof {
    #[serde(rename = "nome", deserialize_with = "de_loose_text")]
    pub name: String,
    #[serde(rename = "experimento", deserialize_with = "de_loose_text")]
    pub experiment: String,
    #[serde(rename = "materiais", deserialize_with = "de_loose_list")]
    pub materials: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StagePayload for Vec<VisualProof> {
    fn is_blank(&self) -> bool {
        self.iter().all(|p| p.name.trim().is_empty())
    }
}

// =============================================================================
// Future Predictions
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FuturePredictions {
    #[serde(rename = "tendencias_emergentes", deserialize_with = "de_loose_list")]
    pub trends: Vec<String>,
    #[serde(rename = "oportunidades_futuras", deserialize_with = "de_loose_list")]
    pub opportunities: Vec<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub fallback_mode: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StagePayload for FuturePredictions {
    fn is_blank(&self) -> bool {
        self.trends.is_empty() && self.opportunities.is_empty()
    }
}
