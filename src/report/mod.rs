//! Markdown Report
//!
//! Pure rendering of an [`AnalysisResult`]. Live and fallback payloads share
//! the same shape, so the renderer never checks which one it got.

use std::fs;
use std::path::Path;

use serde_json::{Map, Value};

use crate::types::{
    AnalysisResult, AntiObjection, Avatar, FuturePredictions, MentalDrivers, PrePitch, Result,
    StageKind, VisualProof, WebResearch, title_case_key, value_to_text,
};

const NOT_INFORMED: &str = "Não informado";

/// Render the full report.
pub fn render_markdown(result: &AnalysisResult) -> String {
    let mut md = String::new();

    render_header(&mut md, result);
    render_table_of_contents(&mut md, result);
    render_summary(&mut md, result);

    for kind in StageKind::ALL {
        if kind == StageKind::ProjectData || !result.has_section(kind) {
            continue;
        }
        md.push_str(&format!("## {}\n\n", kind.title()));
        match kind {
            StageKind::Research => render_research(&mut md, result.web_research.as_ref()),
            StageKind::Avatar => render_avatar(&mut md, result.avatar.as_ref()),
            StageKind::Drivers => render_drivers(&mut md, result.drivers.as_ref()),
            StageKind::AntiObjection => {
                render_anti_objection(&mut md, result.anti_objection.as_ref())
            }
            StageKind::Insights => render_numbered(&mut md, result.insights.iter().flatten()),
            StageKind::PrePitch => render_pre_pitch(&mut md, result.pre_pitch.as_ref()),
            StageKind::VisualProofs => render_visual_proofs(&mut md, result.visual_proofs.as_ref()),
            StageKind::FuturePredictions => {
                render_predictions(&mut md, result.future_predictions.as_ref())
            }
            StageKind::ProjectData => {}
        }
        md.push_str("---\n\n");
    }

    render_footer(&mut md, result);
    md
}

/// Render and write the report, creating parent directories as needed.
pub fn write_report(result: &AnalysisResult, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, render_markdown(result))?;
    Ok(())
}

fn render_header(md: &mut String, result: &AnalysisResult) {
    let project = result.project_data.as_ref();
    md.push_str("# Análise Ultra-Detalhada de Mercado\n\n");
    md.push_str(&format!(
        "**Segmento:** {}  \n",
        project.map_or(NOT_INFORMED, |p| p.segment.as_str())
    ));
    md.push_str(&format!(
        "**Produto/Serviço:** {}  \n",
        project.and_then(|p| p.product.as_deref()).unwrap_or(NOT_INFORMED)
    ));
    if let Some(at) = result.metadata.generated_at {
        md.push_str(&format!("**Gerado em:** {}  \n", at.format("%d/%m/%Y %H:%M:%S")));
    }
    if let Some(session) = result.session_id() {
        md.push_str(&format!("**Sessão:** `{}`  \n", session));
    }
    md.push('\n');

    if result.is_emergency() {
        md.push_str("> ⚠️ **Modo de emergência:** apenas as seções obrigatórias foram geradas, a partir de conteúdo padrão.\n\n");
    }
    md.push_str("---\n\n");
}

fn render_table_of_contents(md: &mut String, result: &AnalysisResult) {
    md.push_str("## Índice\n\n");
    let sections = StageKind::ALL
        .into_iter()
        .filter(|k| *k != StageKind::ProjectData && result.has_section(*k));
    for (i, kind) in sections.enumerate() {
        md.push_str(&format!(
            "{}. [{}](#{})\n",
            i + 1,
            kind.title(),
            kind.wire_key().replace('_', "-")
        ));
    }
    md.push_str("\n---\n\n");
}

fn render_summary(md: &mut String, result: &AnalysisResult) {
    md.push_str("## Resumo Executivo\n\n");

    if let Some(project) = &result.project_data {
        md.push_str(&format!(
            "- **Público-Alvo:** {}\n",
            project.audience.as_deref().unwrap_or(NOT_INFORMED)
        ));
        md.push_str(&format!(
            "- **Preço:** {}\n",
            project
                .price
                .map_or_else(|| NOT_INFORMED.to_string(), |p| format!("R$ {:.2}", p))
        ));
    }
    md.push_str(&format!(
        "- **Componentes Gerados:** {}\n",
        result.present_sections().len()
    ));
    if !result.metadata.processing_time_formatted.is_empty() {
        md.push_str(&format!(
            "- **Tempo de Processamento:** {}\n",
            result.metadata.processing_time_formatted
        ));
    }
    if let Some(quality) = &result.metadata.quality {
        md.push_str(&format!("- **Qualidade:** {:.1}/100\n", quality.quality_score));
    }
    if let Some(completeness) = &result.completeness {
        md.push_str(&format!(
            "- **Completude:** {:.0}%\n",
            completeness.completeness_rate
        ));
    }
    md.push('\n');

    if !result.metadata.degraded_stages.is_empty() {
        md.push_str("### Seções com conteúdo padrão\n\n");
        for (key, reason) in &result.metadata.degraded_stages {
            let title = StageKind::from_wire_key(key).map_or(key.as_str(), |k| k.title());
            md.push_str(&format!("- {} ({})\n", title, reason));
        }
        md.push('\n');
    }
    md.push_str("---\n\n");
}

fn render_research(md: &mut String, research: Option<&WebResearch>) {
    let Some(research) = research else {
        return;
    };
    md.push_str(&format!("**Query:** {}\n\n", research.query));
    md.push_str("### Estatísticas\n\n");
    md.push_str(&format!("- **Total de Queries:** {}\n", research.stats.total_queries));
    md.push_str(&format!("- **Total de Resultados:** {}\n", research.total_results));
    md.push_str(&format!("- **Fontes Únicas:** {}\n", research.stats.fontes_unicas));
    md.push_str(&format!(
        "- **Conteúdo Extraído:** {} caracteres\n",
        research.stats.total_conteudo
    ));
    md.push_str(&format!(
        "- **Qualidade Média:** {:.1}%\n\n",
        research.stats.qualidade_media
    ));

    if !research.sources.is_empty() {
        md.push_str("### Principais Fontes\n\n");
        for (i, source) in research.sources.iter().take(10).enumerate() {
            md.push_str(&format!("{}. **{}**\n   - URL: {}\n", i + 1, source.title, source.url));
        }
        md.push('\n');
    }
}

fn render_avatar(md: &mut String, avatar: Option<&Avatar>) {
    let Some(avatar) = avatar else {
        return;
    };
    md.push_str(&format!("**Nome:** {}\n\n", avatar.fictional_name));

    let demographics = avatar.demographics.entries();
    if !demographics.is_empty() {
        md.push_str("### Perfil Demográfico\n\n");
        for (key, value) in demographics {
            md.push_str(&format!("- **{}:** {}\n", title_case_key(key), value));
        }
        md.push('\n');
    }

    let psychographics = avatar.psychographics.entries();
    if !psychographics.is_empty() {
        md.push_str("### Perfil Psicográfico\n\n");
        for (key, value) in psychographics {
            md.push_str(&format!("- **{}:** {}\n", title_case_key(key), value));
        }
        md.push('\n');
    }

    for (title, items) in [
        ("Dores Viscerais", &avatar.pains),
        ("Desejos Secretos", &avatar.desires),
        ("Objeções Reais", &avatar.objections),
    ] {
        if items.is_empty() {
            continue;
        }
        md.push_str(&format!("### {}\n\n", title));
        render_numbered(md, items.iter());
    }
    render_extra(md, &avatar.extra);
}

fn render_drivers(md: &mut String, drivers: Option<&MentalDrivers>) {
    let Some(drivers) = drivers else {
        return;
    };
    for (i, driver) in drivers.drivers.iter().enumerate() {
        md.push_str(&format!("### {}. {}\n\n", i + 1, driver.name));
        if !driver.trigger.is_empty() {
            md.push_str(&format!("- **Gatilho:** {}\n", driver.trigger));
        }
        if !driver.definition.is_empty() {
            md.push_str(&format!("- **Mecânica:** {}\n", driver.definition));
        }
        if let Some(activation) = &driver.activation {
            if !activation.opening_question.is_empty() {
                md.push_str(&format!("- **Pergunta de abertura:** {}\n", activation.opening_question));
            }
            if !activation.analogy.is_empty() {
                md.push_str(&format!("- **Analogia:** {}\n", activation.analogy));
            }
            if !activation.call_to_action.is_empty() {
                md.push_str(&format!("- **Comando de ação:** {}\n", activation.call_to_action));
            }
        }
        for phrase in &driver.anchor_phrases {
            md.push_str(&format!("  - _\"{}\"_\n", phrase));
        }
        md.push('\n');
    }
}

fn render_anti_objection(md: &mut String, system: Option<&AntiObjection>) {
    let Some(system) = system else {
        return;
    };
    for (key, objection) in &system.objections {
        md.push_str(&format!("### {}\n\n", title_case_key(key)));
        md.push_str(&format!("- **Objeção:** {}\n", objection.objection));
        md.push_str(&format!("- **Contra-ataque:** {}\n", objection.counter));
        for script in &objection.scripts {
            md.push_str(&format!("  - {}\n", script));
        }
        md.push('\n');
    }
    if !system.emergency_arsenal.is_empty() {
        md.push_str("### Arsenal de Emergência\n\n");
        for line in &system.emergency_arsenal {
            md.push_str(&format!("- {}\n", line));
        }
        md.push('\n');
    }
}

fn render_pre_pitch(md: &mut String, pitch: Option<&PrePitch>) {
    let Some(pitch) = pitch else {
        return;
    };
    for (key, beat) in pitch.script.beats() {
        if beat.script.is_empty() && beat.goal.is_empty() {
            continue;
        }
        md.push_str(&format!("### {}\n\n", title_case_key(key)));
        if !beat.goal.is_empty() {
            md.push_str(&format!("**Objetivo:** {}\n\n", beat.goal));
        }
        if !beat.script.is_empty() {
            md.push_str(&format!("> {}\n\n", beat.script));
        }
    }
}

fn render_visual_proofs(md: &mut String, proofs: Option<&Vec<VisualProof>>) {
    for (i, proof) in proofs.into_iter().flatten().enumerate() {
        md.push_str(&format!("### PROVI {}: {}\n\n", i + 1, proof.name));
        md.push_str(&format!("**Experimento:** {}\n\n", proof.experiment));
        if !proof.materials.is_empty() {
            md.push_str("**Materiais:**\n");
            for material in &proof.materials {
                md.push_str(&format!("- {}\n", material));
            }
            md.push('\n');
        }
    }
}

fn render_predictions(md: &mut String, predictions: Option<&FuturePredictions>) {
    let Some(predictions) = predictions else {
        return;
    };
    if !predictions.trends.is_empty() {
        md.push_str("### Tendências Emergentes\n\n");
        render_numbered(md, predictions.trends.iter());
    }
    if !predictions.opportunities.is_empty() {
        md.push_str("### Oportunidades Futuras\n\n");
        render_numbered(md, predictions.opportunities.iter());
    }
    render_extra(md, &predictions.extra);
}

fn render_numbered<'a>(md: &mut String, items: impl Iterator<Item = &'a String>) {
    for (i, item) in items.enumerate() {
        md.push_str(&format!("{}. {}\n", i + 1, item));
    }
    md.push('\n');
}

/// Fields the model produced beyond the known schema
fn render_extra(md: &mut String, extra: &Map<String, Value>) {
    let entries: Vec<_> = extra
        .iter()
        .filter(|(_, v)| !matches!(v, Value::Null))
        .collect();
    if entries.is_empty() {
        return;
    }
    md.push_str("### Outros Dados\n\n");
    for (key, value) in entries {
        md.push_str(&format!("- **{}:** {}\n", title_case_key(key), value_to_text(value)));
    }
    md.push('\n');
}

fn render_footer(md: &mut String, result: &AnalysisResult) {
    md.push_str("## Próximos Passos\n\n");
    md.push_str("1. **Implementar Drivers Mentais**: use os drivers customizados no conteúdo\n");
    md.push_str("2. **Preparar Provas Visuais**: separe materiais e ensaie as demonstrações\n");
    md.push_str("3. **Treinar Anti-Objeção**: pratique os scripts de neutralização\n");
    md.push_str("4. **Estruturar Pré-Pitch**: implemente a sequência psicológica\n");
    md.push_str("5. **Monitorar Resultados**: acompanhe as métricas de conversão\n\n");

    md.push_str(&format!(
        "\n---\n*Engine: {} {}*\n",
        if result.metadata.engine.is_empty() {
            "copyforge"
        } else {
            result.metadata.engine.as_str()
        },
        result.metadata.version
    ));
}
