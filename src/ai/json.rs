//! Structured output extraction from model text
//!
//! Models answer with free text that usually embeds a fenced JSON block. The
//! contract here is narrow: `text -> Value | ForgeError::Parse`. Stages never
//! look at the raw text themselves.
//!
//! Extraction order:
//! 1. Take the body between the opening fence (```` ```json ```` or a bare
//!    fence) and the *last* closing fence; no fence means the whole text.
//! 2. Parse it as JSON.
//! 3. On failure, run the [`JsonRepairer`] (trailing commas, unterminated
//!    strings, unbalanced brackets, prose around the object).

use serde_json::Value;
use tracing::debug;

use crate::types::{ForgeError, Result, truncate_chars};

const JSON_FENCE: &str = "```json";
const FENCE: &str = "```";

/// Body of the first fenced block, or the trimmed text when there is none.
pub fn extract_fenced_block(text: &str) -> &str {
    let (open_at, open_len) = match text.find(JSON_FENCE) {
        Some(idx) => (idx, JSON_FENCE.len()),
        None => match text.find(FENCE) {
            Some(idx) => (idx, FENCE.len()),
            None => return text.trim(),
        },
    };

    let body_start = open_at + open_len;
    let rest = &text[body_start..];
    let body = match rest.rfind(FENCE) {
        Some(close) => &rest[..close],
        None => rest,
    };
    body.trim()
}

/// Parse the structured payload embedded in a model response.
pub fn parse_structured(text: &str, context: &str) -> Result<Value> {
    let body = extract_fenced_block(text);
    if body.is_empty() {
        return Err(ForgeError::parse(context, "empty response"));
    }

    match serde_json::from_str::<Value>(body) {
        Ok(value) => Ok(value),
        Err(first_err) => {
            debug!("{}: direct parse failed ({}), attempting repair", context, first_err);
            JsonRepairer::new().repair(body).ok_or_else(|| {
                ForgeError::parse(
                    context,
                    format!(
                        "{} (preview: {})",
                        first_err,
                        truncate_chars(body, 160)
                    ),
                )
            })
        }
    }
}

// =============================================================================
// JsonRepairer
// =============================================================================

/// Best-effort repair of almost-JSON produced by models
#[derive(Debug, Clone)]
pub struct JsonRepairer {
    aggressive: bool,
}

impl Default for JsonRepairer {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonRepairer {
    pub fn new() -> Self {
        Self { aggressive: true }
    }

    /// Only strip trailing commas and close brackets
    pub fn conservative() -> Self {
        Self { aggressive: false }
    }

    /// Try increasingly invasive fixes; `None` when nothing parses.
    pub fn repair(&self, raw: &str) -> Option<Value> {
        let cleaned = raw.trim().trim_start_matches('\u{feff}');

        let candidates: [fn(&str) -> String; 2] = [
            |s: &str| balance_brackets(&strip_trailing_commas(s)),
            |s: &str| balance_brackets(&close_broken_strings(&strip_trailing_commas(s))),
        ];
        for fix in candidates.iter().take(if self.aggressive { 2 } else { 1 }) {
            if let Ok(value) = serde_json::from_str::<Value>(&fix(cleaned)) {
                debug!("JSON repaired");
                return Some(value);
            }
        }

        if !self.aggressive {
            return None;
        }

        let embedded = slice_first_value(cleaned)?;
        serde_json::from_str::<Value>(embedded)
            .ok()
            .or_else(|| {
                serde_json::from_str(&balance_brackets(&strip_trailing_commas(embedded))).ok()
            })
    }
}

/// Tracks whether a scanner is inside a string literal.
#[derive(Default)]
struct StringState {
    inside: bool,
    escaped: bool,
}

impl StringState {
    /// Feed one char; returns true when the char is structural (outside strings).
    fn step(&mut self, ch: char) -> bool {
        if self.escaped {
            self.escaped = false;
            return false;
        }
        match ch {
            '\\' if self.inside => {
                self.escaped = true;
                false
            }
            '"' => {
                self.inside = !self.inside;
                false
            }
            _ => !self.inside,
        }
    }
}

fn strip_trailing_commas(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut state = StringState::default();

    for (i, &ch) in chars.iter().enumerate() {
        let structural = state.step(ch);
        if structural && ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some(']') | Some('}')) {
                continue;
            }
        }
        out.push(ch);
    }
    out
}

fn close_broken_strings(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 8);
    let mut state = StringState::default();

    for ch in s.chars() {
        if state.inside && !state.escaped && (ch == '\n' || ch == '\r') {
            out.push('"');
            state.inside = false;
            out.push(ch);
            continue;
        }
        state.step(ch);
        if !ch.is_control() || matches!(ch, '\n' | '\r' | '\t') {
            out.push(ch);
        }
    }
    out
}

fn balance_brackets(s: &str) -> String {
    let mut stack = Vec::new();
    let mut state = StringState::default();

    for ch in s.chars() {
        if !state.step(ch) {
            continue;
        }
        match ch {
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&ch) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    let mut out = s.trim_end().to_string();
    if state.inside {
        out.push('"');
    } else {
        let kept = out
            .trim_end_matches(|c: char| c == ',' || c.is_whitespace())
            .len();
        out.truncate(kept);
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

/// First complete top-level object or array inside surrounding prose.
fn slice_first_value(s: &str) -> Option<&str> {
    let start = s.find(['{', '['])?;
    let mut depth = 0usize;
    let mut state = StringState::default();

    for (offset, ch) in s[start..].char_indices() {
        if !state.step(ch) {
            continue;
        }
        match ch {
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&s[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    Some(&s[start..])
}
