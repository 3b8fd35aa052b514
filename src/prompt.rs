//! # Prompt assembly
//!
//! Builds the single user-turn prompt sent to the model. The layout is fixed so the same
//! inputs always produce the same text:
//!
//! ```text
//! You are mimicking iota in Hinglish. Be concise and warm.
//! Persona: iota
//! Voice: Hinglish
//! Tone: concise and warm
//! Rules: Keep replies short (1–3 sentences)., ...
//! Signature words: haan, arre, ...
//! Style hints (openers/closers/hedges): Haan, Okay | okayss?, done na? | haan, arre
//! Salient phrases: ...
//! Do not copy exemplar text verbatim. 0–1 emoji only if it fits.
//!
//! Chat tail:
//! user: ...
//! assistant: ...
//!
//! Relevant past chat snippets (ctx→rsp):
//! - ctx: ...
//!   rsp: ...
//!
//! User: <message>
//! Assistant:
//! ```
//!
//! Lines for empty persona fields are left out. Exemplar text is cut to
//! [`SNIPPET_CHARS`] characters per side and has the private name replaced.

use std::fmt::Write;

use serde_json::Value as JsonValue;

use crate::{
    conversation::{HistoryMessage, history_tail},
    persona::PersonaConfig,
    vector_store::Exchange,
};

/// Exemplars included in the prompt.
pub const MAX_EXEMPLARS: usize = 3;

/// Characters kept from each side of an exemplar.
pub const SNIPPET_CHARS: usize = 140;

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn push_list(out: &mut String, label: &str, items: &[String]) {
    if !items.is_empty() {
        let _ = writeln!(out, "{label}: {}", items.join(", "));
    }
}

fn trait_value(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Assemble the prompt for one turn.
pub fn build(
    persona: &PersonaConfig,
    exchanges: &[Exchange],
    history: &[HistoryMessage],
    user_message: &str,
) -> String {
    let p = &persona.persona;
    let mut out = String::new();

    // Writing to a String cannot fail.
    let _ = writeln!(
        out,
        "You are mimicking {} in {}. Be {}.",
        persona.display_name(),
        p.voice(),
        p.tone()
    );
    let _ = writeln!(out, "Persona: {}", persona.display_name());
    let _ = writeln!(out, "Voice: {}", p.voice());
    let _ = writeln!(out, "Tone: {}", p.tone());
    push_list(&mut out, "Rules", &p.rules);
    push_list(&mut out, "Signature words", &p.signatures);
    let _ = writeln!(
        out,
        "Style hints (openers/closers/hedges): {} | {} | {}",
        p.style.openers.join(", "),
        p.style.closers.join(", "),
        p.style.hedges.join(", ")
    );
    push_list(&mut out, "Salient phrases", &p.style.salient);
    for (key, value) in &p.extra {
        let _ = writeln!(out, "{key}: {}", trait_value(value));
    }
    out.push_str("Do not copy exemplar text verbatim. 0–1 emoji only if it fits.\n\n");

    out.push_str("Chat tail:\n");
    for message in history_tail(history) {
        let _ = writeln!(out, "{}: {}", message.role.as_str(), message.content.trim());
    }
    out.push('\n');

    out.push_str("Relevant past chat snippets (ctx→rsp):\n");
    for exchange in exchanges.iter().take(MAX_EXEMPLARS) {
        let context = persona.anonymize(truncate(&exchange.context, SNIPPET_CHARS));
        let response = persona.anonymize(truncate(&exchange.response, SNIPPET_CHARS));
        let _ = writeln!(out, "- ctx: {context}\n  rsp: {response}");
    }
    out.push('\n');

    let _ = write!(out, "User: {}\nAssistant:", user_message.trim());
    out
}
