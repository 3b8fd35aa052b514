//! # Persona
//!
//! Who the assistant is pretending to be.
//!
//! A persona is a small JSON (or YAML) document. Known fields are typed; anything else is
//! kept verbatim in [`Persona::extra`] so operators can carry extra traits without a code
//! change:
//!
//! ```json
//! {
//!   "name": "iota",
//!   "voice": "Hinglish",
//!   "tone": "concise and warm",
//!   "rules": ["Keep replies short (1-3 sentences)."],
//!   "signatures": ["haan", "arre"],
//!   "style": { "openers": ["Haan"], "closers": ["done na?"] },
//!   "hobby": "sketching"
//! }
//! ```
//!
//! The document is loaded once at startup, from `PERSONA_JSON` (raw or base64-encoded
//! JSON) or from a persona file, and validated there. A missing document falls back to
//! [`Persona::default_for`].
//!
//! [`PersonaConfig`] pairs the persona with the public/private names and does the
//! anonymization of the private name.

use std::{borrow::Cow, collections::BTreeMap, fs, path::Path};

use base64::{Engine, engine::general_purpose::STANDARD};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{BotError, Result};

const DEFAULT_VOICE: &str = "Hinglish";
const DEFAULT_TONE: &str = "concise and warm";
const DEFAULT_FALLBACK_REPLY: &str = "Okay, bol na… 🙂";

/// Lexical habits the model is nudged towards.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct StyleHints {
    pub hedges: Vec<String>,
    pub openers: Vec<String>,
    pub closers: Vec<String>,
    pub salient: Vec<String>,
}

impl Default for StyleHints {
    fn default() -> Self {
        let owned = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect();
        Self {
            hedges: owned(&["haan", "arre", "acha", "ig"]),
            openers: owned(&["Haan", "Okay", "Arre"]),
            closers: owned(&["okayss?", "done na?"]),
            salient: owned(&["don't change the topic haan", "try karna naa"]),
        }
    }
}

/// The typed persona document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Persona {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,

    #[serde(default)]
    pub rules: Vec<String>,

    #[serde(default)]
    pub signatures: Vec<String>,

    #[serde(default)]
    pub style: StyleHints,

    /// Used when the model answers with nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reply: Option<String>,

    /// Unrecognised fields, kept as-is.
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

impl Persona {
    /// The public-safe persona used when nothing is configured.
    pub fn default_for(public_name: &str) -> Self {
        Self {
            name: Some(public_name.to_string()),
            voice: Some(DEFAULT_VOICE.to_string()),
            tone: Some(DEFAULT_TONE.to_string()),
            rules: vec![
                "Keep replies short (1–3 sentences).".to_string(),
                "Use Hinglish; 0–1 emoji only if it fits.".to_string(),
                "Do not copy exemplar text verbatim.".to_string(),
                "Be warm and practical; gentle tease is fine.".to_string(),
            ],
            signatures: ["haan", "arre", "acha", "okayss?", "done na?"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            style: StyleHints::default(),
            fallback_reply: None,
            extra: BTreeMap::new(),
        }
    }

    /// Parse a persona from raw JSON, falling back to base64-encoded JSON.
    ///
    /// # Errors
    /// [`BotError::Configuration`] if neither form parses or validation fails.
    pub fn from_raw(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let persona = match serde_json::from_str::<Persona>(raw) {
            Ok(p) => p,
            Err(json_err) => {
                let decoded = STANDARD.decode(raw).map_err(|_| {
                    BotError::configuration(format!("PERSONA_JSON is not valid JSON: {json_err}"))
                })?;
                let text = String::from_utf8(decoded).map_err(|e| {
                    BotError::configuration(format!("PERSONA_JSON base64 is not UTF-8: {e}"))
                })?;
                serde_json::from_str(&text).map_err(|e| {
                    BotError::configuration(format!("PERSONA_JSON base64 payload is not JSON: {e}"))
                })?
            }
        };
        persona.validated()
    }

    /// Load a persona from a `.json`, `.yaml` or `.yml` file.
    pub fn load_file(path: &Path) -> Result<Self> {
        tracing::info!("Loading persona: {}", path.display());
        let content = fs::read_to_string(path)?;
        let persona: Persona = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            _ => serde_json::from_str(&content)?,
        };
        persona.validated()
    }

    /// Trim fields, drop blank list items, reject blank required-looking values.
    fn validated(mut self) -> Result<Self> {
        for field in [&mut self.name, &mut self.voice, &mut self.tone] {
            if let Some(value) = field.as_mut() {
                *value = value.trim().to_string();
                if value.is_empty() {
                    *field = None;
                }
            }
        }

        self.rules.retain(|r| !r.trim().is_empty());
        self.signatures.retain(|s| !s.trim().is_empty());

        if let Some(reply) = &self.fallback_reply {
            if reply.trim().is_empty() {
                return Err(BotError::configuration(
                    "persona fallback_reply must not be blank",
                ));
            }
        }

        Ok(self)
    }

    pub fn voice(&self) -> &str {
        self.voice.as_deref().unwrap_or(DEFAULT_VOICE)
    }

    pub fn tone(&self) -> &str {
        self.tone.as_deref().unwrap_or(DEFAULT_TONE)
    }

    pub fn fallback_reply(&self) -> &str {
        self.fallback_reply
            .as_deref()
            .unwrap_or(DEFAULT_FALLBACK_REPLY)
    }
}

/// Persona plus the name mapping. Immutable once built.
#[derive(Debug, Clone)]
pub struct PersonaConfig {
    pub public_name: String,
    pub private_name: Option<String>,
    pub persona: Persona,
    private_name_pattern: Option<Regex>,
}

impl PersonaConfig {
    pub fn new(public_name: String, private_name: Option<String>, persona: Persona) -> Result<Self> {
        let private_name = private_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        let private_name_pattern = match &private_name {
            Some(name) => Some(
                RegexBuilder::new(&format!(r"\b{}\b", regex::escape(name)))
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| BotError::configuration(format!("bad PRIVATE_NAME: {e}")))?,
            ),
            None => None,
        };

        Ok(Self {
            public_name,
            private_name,
            persona,
            private_name_pattern,
        })
    }

    /// The name the prompt introduces the persona with.
    pub fn display_name(&self) -> &str {
        self.persona.name.as_deref().unwrap_or(&self.public_name)
    }

    /// Replace the private name with the public alias, case-insensitively, whole words only.
    pub fn anonymize<'t>(&self, text: &'t str) -> Cow<'t, str> {
        match &self.private_name_pattern {
            Some(re) => re.replace_all(text, self.public_name.as_str()),
            None => Cow::Borrowed(text),
        }
    }
}
