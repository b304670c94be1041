//! Pattern Classifier
//!
//! Heuristic `Classifier` that turns user utterances into facts by matching
//! phrase patterns sentence by sentence:
//!
//! - Correction: "use X instead of Y"
//! - Failure:    "X failed because Y"
//! - Devops:     "deploy/build/release/run tests with X"
//! - Preference: "use X for Y", "I prefer X over Y", "always ...", "never ..."
//! - Knowledge:  "remember that ...", "note that ...", "keep in mind ..."
//!
//! Patterns that name what is being decided ("for auth", "instead of npm")
//! emit an overriding fact keyed on that subject, so a later statement about
//! the same subject supersedes the earlier one.

use std::sync::OnceLock;

use regex::Regex;

use claude_recall_core::{Classifier, Fact, MemoryType};

/// Longest preference key derived from free text
const MAX_KEY_LEN: usize = 64;

/// Words dropped when deriving a preference key
const KEY_FILLER_WORDS: &[&str] = &["a", "an", "the", "my", "our", "your", "all", "any"];

struct PatternSpec {
    name: &'static str,
    pattern: &'static str,
    memory_type: MemoryType,
    confidence: f32,
    /// Capture group holding the fact content; whole sentence when `None`
    content_group: Option<&'static str>,
    /// Capture group naming the decided subject, used as preference key
    key_group: Option<&'static str>,
}

/// Checked in order; the first match wins for a sentence
const PATTERNS: &[PatternSpec] = &[
    PatternSpec {
        name: "instead-of",
        pattern: r"(?i)^(?:(?:no|actually)[,.]?\s+)*use\s+(?P<subject>.+?)\s+instead\s+of\s+(?P<key>.+)$",
        memory_type: MemoryType::Correction,
        confidence: 0.9,
        content_group: None,
        key_group: Some("key"),
    },
    PatternSpec {
        name: "failed-because",
        pattern: r"(?i)^(?P<subject>.+?)\s+(?:failed|fails|broke|breaks|crashed|crashes)\s+because\s+(?P<reason>.+)$",
        memory_type: MemoryType::Failure,
        confidence: 0.8,
        content_group: None,
        key_group: None,
    },
    PatternSpec {
        name: "devops-tool",
        pattern: r"(?i)^(?:we\s+|always\s+)?(?P<key>deploy|build|release|publish|run\s+(?:the\s+)?tests)\s+(?:with|via|using|through)\s+(?P<subject>.+)$",
        memory_type: MemoryType::Devops,
        confidence: 0.8,
        content_group: None,
        key_group: Some("key"),
    },
    PatternSpec {
        name: "use-for",
        pattern: r"(?i)^(?:(?:no|actually)[,.]?\s+)*(?:let's\s+|we\s+should\s+|please\s+)?use\s+(?P<subject>.+?)\s+for\s+(?P<key>.+)$",
        memory_type: MemoryType::Preference,
        confidence: 0.85,
        content_group: None,
        key_group: Some("key"),
    },
    PatternSpec {
        name: "prefer",
        pattern: r"(?i)^i\s+(?:prefer|like)\s+(?P<subject>.+?)(?:\s+over\s+(?P<key>.+))?$",
        memory_type: MemoryType::Preference,
        confidence: 0.8,
        content_group: None,
        key_group: Some("key"),
    },
    PatternSpec {
        name: "always-never",
        pattern: r"(?i)^(?:please\s+)?(?:always|never|don't\s+ever)\s+\S.*$",
        memory_type: MemoryType::Preference,
        confidence: 0.85,
        content_group: None,
        key_group: None,
    },
    PatternSpec {
        name: "remember",
        pattern: r"(?i)^(?:please\s+)?(?:remember|note|keep\s+in\s+mind)\s+(?:that\s+)?(?P<subject>\S.*)$",
        memory_type: MemoryType::ProjectKnowledge,
        confidence: 0.9,
        content_group: Some("subject"),
        key_group: None,
    },
];

struct CompiledPattern {
    spec: &'static PatternSpec,
    regex: Regex,
}

/// Get compiled patterns (initialized once).
fn compiled_patterns() -> &'static Vec<CompiledPattern> {
    static COMPILED: OnceLock<Vec<CompiledPattern>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        PATTERNS
            .iter()
            .filter_map(|spec| match Regex::new(spec.pattern) {
                Ok(regex) => Some(CompiledPattern { spec, regex }),
                Err(e) => {
                    tracing::error!(pattern = spec.name, error = %e, "invalid classifier pattern");
                    None
                }
            })
            .collect()
    })
}

/// Split text into trimmed sentences on `.`, `!`, `?` and newlines
pub fn split_sentences(text: &str) -> Vec<&str> {
    text.split(|c: char| matches!(c, '.' | '!' | '?' | '\n' | ';'))
        .map(|s| s.trim())
        .filter(|s| s.len() >= 3)
        .collect()
}

/// Derive a stable preference key from a subject phrase.
///
/// "the Auth layer" → `auth_layer`. Returns `None` when nothing usable remains.
pub fn preference_key_from(subject: &str) -> Option<String> {
    let words: Vec<String> = subject
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty() && !KEY_FILLER_WORDS.contains(w))
        .map(str::to_string)
        .collect();
    if words.is_empty() {
        return None;
    }

    let mut key = words.join("_");
    if key.len() > MAX_KEY_LEN {
        let mut cut = MAX_KEY_LEN;
        while !key.is_char_boundary(cut) {
            cut -= 1;
        }
        key.truncate(cut);
        key = key.trim_end_matches('_').to_string();
    }
    Some(key)
}

/// Phrase-pattern classifier
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternClassifier;

impl PatternClassifier {
    pub fn new() -> Self {
        Self
    }

    fn classify_sentence(&self, sentence: &str) -> Option<Fact> {
        for compiled in compiled_patterns() {
            let Some(caps) = compiled.regex.captures(sentence) else {
                continue;
            };
            let spec = compiled.spec;

            let content = spec
                .content_group
                .and_then(|g| caps.name(g))
                .map(|m| m.as_str())
                .unwrap_or(sentence)
                .trim();
            if content.is_empty() {
                continue;
            }

            let mut fact = Fact::new(spec.memory_type, content, spec.confidence);
            if let Some(key) = spec
                .key_group
                .and_then(|g| caps.name(g))
                .and_then(|m| preference_key_from(m.as_str()))
            {
                fact = fact.overriding(key);
            }

            tracing::trace!(pattern = spec.name, memory_type = %spec.memory_type, "classified sentence");
            return Some(fact);
        }
        None
    }
}

impl Classifier for PatternClassifier {
    fn classify(&self, text: &str) -> Vec<Fact> {
        split_sentences(text)
            .into_iter()
            .filter_map(|sentence| self.classify_sentence(sentence))
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
