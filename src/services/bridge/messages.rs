//! Bridge Message Types
//!
//! Typed payloads for every message type the bridge puts on the queue.
//! Payloads are decoded at the queue boundary; fields a producer sends that
//! are not declared here land in `extra` and travel on into record metadata.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use claude_recall_core::{Fact, MemoryType, Scope};

use crate::services::memory::{NewMemory, SearchFilters};
use crate::utils::error::{AppError, AppResult};

pub const MEMORY_STORE: &str = "memory:store";
pub const MEMORY_SEARCH: &str = "memory:search";
pub const FACT_CLASSIFY_RESULT: &str = "fact:classify-result";

/// Topic the search handler publishes results on
pub const SEARCH_RESULTS_TOPIC: &str = "memory:search-results";

/// `memory:store` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorePayload {
    pub content: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    /// Defaults to project scope when `project_id` is set, universal otherwise
    #[serde(default)]
    pub scope: Option<Scope>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub preference_key: Option<String>,
    #[serde(default)]
    pub is_override: bool,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StorePayload {
    pub fn new(memory_type: MemoryType, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            memory_type,
            scope: None,
            project_id: None,
            key: None,
            preference_key: None,
            is_override: false,
            confidence: None,
            extra: Map::new(),
        }
    }

    /// Convert into a store input. `source` entries are merged into the
    /// metadata after `extra`, so provenance wins over producer fields.
    pub fn into_new_memory(self, source: Map<String, Value>) -> NewMemory {
        let scope = self.scope.unwrap_or(if self.project_id.is_some() {
            Scope::Project
        } else {
            Scope::Universal
        });

        let mut metadata = self.extra;
        metadata.extend(source);

        NewMemory {
            key: self.key,
            content: self.content,
            memory_type: self.memory_type,
            scope,
            project_id: self.project_id,
            preference_key: self.preference_key,
            confidence: self.confidence.unwrap_or(1.0),
            is_override: self.is_override,
            metadata,
        }
    }
}

/// `memory:search` payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPayload {
    pub query: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub types: Option<Vec<MemoryType>>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SearchPayload {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn filters(&self) -> SearchFilters {
        SearchFilters {
            project_id: self.project_id.clone(),
            global: self.global,
            types: self.types.clone(),
            limit: self.limit,
        }
    }
}

/// `fact:classify-result` payload: facts a classifier pulled from one utterance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyResultPayload {
    pub facts: Vec<Fact>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub source_text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A decoded bridge message
#[derive(Debug, Clone)]
pub enum BridgeMessage {
    Store(StorePayload),
    Search(SearchPayload),
    ClassifyResult(ClassifyResultPayload),
}

impl BridgeMessage {
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::Store(_) => MEMORY_STORE,
            Self::Search(_) => MEMORY_SEARCH,
            Self::ClassifyResult(_) => FACT_CLASSIFY_RESULT,
        }
    }

    /// Decode a queue payload according to its message type
    pub fn decode(message_type: &str, payload: &Value) -> AppResult<Self> {
        fn parse<T: serde::de::DeserializeOwned>(message_type: &str, payload: &Value) -> AppResult<T> {
            serde_json::from_value(payload.clone()).map_err(|e| {
                AppError::validation(format!("malformed {} payload: {}", message_type, e))
            })
        }

        match message_type {
            MEMORY_STORE => parse(message_type, payload).map(Self::Store),
            MEMORY_SEARCH => parse(message_type, payload).map(Self::Search),
            FACT_CLASSIFY_RESULT => parse(message_type, payload).map(Self::ClassifyResult),
            other => Err(AppError::validation(format!("unknown message type: {}", other))),
        }
    }

    /// Encode the payload for `enqueue`
    pub fn to_payload(&self) -> AppResult<Value> {
        let value = match self {
            Self::Store(p) => serde_json::to_value(p)?,
            Self::Search(p) => serde_json::to_value(p)?,
            Self::ClassifyResult(p) => serde_json::to_value(p)?,
        };
        Ok(value)
    }
}

/// Event delivered by the assistant's prompt hook.
///
/// Hook runners disagree on where the text lives, so `prompt`, `content`
/// and `message` are tried in that order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookEvent {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, alias = "sessionId")]
    pub session_id: Option<String>,
    #[serde(default, alias = "projectId")]
    pub project_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HookEvent {
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Default::default()
        }
    }

    /// First non-blank text field
    pub fn text(&self) -> Option<&str> {
        [&self.prompt, &self.content, &self.message]
            .into_iter()
            .filter_map(|field| field.as_deref())
            .map(str::trim)
            .find(|text| !text.is_empty())
    }
}

/// Tool-use hook input (`tool_name` / `tool_input`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEvent {
    #[serde(alias = "toolName")]
    pub tool_name: String,
    #[serde(default, alias = "toolInput")]
    pub tool_input: Value,
    #[serde(default, alias = "sessionId")]
    pub session_id: Option<String>,
    #[serde(default, alias = "projectId")]
    pub project_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Input fields tried, in order, for the one-line summary of a tool call
const TOOL_SUMMARY_FIELDS: &[&str] = &["command", "file_path", "path", "pattern", "query", "url"];
const MAX_TOOL_SUMMARY: usize = 240;

impl ToolEvent {
    pub fn new(tool_name: impl Into<String>, tool_input: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_input,
            session_id: None,
            project_id: None,
            extra: Map::new(),
        }
    }

    /// `"<tool>: <main argument>"`, or `None` for an unnamed tool
    pub fn summary(&self) -> Option<String> {
        let tool = self.tool_name.trim();
        if tool.is_empty() {
            return None;
        }

        let detail = TOOL_SUMMARY_FIELDS
            .iter()
            .filter_map(|field| self.tool_input.get(*field).and_then(Value::as_str))
            .map(str::trim)
            .find(|value| !value.is_empty())
            .map(str::to_string)
            .or_else(|| match &self.tool_input {
                Value::Null => None,
                Value::Object(map) if map.is_empty() => None,
                other => Some(other.to_string()),
            });

        let summary = match detail {
            Some(detail) => format!("{}: {}", tool, detail),
            None => tool.to_string(),
        };
        Some(truncate_chars(&summary, MAX_TOOL_SUMMARY))
    }

    /// `memory:store` of a `tool-use` record; the raw input rides in `extra`
    pub fn into_store_payload(self) -> Option<StorePayload> {
        let content = self.summary()?;
        let mut payload = StorePayload::new(MemoryType::ToolUse, content);
        payload.project_id = self.project_id;
        payload.extra = self.extra;
        payload
            .extra
            .insert("toolName".into(), Value::String(self.tool_name));
        payload.extra.insert("toolInput".into(), self.tool_input);
        if let Some(session_id) = self.session_id {
            payload
                .extra
                .insert("sessionId".into(), Value::String(session_id));
        }
        payload
            .extra
            .insert("source".into(), Value::String("tool-hook".into()));
        Some(payload)
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

/// Anything the `capture` entry point reads from a hook's stdin
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HookInput {
    Tool(ToolEvent),
    Prompt(HookEvent),
}

/// Event published to an `EventSink`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeEvent {
    pub topic: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub payload: Value,
}
