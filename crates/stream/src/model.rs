use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::ids::MessageId;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Opaque per-tool arguments. Key order follows the wire.
pub type ToolInput = serde_json::Map<String, serde_json::Value>;

pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as Timestamp)
        .unwrap_or_default()
}

/// Identifier for one streaming generation session.
///
/// This must change on every submit so stale events can be rejected.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StreamSessionId(pub u64);

impl StreamSessionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl ToolStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// One external tool invocation reported by the service, e.g. a tree search step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<ToolInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<Timestamp>,
}

impl ToolCall {
    pub fn running(
        id: impl Into<String>,
        name: impl Into<String>,
        input: Option<ToolInput>,
        started_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: ToolStatus::Running,
            input,
            output: None,
            error: None,
            started_at: Some(started_at),
            ended_at: None,
        }
    }

    pub fn duration_millis(&self) -> Option<u64> {
        let started_at = self.started_at?;
        let ended_at = self.ended_at?;
        Some(ended_at.saturating_sub(started_at))
    }
}

/// Substring of a source section to emphasize. Offsets count characters, not bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightRegion {
    #[serde(default)]
    pub text: String,
    #[serde(rename = "startOffset", alias = "start")]
    pub start: usize,
    #[serde(rename = "endOffset", alias = "end")]
    pub end: usize,
}

/// A retrieved document section cited by an answer.
///
/// Wire names are camelCase (`documentName`, `pageIndex`, `citationNumber`);
/// snake_case spellings are accepted as well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSource {
    #[serde(default)]
    pub id: String,
    /// Node of the document tree this section came from.
    #[serde(default, alias = "node_id", skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(alias = "document_name")]
    pub document_name: String,
    #[serde(
        default,
        rename = "title",
        alias = "section_title",
        skip_serializing_if = "Option::is_none"
    )]
    pub section_title: Option<String>,
    #[serde(rename = "pageIndex", alias = "pageNumber", alias = "start_page")]
    pub start_page: u32,
    #[serde(
        default,
        rename = "endPageIndex",
        alias = "end_page",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_page: Option<u32>,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Number of the inline `[N]` marker that refers to this source.
    #[serde(
        default,
        rename = "citationNumber",
        alias = "citation_index",
        skip_serializing_if = "Option::is_none"
    )]
    pub citation_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub highlights: Vec<HighlightRegion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl DocumentSource {
    pub fn page_label(&self) -> String {
        match self.end_page {
            Some(end_page) if end_page != self.start_page => {
                format!("pp. {}-{}", self.start_page, end_page)
            }
            _ => format!("p. {}", self.start_page),
        }
    }

    /// Section title, falling back to the page label when the service sent none.
    pub fn title(&self) -> String {
        match self.section_title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => title.to_string(),
            _ => self.page_label(),
        }
    }

    /// Summary text, treating an empty string as absent.
    pub fn summary(&self) -> Option<&str> {
        self.summary
            .as_deref()
            .map(str::trim)
            .filter(|summary| !summary.is_empty())
    }
}

/// Lifecycle status for one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Streaming(StreamSessionId),
    Done,
    Error(String),
    Cancelled,
}

impl MessageStatus {
    /// Finalized messages never change again.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Done | Self::Error(_) | Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub timestamp: Timestamp,
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<DocumentSource>,
}

impl Message {
    pub fn new(
        id: MessageId,
        role: Role,
        content: impl Into<String>,
        timestamp: Timestamp,
        status: MessageStatus,
    ) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            timestamp,
            status,
            tool_calls: Vec::new(),
            sources: Vec::new(),
        }
    }

    /// User turns are final as soon as they are sent.
    pub fn user(id: MessageId, content: impl Into<String>, timestamp: Timestamp) -> Self {
        Self::new(id, Role::User, content, timestamp, MessageStatus::Done)
    }

    /// Creates an assistant placeholder while streaming.
    pub fn assistant_streaming(
        id: MessageId,
        session_id: StreamSessionId,
        timestamp: Timestamp,
    ) -> Self {
        Self::new(
            id,
            Role::Assistant,
            String::new(),
            timestamp,
            MessageStatus::Streaming(session_id),
        )
    }

    pub fn tool_call(&self, call_id: &str) -> Option<&ToolCall> {
        self.tool_calls.iter().find(|call| call.id == call_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_decodes_without_optional_fields() {
        let source: DocumentSource = serde_json::from_str(
            r#"{"id":"n1","documentName":"10-K.pdf","pageIndex":12,"content":"ABCD"}"#,
        )
        .unwrap();

        assert_eq!(source.section_title, None);
        assert_eq!(source.end_page, None);
        assert!(source.highlights.is_empty());
        assert_eq!(source.page_label(), "p. 12");
        assert_eq!(source.title(), "p. 12");
    }

    #[test]
    fn source_decodes_tree_section_fields() {
        let source: DocumentSource = serde_json::from_str(
            r#"{"id":"10-K.pdf_0007","nodeId":"0007","title":"Liquidity","documentName":"10-K.pdf","pageIndex":41,"endPageIndex":44,"content":"Cash on hand rose.","summary":"","citationNumber":2,"highlights":[{"text":"Cash","startOffset":0,"endOffset":4}],"score":0.82}"#,
        )
        .unwrap();

        assert_eq!(source.node_id.as_deref(), Some("0007"));
        assert_eq!(source.title(), "Liquidity");
        assert_eq!(source.page_label(), "pp. 41-44");
        assert_eq!(source.citation_index, Some(2));
        assert_eq!(source.summary(), None);
        assert_eq!(source.highlights[0].end, 4);
        assert_eq!(source.score, Some(0.82));
    }

    #[test]
    fn source_accepts_page_number_and_snake_case_spellings() {
        let flat: DocumentSource = serde_json::from_str(
            r#"{"id":"c9","documentName":"faq.pdf","pageNumber":3,"content":"x"}"#,
        )
        .unwrap();
        assert_eq!(flat.start_page, 3);

        let snake: DocumentSource = serde_json::from_str(
            r#"{"id":"n1","document_name":"a.pdf","section_title":"S","start_page":2,"citation_index":1}"#,
        )
        .unwrap();
        assert_eq!(snake.title(), "S");
        assert_eq!(snake.citation_index, Some(1));
    }

    #[test]
    fn source_serializes_with_wire_names() {
        let source: DocumentSource = serde_json::from_str(
            r#"{"id":"s","documentName":"a.pdf","title":"T","pageIndex":1,"content":"c","citationNumber":1}"#,
        )
        .unwrap();

        assert_eq!(
            serde_json::to_value(&source).unwrap(),
            serde_json::json!({
                "id": "s",
                "documentName": "a.pdf",
                "title": "T",
                "pageIndex": 1,
                "content": "c",
                "citationNumber": 1,
            })
        );
    }

    #[test]
    fn page_label_covers_ranges() {
        let mut source: DocumentSource = serde_json::from_str(
            r#"{"id":"n1","documentName":"a.pdf","title":"S","pageIndex":3,"endPageIndex":5,"content":""}"#,
        )
        .unwrap();
        assert_eq!(source.page_label(), "pp. 3-5");

        source.end_page = Some(3);
        assert_eq!(source.page_label(), "p. 3");
    }

    #[test]
    fn status_serializes_with_state_tag() {
        let value = serde_json::to_value(MessageStatus::Streaming(StreamSessionId::new(4))).unwrap();
        assert_eq!(value, serde_json::json!({"state": "streaming", "detail": 4}));

        let value = serde_json::to_value(MessageStatus::Done).unwrap();
        assert_eq!(value, serde_json::json!({"state": "done"}));
    }

    #[test]
    fn tool_duration_requires_both_ends() {
        let mut call = ToolCall::running("1", "search", None, 100);
        assert_eq!(call.duration_millis(), None);

        call.ended_at = Some(160);
        assert_eq!(call.duration_millis(), Some(60));
    }
}
