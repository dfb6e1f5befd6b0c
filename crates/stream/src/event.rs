use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::model::{DocumentSource, ToolInput};

const DEFAULT_TOOL_NAME: &str = "search";

/// One decoded frame of the chat stream.
///
/// Two wire shapes are understood. The chat endpoint nests payloads as
/// `{"type": "<kind>", "data": {...}}`; the retrieval endpoint puts fields next to
/// `type` (`{"type": "token", "content": "..."}`) and describes tool activity in a
/// `metadata` object. Kinds this client does not know decode to
/// [`StreamEvent::Unknown`] and are skipped by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    ToolStart {
        call_id: String,
        tool_name: String,
        input: Option<ToolInput>,
    },
    ToolEnd {
        call_id: String,
        output: Option<String>,
    },
    ToolError {
        call_id: String,
        error: String,
    },
    ContentDelta {
        delta: String,
    },
    ContentDone {
        content: String,
    },
    /// Result of the most recent open tool call when the service sends no id.
    ToolResult {
        output: Option<String>,
    },
    Sources {
        sources: Vec<DocumentSource>,
    },
    /// One source streamed on its own; merged into the list by id.
    Source {
        source: DocumentSource,
    },
    /// Failure reported in-band by the service.
    Error {
        message: String,
    },
    Done,
    Unknown {
        kind: String,
    },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<Value>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl Envelope {
    /// Payload for this frame: `data` when present, otherwise the sibling fields.
    fn payload(self) -> Value {
        self.data.unwrap_or(Value::Object(self.fields))
    }
}

#[derive(Deserialize)]
struct ToolStartData {
    #[serde(alias = "call_id")]
    tool_call_id: String,
    tool_name: String,
    #[serde(default)]
    input: Option<ToolInput>,
}

#[derive(Deserialize)]
struct ToolEndData {
    #[serde(alias = "call_id")]
    tool_call_id: String,
    #[serde(default, deserialize_with = "text_or_json")]
    output: Option<String>,
}

#[derive(Deserialize)]
struct ToolErrorData {
    #[serde(alias = "call_id")]
    tool_call_id: String,
    #[serde(deserialize_with = "required_text_or_json")]
    error: String,
}

#[derive(Deserialize)]
struct ContentDeltaData {
    delta: String,
}

#[derive(Deserialize)]
struct TokenData {
    #[serde(alias = "token")]
    content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolMetadata {
    #[serde(default, alias = "tool_name")]
    tool_name: Option<String>,
}

#[derive(Deserialize)]
struct MetadataFrame {
    #[serde(default)]
    metadata: Option<ToolMetadata>,
}

#[derive(Deserialize)]
struct ToolResultData {
    #[serde(default, alias = "call_id")]
    tool_call_id: Option<String>,
    #[serde(default, alias = "result", deserialize_with = "text_or_json")]
    output: Option<String>,
}

#[derive(Deserialize)]
struct SourceData {
    source: DocumentSource,
}

#[derive(Deserialize)]
struct ContentDoneData {
    content: String,
}

#[derive(Deserialize)]
struct SourcesData {
    sources: Vec<DocumentSource>,
}

#[derive(Deserialize)]
struct ErrorData {
    #[serde(alias = "error")]
    message: String,
}

// Tool results are free-form per tool; structured outputs keep their JSON text.
fn text_or_json<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }))
}

fn required_text_or_json<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(text_or_json(deserializer)?.unwrap_or_default())
}

impl StreamEvent {
    /// Decodes one JSON frame payload.
    pub fn from_json(payload: &str) -> serde_json::Result<Self> {
        let envelope: Envelope = serde_json::from_str(payload)?;
        Self::from_envelope(envelope)
    }

    fn from_envelope(envelope: Envelope) -> serde_json::Result<Self> {
        let kind = envelope.kind.clone();
        let has_data = envelope.data.is_some();
        let data = envelope.payload();

        let event = match kind.as_str() {
            "tool_start" if has_data => {
                let data: ToolStartData = serde_json::from_value(data)?;
                Self::ToolStart {
                    call_id: data.tool_call_id,
                    tool_name: data.tool_name,
                    input: data.input,
                }
            }
            "tool_start" => {
                // Metadata-only starts carry no id; later results close the newest open call.
                let frame: MetadataFrame = serde_json::from_value(data)?;
                let tool_name = frame
                    .metadata
                    .and_then(|metadata| metadata.tool_name)
                    .unwrap_or_else(|| DEFAULT_TOOL_NAME.to_string());
                Self::ToolStart {
                    call_id: Uuid::now_v7().to_string(),
                    tool_name,
                    input: None,
                }
            }
            "tool_end" => {
                let data: ToolEndData = serde_json::from_value(data)?;
                Self::ToolEnd {
                    call_id: data.tool_call_id,
                    output: data.output,
                }
            }
            "tool_result" => {
                let data: ToolResultData = serde_json::from_value(data)?;
                match data.tool_call_id {
                    Some(call_id) => Self::ToolEnd {
                        call_id,
                        output: data.output,
                    },
                    None => Self::ToolResult {
                        output: data.output,
                    },
                }
            }
            "tool_error" => {
                let data: ToolErrorData = serde_json::from_value(data)?;
                Self::ToolError {
                    call_id: data.tool_call_id,
                    error: data.error,
                }
            }
            "content_delta" => {
                let data: ContentDeltaData = serde_json::from_value(data)?;
                Self::ContentDelta { delta: data.delta }
            }
            "token" => {
                let data: TokenData = serde_json::from_value(data)?;
                Self::ContentDelta {
                    delta: data.content,
                }
            }
            "content_done" => {
                let data: ContentDoneData = serde_json::from_value(data)?;
                Self::ContentDone {
                    content: data.content,
                }
            }
            "sources" => {
                let data: SourcesData = serde_json::from_value(data)?;
                Self::Sources {
                    sources: data.sources,
                }
            }
            "source" => {
                let data: SourceData = serde_json::from_value(data)?;
                Self::Source {
                    source: data.source,
                }
            }
            "error" => {
                let data: ErrorData = serde_json::from_value(data)?;
                Self::Error {
                    message: data.message,
                }
            }
            "done" => Self::Done,
            _ => Self::Unknown { kind },
        };

        Ok(event)
    }

    /// Wire name of this event kind.
    pub fn kind(&self) -> &str {
        match self {
            Self::ToolStart { .. } => "tool_start",
            Self::ToolEnd { .. } => "tool_end",
            Self::ToolError { .. } => "tool_error",
            Self::ToolResult { .. } => "tool_result",
            Self::ContentDelta { .. } => "content_delta",
            Self::ContentDone { .. } => "content_done",
            Self::Sources { .. } => "sources",
            Self::Source { .. } => "source",
            Self::Error { .. } => "error",
            Self::Done => "done",
            Self::Unknown { kind } => kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn decodes_tool_start_with_ordered_input() {
        let event = StreamEvent::from_json(
            r#"{"type":"tool_start","data":{"tool_call_id":"7","tool_name":"tree_search","input":{"query":"revenue","depth":2}}}"#,
        )
        .unwrap();

        let StreamEvent::ToolStart {
            call_id,
            tool_name,
            input,
        } = event
        else {
            panic!("expected tool_start");
        };
        assert_eq!(call_id, "7");
        assert_eq!(tool_name, "tree_search");
        let keys = input.unwrap().keys().cloned().collect::<Vec<_>>();
        assert_eq!(keys, vec!["query".to_string(), "depth".to_string()]);
    }

    #[test]
    fn structured_tool_output_keeps_json_text() {
        let event = StreamEvent::from_json(
            r#"{"type":"tool_end","data":{"tool_call_id":"1","output":{"nodes":3}}}"#,
        )
        .unwrap();

        assert_eq!(
            event,
            StreamEvent::ToolEnd {
                call_id: "1".to_string(),
                output: Some(r#"{"nodes":3}"#.to_string()),
            }
        );
    }

    #[test]
    fn missing_tool_output_is_none() {
        let event =
            StreamEvent::from_json(r#"{"type":"tool_end","data":{"tool_call_id":"1"}}"#).unwrap();

        assert_eq!(
            event,
            StreamEvent::ToolEnd {
                call_id: "1".to_string(),
                output: None,
            }
        );
    }

    #[test]
    fn done_needs_no_payload() {
        assert_eq!(StreamEvent::from_json(r#"{"type":"done"}"#).unwrap(), StreamEvent::Done);
    }

    #[test]
    fn unknown_kind_is_preserved_not_rejected() {
        let event =
            StreamEvent::from_json(r#"{"type":"tree_progress","data":{"visited":4}}"#).unwrap();

        assert_eq!(event.kind(), "tree_progress");
        assert_eq!(
            event,
            StreamEvent::Unknown {
                kind: "tree_progress".to_string()
            }
        );
    }

    #[test]
    fn known_kind_with_wrong_payload_is_an_error() {
        assert!(StreamEvent::from_json(r#"{"type":"content_delta","data":{}}"#).is_err());
        assert!(StreamEvent::from_json(r#"{"data":{"delta":"x"}}"#).is_err());
    }

    #[test]
    fn decodes_sources_list() {
        let event = StreamEvent::from_json(
            r#"{"type":"sources","data":{"sources":[{"id":"source-1","documentName":"Technical Guide.pdf","pageIndex":42,"title":"Core Concepts","content":"This section explains the fundamental concepts...","citationNumber":1},{"id":"source-2","documentName":"API Reference.pdf","pageIndex":15,"title":"Implementation Details","content":"The API provides several methods for...","citationNumber":2}]}}"#,
        )
        .unwrap();

        let StreamEvent::Sources { sources } = event else {
            panic!("expected sources");
        };
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].document_name, "Technical Guide.pdf");
        assert_eq!(sources[0].section_title.as_deref(), Some("Core Concepts"));
        assert_eq!(sources[0].start_page, 42);
        assert_eq!(sources[1].citation_index, Some(2));
    }

    #[test]
    fn token_frame_is_a_content_delta() {
        let event = StreamEvent::from_json(r#"{"type": "token", "content": "The"}"#).unwrap();

        assert_eq!(
            event,
            StreamEvent::ContentDelta {
                delta: "The".to_string()
            }
        );
    }

    #[test]
    fn single_source_frame_decodes_section() {
        let event = StreamEvent::from_json(
            r#"{"type":"source","source":{"id":"guide.pdf_0004","nodeId":"0004","title":"Page 7","documentName":"guide.pdf","pageIndex":7,"endPageIndex":9,"content":"Rotate keys monthly.","summary":"","citationNumber":1,"highlights":[{"text":"keys","startOffset":7,"endOffset":11}]}}"#,
        )
        .unwrap();

        let StreamEvent::Source { source } = event else {
            panic!("expected source");
        };
        assert_eq!(source.id, "guide.pdf_0004");
        assert_eq!(source.end_page, Some(9));
        assert_eq!(source.highlights[0].start, 7);
    }

    #[test]
    fn metadata_tool_start_gets_generated_id() {
        let first = StreamEvent::from_json(
            r#"{"type":"tool_start","metadata":{"toolName":"tree_search","type":"mcp_tool_use_start"}}"#,
        )
        .unwrap();
        let second = StreamEvent::from_json(r#"{"type":"tool_start","metadata":{}}"#).unwrap();

        let StreamEvent::ToolStart {
            call_id: first_id,
            tool_name,
            input,
        } = first
        else {
            panic!("expected tool_start");
        };
        assert_eq!(tool_name, "tree_search");
        assert_eq!(input, None);
        assert!(!first_id.is_empty());

        let StreamEvent::ToolStart {
            call_id: second_id,
            tool_name,
            ..
        } = second
        else {
            panic!("expected tool_start");
        };
        assert_eq!(tool_name, "search");
        assert_ne!(first_id, second_id);
    }

    #[test]
    fn tool_result_without_id_targets_open_call() {
        let event = StreamEvent::from_json(
            r#"{"type":"tool_result","metadata":{"type":"mcp_tool_result_start"}}"#,
        )
        .unwrap();

        assert_eq!(event, StreamEvent::ToolResult { output: None });
        assert_eq!(event.kind(), "tool_result");
    }

    #[test]
    fn tool_result_with_id_is_a_tool_end() {
        let event = StreamEvent::from_json(
            r#"{"type":"tool_result","data":{"tool_call_id":"4","result":"3 sections"}}"#,
        )
        .unwrap();

        assert_eq!(
            event,
            StreamEvent::ToolEnd {
                call_id: "4".to_string(),
                output: Some("3 sections".to_string()),
            }
        );
    }
}
