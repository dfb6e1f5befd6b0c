use super::event::StreamEvent;

/// Prefix of every meaningful line on the wire.
pub const DATA_PREFIX: &str = "data: ";

/// Payload of the end-of-stream sentinel line. Not JSON.
pub const END_MARKER: &str = "[DONE]";

/// Result of decoding one protocol line.
#[derive(Debug)]
pub enum Frame {
    /// Blank line or a line without the `data: ` prefix.
    Ignored,
    /// `data: [DONE]`, or a `done` event.
    End,
    Event(StreamEvent),
    /// A `data:` line whose payload could not be decoded. Callers skip it.
    Malformed {
        payload: String,
        error: serde_json::Error,
    },
}

pub fn decode_line(line: &str) -> Frame {
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Frame::Ignored;
    };

    if payload == END_MARKER {
        return Frame::End;
    }

    match StreamEvent::from_json(payload) {
        Ok(StreamEvent::Done) => Frame::End,
        Ok(event) => Frame::Event(event),
        Err(error) => Frame::Malformed {
            payload: payload.to_string(),
            error,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_blank_comment_and_other_fields() {
        assert!(matches!(decode_line(""), Frame::Ignored));
        assert!(matches!(decode_line(": keep-alive"), Frame::Ignored));
        assert!(matches!(decode_line("event: message"), Frame::Ignored));
        assert!(matches!(decode_line("data:{\"type\":\"done\"}"), Frame::Ignored));
    }

    #[test]
    fn recognizes_sentinel_exactly() {
        assert!(matches!(decode_line("data: [DONE]"), Frame::End));
        assert!(matches!(decode_line("data: {\"type\":\"done\"}"), Frame::End));
        assert!(matches!(
            decode_line("data: [DONE] trailing"),
            Frame::Malformed { .. }
        ));
    }

    #[test]
    fn decodes_event_payload() {
        let frame = decode_line(r#"data: {"type":"content_delta","data":{"delta":"Hi"}}"#);

        let Frame::Event(event) = frame else {
            panic!("expected an event frame");
        };
        assert_eq!(
            event,
            StreamEvent::ContentDelta {
                delta: "Hi".to_string()
            }
        );
    }

    #[test]
    fn malformed_json_is_reported_not_raised() {
        let frame = decode_line("data: {not valid json");

        let Frame::Malformed { payload, .. } = frame else {
            panic!("expected a malformed frame");
        };
        assert_eq!(payload, "{not valid json");
    }

    #[test]
    fn decodes_camel_case_sources_frame() {
        let frame = decode_line(
            r#"data: {"type":"sources","data":{"sources":[{"id":"source-1","documentName":"Technical Guide.pdf","pageIndex":42,"title":"Core Concepts","content":"This section explains the fundamental concepts...","citationNumber":1}]}}"#,
        );

        let Frame::Event(StreamEvent::Sources { sources }) = frame else {
            panic!("expected a sources frame");
        };
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].document_name, "Technical Guide.pdf");
        assert_eq!(sources[0].title(), "Core Concepts");
        assert_eq!(sources[0].start_page, 42);
        assert_eq!(sources[0].citation_index, Some(1));
    }

    #[test]
    fn decodes_flat_token_frame() {
        let frame = decode_line(r#"data: {"type": "token", "content": "The"}"#);

        let Frame::Event(event) = frame else {
            panic!("expected an event frame");
        };
        assert_eq!(
            event,
            StreamEvent::ContentDelta {
                delta: "The".to_string()
            }
        );
    }
}
