use super::error::ClientError;
use super::event::StreamEvent;
use super::model::{DocumentSource, ToolInput};

/// Callback table driven by the stream consumer.
///
/// Event callbacks fire in wire order. `on_error` and `on_complete` are driven by
/// stream termination and fire at most once per stream, never both.
/// Every callback defaults to a no-op.
#[allow(unused_variables)]
pub trait StreamHandler {
    fn on_tool_start(&mut self, call_id: &str, tool_name: &str, input: Option<&ToolInput>) {}

    fn on_tool_end(&mut self, call_id: &str, output: Option<&str>) {}

    fn on_tool_error(&mut self, call_id: &str, error: &str) {}

    /// Result for the newest open tool call, sent by services that assign no ids.
    fn on_tool_result(&mut self, output: Option<&str>) {}

    fn on_content_delta(&mut self, delta: &str) {}

    fn on_content_done(&mut self, content: &str) {}

    fn on_sources(&mut self, sources: &[DocumentSource]) {}

    fn on_source(&mut self, source: &DocumentSource) {}

    fn on_error(&mut self, error: &ClientError) {}

    fn on_complete(&mut self) {}
}

impl<H> StreamHandler for &mut H
where
    H: StreamHandler + ?Sized,
{
    fn on_tool_start(&mut self, call_id: &str, tool_name: &str, input: Option<&ToolInput>) {
        (**self).on_tool_start(call_id, tool_name, input);
    }

    fn on_tool_end(&mut self, call_id: &str, output: Option<&str>) {
        (**self).on_tool_end(call_id, output);
    }

    fn on_tool_error(&mut self, call_id: &str, error: &str) {
        (**self).on_tool_error(call_id, error);
    }

    fn on_tool_result(&mut self, output: Option<&str>) {
        (**self).on_tool_result(output);
    }

    fn on_content_delta(&mut self, delta: &str) {
        (**self).on_content_delta(delta);
    }

    fn on_content_done(&mut self, content: &str) {
        (**self).on_content_done(content);
    }

    fn on_sources(&mut self, sources: &[DocumentSource]) {
        (**self).on_sources(sources);
    }

    fn on_source(&mut self, source: &DocumentSource) {
        (**self).on_source(source);
    }

    fn on_error(&mut self, error: &ClientError) {
        (**self).on_error(error);
    }

    fn on_complete(&mut self) {
        (**self).on_complete();
    }
}

/// Routes one event to its callback. Returns false for events without one.
///
/// `Done` and `Error` are stream terminators, handled by the consumer.
pub fn dispatch<H>(event: &StreamEvent, handler: &mut H) -> bool
where
    H: StreamHandler + ?Sized,
{
    match event {
        StreamEvent::ToolStart {
            call_id,
            tool_name,
            input,
        } => handler.on_tool_start(call_id, tool_name, input.as_ref()),
        StreamEvent::ToolEnd { call_id, output } => {
            handler.on_tool_end(call_id, output.as_deref());
        }
        StreamEvent::ToolError { call_id, error } => handler.on_tool_error(call_id, error),
        StreamEvent::ToolResult { output } => handler.on_tool_result(output.as_deref()),
        StreamEvent::ContentDelta { delta } => handler.on_content_delta(delta),
        StreamEvent::ContentDone { content } => handler.on_content_done(content),
        StreamEvent::Sources { sources } => handler.on_sources(sources),
        StreamEvent::Source { source } => handler.on_source(source),
        StreamEvent::Unknown { kind } => {
            tracing::trace!(kind = %kind, "ignoring unknown stream event kind");
            return false;
        }
        StreamEvent::Error { .. } | StreamEvent::Done => return false,
    }

    true
}
