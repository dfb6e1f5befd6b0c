use super::dispatch::StreamHandler;
use super::event::StreamEvent;
use super::model::{
    DocumentSource, Message, Timestamp, ToolCall, ToolInput, ToolStatus, now_millis,
};

/// Terminal result of one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Completed(Option<String>),
    Failed(String),
}

// Reducer steps. Every step takes the message by value and returns the next state;
// a finalized message is returned untouched.
impl Message {
    /// Applies one stream event. Terminators (`done`, `error`) and unknown kinds
    /// leave the message unchanged; finalizing is the conversation's job.
    pub fn apply(self, event: &StreamEvent, at: Timestamp) -> Self {
        match event {
            StreamEvent::ToolStart {
                call_id,
                tool_name,
                input,
            } => self.start_tool(call_id, tool_name, input.clone(), at),
            StreamEvent::ToolEnd { call_id, output } => {
                self.finish_tool(call_id, ToolOutcome::Completed(output.clone()), at)
            }
            StreamEvent::ToolError { call_id, error } => {
                self.finish_tool(call_id, ToolOutcome::Failed(error.clone()), at)
            }
            StreamEvent::ToolResult { output } => {
                self.finish_latest_tool(ToolOutcome::Completed(output.clone()), at)
            }
            StreamEvent::ContentDelta { delta } => self.append_content(delta),
            StreamEvent::ContentDone { content } => self.replace_content(content),
            StreamEvent::Sources { sources } => self.replace_sources(sources.clone()),
            StreamEvent::Source { source } => self.merge_source(source.clone()),
            StreamEvent::Error { .. } | StreamEvent::Done | StreamEvent::Unknown { .. } => self,
        }
    }

    /// Appends a running call. Earlier calls may still be open.
    pub fn start_tool(
        mut self,
        call_id: &str,
        tool_name: &str,
        input: Option<ToolInput>,
        at: Timestamp,
    ) -> Self {
        if self.status.is_final() {
            return self;
        }

        if self.tool_call(call_id).is_some() {
            tracing::debug!(call_id, "ignoring duplicate tool_start");
            return self;
        }

        self.tool_calls
            .push(ToolCall::running(call_id, tool_name, input, at));
        self
    }

    /// Closes the call matching `call_id`. Unknown ids and already-closed calls are no-ops.
    pub fn finish_tool(mut self, call_id: &str, outcome: ToolOutcome, at: Timestamp) -> Self {
        if self.status.is_final() {
            return self;
        }

        let Some(call) = self
            .tool_calls
            .iter_mut()
            .find(|call| call.id == call_id && !call.status.is_terminal())
        else {
            tracing::debug!(call_id, "tool result does not match an open tool call");
            return self;
        };

        match outcome {
            ToolOutcome::Completed(output) => {
                call.status = ToolStatus::Completed;
                call.output = output;
            }
            ToolOutcome::Failed(error) => {
                call.status = ToolStatus::Error;
                call.error = Some(error);
            }
        }
        call.ended_at = Some(call.started_at.map_or(at, |started_at| at.max(started_at)));
        self
    }

    /// Closes the newest open call, for results that carry no id.
    pub fn finish_latest_tool(self, outcome: ToolOutcome, at: Timestamp) -> Self {
        let open = self
            .tool_calls
            .iter()
            .rev()
            .find(|call| !call.status.is_terminal())
            .map(|call| call.id.clone());

        match open {
            Some(call_id) => self.finish_tool(&call_id, outcome, at),
            None => {
                tracing::debug!("tool result arrived with no open tool call");
                self
            }
        }
    }

    pub fn append_content(mut self, delta: &str) -> Self {
        if !self.status.is_final() {
            self.content.push_str(delta);
        }
        self
    }

    /// The authoritative final text wins over accumulated deltas.
    pub fn replace_content(mut self, content: &str) -> Self {
        if !self.status.is_final() {
            content.clone_into(&mut self.content);
        }
        self
    }

    /// Sources replace, never merge.
    pub fn replace_sources(mut self, sources: Vec<DocumentSource>) -> Self {
        if !self.status.is_final() {
            self.sources = sources;
        }
        self
    }

    /// Adds one streamed source, replacing an earlier one with the same id.
    pub fn merge_source(mut self, source: DocumentSource) -> Self {
        if self.status.is_final() {
            return self;
        }

        match self
            .sources
            .iter_mut()
            .find(|existing| existing.id == source.id)
        {
            Some(existing) => *existing = source,
            None => self.sources.push(source),
        }
        self
    }
}

/// Folds a sequence of events into `message`, stamping each with `at`.
pub fn replay<'a, I>(message: Message, events: I, at: Timestamp) -> Message
where
    I: IntoIterator<Item = &'a StreamEvent>,
{
    events
        .into_iter()
        .fold(message, |message, event| message.apply(event, at))
}

/// [`StreamHandler`] that threads the reducer over one in-progress message.
pub struct Accumulator {
    message: Option<Message>,
    clock: fn() -> Timestamp,
    completed: usize,
}

impl Accumulator {
    pub fn new(message: Message) -> Self {
        Self::with_clock(message, now_millis)
    }

    pub fn with_clock(message: Message, clock: fn() -> Timestamp) -> Self {
        Self {
            message: Some(message),
            clock,
            completed: 0,
        }
    }

    pub fn message(&self) -> Option<&Message> {
        self.message.as_ref()
    }

    pub fn into_message(self) -> Option<Message> {
        self.message
    }

    /// How many times the stream reported completion.
    pub fn completions(&self) -> usize {
        self.completed
    }

    fn step(&mut self, reduce: impl FnOnce(Message, Timestamp) -> Message) {
        let at = (self.clock)();
        self.message = self.message.take().map(|message| reduce(message, at));
    }
}

impl StreamHandler for Accumulator {
    fn on_tool_start(&mut self, call_id: &str, tool_name: &str, input: Option<&ToolInput>) {
        let input = input.cloned();
        self.step(|message, at| message.start_tool(call_id, tool_name, input, at));
    }

    fn on_tool_end(&mut self, call_id: &str, output: Option<&str>) {
        let outcome = ToolOutcome::Completed(output.map(str::to_string));
        self.step(|message, at| message.finish_tool(call_id, outcome, at));
    }

    fn on_tool_error(&mut self, call_id: &str, error: &str) {
        let outcome = ToolOutcome::Failed(error.to_string());
        self.step(|message, at| message.finish_tool(call_id, outcome, at));
    }

    fn on_tool_result(&mut self, output: Option<&str>) {
        let outcome = ToolOutcome::Completed(output.map(str::to_string));
        self.step(|message, at| message.finish_latest_tool(outcome, at));
    }

    fn on_content_delta(&mut self, delta: &str) {
        self.step(|message, _| message.append_content(delta));
    }

    fn on_content_done(&mut self, content: &str) {
        self.step(|message, _| message.replace_content(content));
    }

    fn on_sources(&mut self, sources: &[DocumentSource]) {
        let sources = sources.to_vec();
        self.step(|message, _| message.replace_sources(sources));
    }

    fn on_source(&mut self, source: &DocumentSource) {
        let source = source.clone();
        self.step(|message, _| message.merge_source(source));
    }

    fn on_complete(&mut self) {
        self.completed += 1;
    }
}
