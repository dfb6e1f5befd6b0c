use super::accumulator::ToolOutcome;
use super::client::{ChatRequest, RequestMessage};
use super::consumer::StreamOutcome;
use super::dispatch::StreamHandler;
use super::error::ClientError;
use super::event::StreamEvent;
use super::ids::{ConversationId, MessageId};
use super::model::{
    DocumentSource, Message, MessageStatus, Role, StreamSessionId, Timestamp, ToolInput,
    now_millis,
};

/// Stream routing key used for stale-event rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamTarget {
    pub conversation_id: ConversationId,
    pub session_id: StreamSessionId,
}

impl StreamTarget {
    pub const fn new(conversation_id: ConversationId, session_id: StreamSessionId) -> Self {
        Self {
            conversation_id,
            session_id,
        }
    }
}

/// Stream lifecycle of one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Idle,
    Streaming(StreamTarget),
    Done(StreamTarget),
    Error {
        target: StreamTarget,
        message: String,
    },
    Cancelled(StreamTarget),
}

/// State transition input for stream lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTransition {
    Start(StreamTarget),
    Complete(StreamTarget),
    Fail {
        target: StreamTarget,
        message: String,
    },
    Cancel(StreamTarget),
}

impl StreamTransition {
    /// Terminal transition matching how a stream ended.
    pub fn from_outcome(target: StreamTarget, outcome: &StreamOutcome) -> Self {
        match outcome {
            StreamOutcome::Completed => Self::Complete(target),
            StreamOutcome::Cancelled => Self::Cancel(target),
            StreamOutcome::Failed { message, .. } => Self::Fail {
                target,
                message: message.clone(),
            },
        }
    }
}

/// Rejection reason for illegal stream transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTransitionRejection {
    AlreadyStreaming {
        active: StreamTarget,
        attempted: StreamTarget,
    },
    NoActiveStream,
    SessionMismatch {
        active: StreamTarget,
        attempted: StreamTarget,
    },
}

pub type StreamTransitionResult = Result<StreamState, StreamTransitionRejection>;

impl StreamState {
    /// Returns active streaming target if and only if state is `Streaming`.
    pub fn active_target(&self) -> Option<StreamTarget> {
        match self {
            Self::Streaming(target) => Some(*target),
            Self::Idle | Self::Done(_) | Self::Error { .. } | Self::Cancelled(_) => None,
        }
    }

    /// Returns true when incoming stream data matches the active session.
    pub fn accepts_stream_event(&self, target: StreamTarget) -> bool {
        matches!(self, Self::Streaming(active) if *active == target)
    }

    /// Applies one transition deterministically.
    ///
    /// Only a non-streaming state may start a session, so a second send while one
    /// is in flight is rejected. Terminal transitions must name the active session.
    pub fn apply(&self, transition: StreamTransition) -> StreamTransitionResult {
        match transition {
            StreamTransition::Start(target) => self.apply_start(target),
            StreamTransition::Complete(target) => {
                self.apply_terminal(target, || Self::Done(target))
            }
            StreamTransition::Fail { target, message } => {
                self.apply_terminal(target, || Self::Error { target, message })
            }
            StreamTransition::Cancel(target) => {
                self.apply_terminal(target, || Self::Cancelled(target))
            }
        }
    }

    fn apply_start(&self, target: StreamTarget) -> StreamTransitionResult {
        match self {
            Self::Streaming(active) => Err(StreamTransitionRejection::AlreadyStreaming {
                active: *active,
                attempted: target,
            }),
            Self::Idle | Self::Done(_) | Self::Error { .. } | Self::Cancelled(_) => {
                Ok(Self::Streaming(target))
            }
        }
    }

    fn apply_terminal(
        &self,
        target: StreamTarget,
        next: impl FnOnce() -> Self,
    ) -> StreamTransitionResult {
        match self {
            Self::Streaming(active) if *active == target => Ok(next()),
            Self::Streaming(active) => Err(StreamTransitionRejection::SessionMismatch {
                active: *active,
                attempted: target,
            }),
            Self::Idle | Self::Done(_) | Self::Error { .. } | Self::Cancelled(_) => {
                Err(StreamTransitionRejection::NoActiveStream)
            }
        }
    }
}

/// Conversation aggregate: finalized history plus at most one in-progress reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    messages: Vec<Message>,
    in_progress: Option<Message>,
    stream_state: StreamState,
    last_session: u64,
}

impl Conversation {
    pub fn new(id: ConversationId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            messages: Vec::new(),
            in_progress: None,
            stream_state: StreamState::Idle,
            last_session: 0,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn in_progress(&self) -> Option<&Message> {
        self.in_progress.as_ref()
    }

    pub fn stream_state(&self) -> &StreamState {
        &self.stream_state
    }

    pub fn is_streaming(&self) -> bool {
        self.stream_state.active_target().is_some()
    }

    /// Records a user turn and opens an assistant placeholder for the reply.
    ///
    /// Rejected with `AlreadyStreaming` while a previous reply is still in flight.
    pub fn submit(
        &mut self,
        content: impl Into<String>,
        at: Timestamp,
    ) -> Result<StreamTarget, StreamTransitionRejection> {
        let session_id = StreamSessionId::new(self.last_session + 1);
        let target = StreamTarget::new(self.id, session_id);
        let next_state = self.stream_state.apply(StreamTransition::Start(target))?;

        self.stream_state = next_state;
        self.last_session = session_id.0;
        self.messages
            .push(Message::user(MessageId::new_v7(), content, at));
        self.in_progress = Some(Message::assistant_streaming(
            MessageId::new_v7(),
            session_id,
            at,
        ));
        Ok(target)
    }

    /// Applies one event to the in-progress reply. Returns false for stale targets.
    pub fn apply_event(&mut self, target: StreamTarget, event: &StreamEvent, at: Timestamp) -> bool {
        self.update(target, |message| message.apply(event, at))
    }

    fn update(&mut self, target: StreamTarget, reduce: impl FnOnce(Message) -> Message) -> bool {
        if !self.stream_state.accepts_stream_event(target) {
            tracing::warn!(
                target = ?target,
                state = ?self.stream_state,
                "dropping stream event for inactive session"
            );
            return false;
        }

        self.in_progress = self.in_progress.take().map(reduce);
        true
    }

    /// Applies the terminal transition for `outcome` and moves the reply into history
    /// with whatever content it reached. Nothing is rolled back.
    pub fn finish(&mut self, target: StreamTarget, outcome: &StreamOutcome) -> StreamTransitionResult {
        let transition = StreamTransition::from_outcome(target, outcome);
        let next_state = self.stream_state.apply(transition)?;

        if let Some(mut message) = self.in_progress.take() {
            message.status = match &next_state {
                StreamState::Error { message, .. } => MessageStatus::Error(message.clone()),
                StreamState::Cancelled(_) => MessageStatus::Cancelled,
                StreamState::Done(_) | StreamState::Idle | StreamState::Streaming(_) => {
                    MessageStatus::Done
                }
            };
            self.messages.push(message);
        }

        self.stream_state = next_state.clone();
        Ok(next_state)
    }

    /// Builds the request for the active reply from finalized history.
    pub fn to_request(&self) -> ChatRequest {
        let messages = self
            .messages
            .iter()
            .filter(|message| match (&message.role, &message.status) {
                (Role::Assistant, MessageStatus::Error(_)) => false,
                _ => !message.content.trim().is_empty(),
            })
            .map(|message| RequestMessage::new(message.role, message.content.clone()))
            .collect();
        ChatRequest::new(messages).with_conversation(self.id.to_string())
    }

    /// Handler that feeds stream callbacks into this conversation.
    pub fn stream_handler(&mut self, target: StreamTarget) -> ConversationStream<'_> {
        ConversationStream {
            conversation: self,
            target,
            clock: now_millis,
        }
    }
}

/// [`StreamHandler`] bound to one conversation and one session.
pub struct ConversationStream<'a> {
    conversation: &'a mut Conversation,
    target: StreamTarget,
    clock: fn() -> Timestamp,
}

impl ConversationStream<'_> {
    pub fn target(&self) -> StreamTarget {
        self.target
    }

    pub fn in_progress(&self) -> Option<&Message> {
        self.conversation.in_progress()
    }

    fn step(&mut self, reduce: impl FnOnce(Message, Timestamp) -> Message) {
        let at = (self.clock)();
        self.conversation
            .update(self.target, |message| reduce(message, at));
    }
}

impl StreamHandler for ConversationStream<'_> {
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

    fn on_error(&mut self, error: &ClientError) {
        tracing::debug!(target = ?self.target, error = %error, "conversation stream failed");
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::ErrorKind;

    fn conversation() -> Conversation {
        Conversation::new(ConversationId::new_v7(), "Annual report")
    }

    fn delta(text: &str) -> StreamEvent {
        StreamEvent::ContentDelta {
            delta: text.to_string(),
        }
    }

    #[test]
    fn submit_opens_single_in_progress_reply() {
        let mut conversation = conversation();

        let target = conversation.submit("What changed?", 1).unwrap();

        assert_eq!(conversation.stream_state(), &StreamState::Streaming(target));
        assert_eq!(conversation.messages().len(), 1);
        assert_eq!(conversation.messages()[0].role, Role::User);
        let reply = conversation.in_progress().unwrap();
        assert_eq!(reply.status, MessageStatus::Streaming(target.session_id));
    }

    #[test]
    fn second_submit_while_streaming_is_rejected() {
        let mut conversation = conversation();
        let active = conversation.submit("first", 1).unwrap();

        let rejection = conversation.submit("second", 2).unwrap_err();

        assert!(matches!(
            rejection,
            StreamTransitionRejection::AlreadyStreaming { active: current, .. } if current == active
        ));
        assert_eq!(conversation.messages().len(), 1);
        assert_eq!(conversation.stream_state(), &StreamState::Streaming(active));
    }

    #[test]
    fn finish_moves_reply_into_history() {
        let mut conversation = conversation();
        let target = conversation.submit("q", 1).unwrap();
        conversation.apply_event(target, &delta("answer"), 2);

        let state = conversation
            .finish(target, &StreamOutcome::Completed)
            .unwrap();

        assert_eq!(state, StreamState::Done(target));
        assert!(conversation.in_progress().is_none());
        let reply = conversation.messages().last().unwrap();
        assert_eq!(reply.content, "answer");
        assert_eq!(reply.status, MessageStatus::Done);
    }

    #[test]
    fn cancel_keeps_partial_reply_and_later_cancel_is_noop() {
        let mut conversation = conversation();
        let target = conversation.submit("q", 1).unwrap();
        conversation.apply_event(target, &delta("half an ans"), 2);

        conversation
            .finish(target, &StreamOutcome::Cancelled)
            .unwrap();
        let snapshot = conversation.clone();

        assert_eq!(
            conversation.finish(target, &StreamOutcome::Cancelled),
            Err(StreamTransitionRejection::NoActiveStream)
        );
        assert!(!conversation.apply_event(target, &delta("rn"), 3));
        assert_eq!(conversation, snapshot);
        let reply = conversation.messages().last().unwrap();
        assert_eq!(reply.content, "half an ans");
        assert_eq!(reply.status, MessageStatus::Cancelled);
    }

    #[test]
    fn failure_records_error_status() {
        let mut conversation = conversation();
        let target = conversation.submit("q", 1).unwrap();

        conversation
            .finish(
                target,
                &StreamOutcome::Failed {
                    kind: ErrorKind::Timeout,
                    message: "chat stream timed out after 60s".to_string(),
                },
            )
            .unwrap();

        let reply = conversation.messages().last().unwrap();
        assert_eq!(
            reply.status,
            MessageStatus::Error("chat stream timed out after 60s".to_string())
        );
        assert!(!conversation.is_streaming());
    }

    #[test]
    fn stale_session_events_are_rejected() {
        let mut conversation = conversation();
        let first = conversation.submit("one", 1).unwrap();
        conversation.finish(first, &StreamOutcome::Completed).unwrap();
        let second = conversation.submit("two", 2).unwrap();

        assert!(!conversation.apply_event(first, &delta("stale"), 3));
        assert!(conversation.apply_event(second, &delta("fresh"), 3));
        assert_eq!(conversation.in_progress().unwrap().content, "fresh");
        assert_eq!(
            conversation.finish(first, &StreamOutcome::Completed),
            Err(StreamTransitionRejection::SessionMismatch {
                active: second,
                attempted: first,
            })
        );
    }

    #[test]
    fn request_skips_placeholder_and_failed_replies() {
        let mut conversation = conversation();
        let first = conversation.submit("one", 1).unwrap();
        conversation.apply_event(first, &delta("reply one"), 2);
        conversation.finish(first, &StreamOutcome::Completed).unwrap();
        let second = conversation.submit("two", 3).unwrap();
        conversation.apply_event(second, &delta("broken"), 4);
        conversation
            .finish(
                second,
                &StreamOutcome::Failed {
                    kind: ErrorKind::Transport,
                    message: "reset".to_string(),
                },
            )
            .unwrap();
        conversation.submit("three", 5).unwrap();

        let request = conversation.to_request();

        assert_eq!(
            request.conversation_id,
            Some(conversation.id.to_string())
        );
        assert_eq!(request.question(), "three");
        let turns = request
            .messages
            .iter()
            .map(|message| (message.role, message.content.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            turns,
            vec![
                (Role::User, "one"),
                (Role::Assistant, "reply one"),
                (Role::User, "two"),
                (Role::User, "three"),
            ]
        );
    }

    #[test]
    fn stream_handler_applies_callbacks_to_reply() {
        let mut conversation = conversation();
        let target = conversation.submit("q", 1).unwrap();

        {
            let mut handler = conversation.stream_handler(target);
            handler.on_tool_start("1", "search", None);
            handler.on_content_delta("Hi");
            handler.on_tool_end("1", Some("ok"));
            handler.on_tool_start("2", "read_section", None);
            handler.on_tool_result(None);
            handler.on_source(
                &serde_json::from_str(
                    r#"{"id":"s1","documentName":"a.pdf","pageIndex":2,"content":"x"}"#,
                )
                .unwrap(),
            );
        }

        let reply = conversation.in_progress().unwrap();
        assert_eq!(reply.content, "Hi");
        assert_eq!(reply.tool_calls.len(), 2);
        assert_eq!(reply.tool_calls[0].output.as_deref(), Some("ok"));
        assert_eq!(reply.tool_calls[1].status, crate::model::ToolStatus::Completed);
        assert_eq!(reply.sources.len(), 1);
    }
}
