#![deny(unsafe_code)]

//! Streaming client core for a document-tree reasoning chat service.
//!
//! Bytes arriving from the chat endpoint flow through [`lines::LineSplitter`],
//! [`frame::decode_line`] and [`dispatch::dispatch`] into a [`StreamHandler`].
//! [`accumulator::Accumulator`] and [`session::ConversationStream`] are the
//! handlers that fold those callbacks into message state.

pub mod accumulator;
pub mod cancel;
pub mod citation;
pub mod client;
pub mod consumer;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod frame;
pub mod ids;
pub mod lines;
pub mod model;
pub mod session;

pub use accumulator::{Accumulator, ToolOutcome, replay};
pub use cancel::{CancelHandle, CancelSignal, cancel_pair};
pub use citation::{
    CitationMarker, Segment, citation_markers, highlight_segments, resolve_citation,
};
pub use client::{
    BoxFuture, ByteStream, ChatClient, ChatRequest, ChatTransport, ClientConfig,
    DEFAULT_ENDPOINT, DEFAULT_TIMEOUT, HttpTransport, RequestMessage,
};
pub use consumer::{Deadline, StreamOutcome, consume};
pub use dispatch::{StreamHandler, dispatch};
pub use error::{ClientError, ClientResult, ErrorKind, IdError, IdResult};
pub use event::StreamEvent;
pub use frame::{DATA_PREFIX, END_MARKER, Frame, decode_line};
pub use ids::{ConversationId, MessageId};
pub use lines::LineSplitter;
pub use model::{
    DocumentSource, HighlightRegion, Message, MessageStatus, Role, StreamSessionId, Timestamp,
    ToolCall, ToolInput, ToolStatus, now_millis,
};
pub use session::{
    Conversation, ConversationStream, StreamState, StreamTarget, StreamTransition,
    StreamTransitionRejection, StreamTransitionResult,
};
