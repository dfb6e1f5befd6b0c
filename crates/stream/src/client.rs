use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::header::{ACCEPT, HeaderValue};
use serde::{Deserialize, Serialize, Serializer};
use snafu::{ResultExt, ensure};

use super::cancel::CancelSignal;
use super::consumer::{Deadline, StreamOutcome, consume};
use super::dispatch::StreamHandler;
use super::error::{
    BuildClientSnafu, ClientResult, InvalidConfigSnafu, ReadBodySnafu, SendRequestSnafu,
    StatusSnafu,
};
use super::model::Role;

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8000/api/chat";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const EVENT_STREAM: &str = "text/event-stream";

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type ByteStream = BoxStream<'static, ClientResult<Bytes>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim().to_string(),
            ..Self::default()
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into().trim().to_string();
        self.api_key = (!api_key.is_empty()).then_some(api_key);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMessage {
    pub role: Role,
    pub content: String,
}

impl RequestMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// One question plus the history and document scope it is asked against.
///
/// On the wire the latest user turn is sent both as `message` and as `query`, so
/// the chat and retrieval endpoints read the same body. Earlier turns travel in
/// `messages`; `docId` is a single string or a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub messages: Vec<RequestMessage>,
    pub doc_ids: Vec<String>,
    pub conversation_id: Option<String>,
    pub enable_citations: bool,
}

impl ChatRequest {
    pub fn new(messages: Vec<RequestMessage>) -> Self {
        Self {
            messages,
            doc_ids: Vec::new(),
            conversation_id: None,
            enable_citations: true,
        }
    }

    pub fn with_documents(mut self, doc_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.doc_ids = doc_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// Latest user turn, empty when there is none.
    pub fn question(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map_or("", |message| message.content.as_str())
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum DocIds<'a> {
    One(&'a str),
    Many(&'a [String]),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest<'a> {
    message: &'a str,
    query: &'a str,
    messages: &'a [RequestMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    doc_id: Option<DocIds<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<&'a str>,
    enable_citations: bool,
    stream: bool,
}

impl Serialize for ChatRequest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let question = self.question();
        let doc_id = match self.doc_ids.as_slice() {
            [] => None,
            [single] => Some(DocIds::One(single.as_str())),
            many => Some(DocIds::Many(many)),
        };

        WireRequest {
            message: question,
            query: question,
            messages: &self.messages,
            doc_id,
            conversation_id: self.conversation_id.as_deref(),
            enable_citations: self.enable_citations,
            stream: true,
        }
        .serialize(serializer)
    }
}

/// Opens a streamed response body for one chat request.
///
/// Implementations report non-2xx responses as errors and must stop reading when
/// the returned stream is dropped.
pub trait ChatTransport: Send + Sync {
    fn open<'a>(&'a self, request: &'a ChatRequest) -> BoxFuture<'a, ClientResult<ByteStream>>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        ensure!(
            !config.endpoint.is_empty(),
            InvalidConfigSnafu {
                stage: "http-transport-new",
                details: "chat endpoint is empty".to_string(),
            }
        );

        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .build()
            .context(BuildClientSnafu {
                stage: "build-client",
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        })
    }

    async fn open_stream(&self, request: &ChatRequest) -> ClientResult<ByteStream> {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .header(ACCEPT, HeaderValue::from_static(EVENT_STREAM))
            .json(request);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await.context(SendRequestSnafu {
            stage: "send-chat-request",
            url: self.endpoint.clone(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                endpoint = %self.endpoint,
                status = status.as_u16(),
                "chat endpoint rejected request"
            );
            return StatusSnafu {
                stage: "chat-http-status",
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        let body = response.bytes_stream().map(|chunk| {
            chunk.context(ReadBodySnafu {
                stage: "read-chat-stream",
            })
        });
        Ok(body.boxed())
    }
}

impl ChatTransport for HttpTransport {
    fn open<'a>(&'a self, request: &'a ChatRequest) -> BoxFuture<'a, ClientResult<ByteStream>> {
        Box::pin(self.open_stream(request))
    }
}

/// Sends chat requests and drives their response streams.
pub struct ChatClient<T = HttpTransport> {
    transport: T,
    timeout: Duration,
}

impl ChatClient<HttpTransport> {
    pub fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        Ok(Self::new(HttpTransport::new(config)?, config.timeout))
    }
}

impl<T> ChatClient<T>
where
    T: ChatTransport,
{
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Sends `request` and feeds the response into `handler` until the stream ends,
    /// fails, times out or `signal` is cancelled.
    ///
    /// Every failure, including one before the first byte, reaches `handler.on_error`
    /// exactly once. Cancellation is silent.
    pub async fn send_message<H>(
        &self,
        request: &ChatRequest,
        handler: &mut H,
        mut signal: CancelSignal,
    ) -> StreamOutcome
    where
        H: StreamHandler + ?Sized,
    {
        let deadline = Deadline::after(self.timeout);

        let opened = tokio::select! {
            biased;
            _ = signal.cancelled() => {
                tracing::debug!("chat request cancelled before response headers");
                return StreamOutcome::Cancelled;
            }
            _ = tokio::time::sleep_until(deadline.at()) => {
                Err(deadline.expired_error("await-response-headers"))
            }
            opened = self.transport.open(request) => opened,
        };

        let body = match opened {
            Ok(body) => body,
            Err(error) => {
                tracing::error!(
                    message_count = request.messages.len(),
                    error = %error,
                    "failed to open chat stream"
                );
                handler.on_error(&error);
                return StreamOutcome::Failed {
                    kind: error.kind(),
                    message: error.to_string(),
                };
            }
        };

        consume(body, handler, &mut signal, Some(deadline)).await
    }
}
