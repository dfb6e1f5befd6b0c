use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use pagechat_stream::{BoxFuture, ByteStream, ChatRequest, ChatTransport, ClientResult};

/// Serves a recorded SSE transcript as if it were a live response body.
///
/// The transcript is cut into fixed-size chunks so frames straddle chunk
/// boundaries the way they do on a real connection.
pub struct ReplayTransport {
    transcript: Bytes,
    chunk_size: usize,
}

impl ReplayTransport {
    pub fn new(transcript: impl Into<Bytes>, chunk_size: usize) -> Self {
        Self {
            transcript: transcript.into(),
            chunk_size: chunk_size.max(1),
        }
    }

    fn chunks(&self) -> Vec<ClientResult<Bytes>> {
        let mut chunks = Vec::new();
        let mut offset = 0;
        while offset < self.transcript.len() {
            let end = (offset + self.chunk_size).min(self.transcript.len());
            chunks.push(Ok(self.transcript.slice(offset..end)));
            offset = end;
        }
        chunks
    }
}

impl ChatTransport for ReplayTransport {
    fn open<'a>(&'a self, _request: &'a ChatRequest) -> BoxFuture<'a, ClientResult<ByteStream>> {
        let body = stream::iter(self.chunks()).boxed();
        Box::pin(async move { Ok(body) })
    }
}
