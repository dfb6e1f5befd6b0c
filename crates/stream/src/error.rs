use std::time::Duration;

use snafu::Snafu;

/// Coarse classification of stream failures, so callers can pick between
/// "retry" and "check connection" messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Timeout,
    Transport,
    Remote,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ClientError {
    #[snafu(display("invalid client configuration: {details}"))]
    InvalidConfig {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("failed to build http client on `{stage}`, {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("request to {url} failed on `{stage}`, {source}"))]
    SendRequest {
        stage: &'static str,
        url: String,
        source: reqwest::Error,
    },
    #[snafu(display("chat endpoint returned status {status}: {body}"))]
    Status {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to read response body on `{stage}`, {source}"))]
    ReadBody {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("chat stream timed out after {}s", after.as_secs_f64()))]
    Timeout {
        stage: &'static str,
        after: Duration,
    },
    #[snafu(display("chat stream disconnected on `{stage}`: {details}"))]
    Disconnected {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("chat service reported an error: {message}"))]
    Remote {
        stage: &'static str,
        message: String,
    },
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::SendRequest { source, .. } | Self::ReadBody { source, .. }
                if source.is_timeout() =>
            {
                ErrorKind::Timeout
            }
            Self::Remote { .. } => ErrorKind::Remote,
            Self::InvalidConfig { .. }
            | Self::BuildClient { .. }
            | Self::SendRequest { .. }
            | Self::Status { .. }
            | Self::ReadBody { .. }
            | Self::Disconnected { .. } => ErrorKind::Transport,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum IdError {
    #[snafu(display("id '{raw}' is invalid for {id_type}"))]
    InvalidId {
        stage: &'static str,
        id_type: &'static str,
        raw: String,
        source: uuid::Error,
    },
}

pub type IdResult<T> = Result<T, IdError>;
