use std::io;
use std::path::PathBuf;

use pagechat_stream::{ClientError, StreamTransitionRejection};
use snafu::Snafu;

/// Everything the `pagechat` binary can fail with.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("failed to save settings to {path:?} on `{stage}`: {source}"))]
    SaveSettings {
        stage: &'static str,
        path: PathBuf,
        source: io::Error,
    },
    #[snafu(display("failed to set up chat client on `{stage}`: {source}"))]
    Client {
        stage: &'static str,
        source: ClientError,
    },
    #[snafu(display("failed to read transcript {path:?} on `{stage}`: {source}"))]
    ReadTranscript {
        stage: &'static str,
        path: PathBuf,
        source: io::Error,
    },
    #[snafu(display("failed to serialize on `{stage}`: {source}"))]
    Serialize {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write output on `{stage}`: {source}"))]
    Write {
        stage: &'static str,
        source: io::Error,
    },
    #[snafu(display("conversation rejected the request on `{stage}`: {rejection:?}"))]
    Rejected {
        stage: &'static str,
        rejection: StreamTransitionRejection,
    },
}

pub type AppResult<T> = Result<T, AppError>;
