use snafu::Snafu;

use crate::capabilities::CapabilityError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("chat '{chat_id}' does not exist"))]
    UnknownChat {
        stage: &'static str,
        chat_id: String,
    },
    #[snafu(display("no user is signed in"))]
    NotSignedIn { stage: &'static str },
    #[snafu(display("message {index} does not exist in the active chat"))]
    MessageOutOfRange { stage: &'static str, index: usize },
    #[snafu(display("message {index} has nothing to copy"))]
    NothingToCopy { stage: &'static str, index: usize },
    #[snafu(display("failed to read attachment {path}"))]
    ReadAttachment {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("{path} is not a supported image type"))]
    UnsupportedAttachment { stage: &'static str, path: String },
    #[snafu(display("attachment '{mime_type}' has no data"))]
    EmptyAttachment {
        stage: &'static str,
        mime_type: String,
    },
    #[snafu(display("capability failed on `{stage}`: {source}"))]
    Capability {
        stage: &'static str,
        source: CapabilityError,
    },
}

pub type ChatResult<T> = Result<T, ChatError>;
