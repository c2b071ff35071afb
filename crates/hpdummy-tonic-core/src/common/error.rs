//! Error type for the echo service.
//!
//! Converts into [`tonic::Status`] so handlers can use `?` and hand clients a
//! meaningful status code.

use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// Sending a response to the client stream failed.
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The request was malformed.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The server is draining and no longer takes work.
    #[error("server is shutting down")]
    ServiceShutdown,
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::ChannelError { context } => Status::internal(format!("Channel error: {context}")),
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::ServiceShutdown => Status::unavailable("server is shutting down"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn maps_to_grpc_codes() {
        let status = Status::from(Error::ServiceShutdown);
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(status.message(), "server is shutting down");

        let status = Status::from(Error::InvalidRequest {
            reason: "empty".to_owned(),
        });
        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(status.message(), "empty");

        let status = Status::from(Error::ChannelError {
            context: "closed".to_owned(),
        });
        assert_eq!(status.code(), Code::Internal);
    }
}
