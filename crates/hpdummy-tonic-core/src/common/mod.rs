pub mod error;

pub use error::{Error, Result};

/// Generated messages, client and server for `echo.EchoService`.
pub mod proto {
    tonic::include_proto!("echo");

    /// Encoded descriptor set, registered with the reflection service.
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("echo_descriptor");
}
