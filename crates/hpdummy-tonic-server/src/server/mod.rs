pub mod config;
pub mod grpc;
pub mod http;
pub mod pidfile;
pub mod shutdown;
pub mod stats;
pub mod telemetry;
