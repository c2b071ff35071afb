//! Generates the gRPC bindings for `proto/echo.proto`.
//!
//! The encoded file descriptor set is written next to the generated code so the
//! server can register it with the reflection service.
//!
//! Code generation failures abort the build.
use std::env;
use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
    let descriptor_path = out_dir.join("echo_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/echo.proto"], &["proto"])
        .expect("failed to compile proto/echo.proto");
}
