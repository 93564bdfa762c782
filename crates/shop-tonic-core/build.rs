/// Builds the gRPC client and server code for the shop protobuf contracts
/// using `tonic-prost-build`.
///
/// Both `proto/inventory.proto` and `proto/userop.proto` are compiled into the
/// crate's `OUT_DIR`, together with a single encoded file descriptor set that
/// the servers register with gRPC reflection.
///
/// # Panics
///
/// Panics if code generation fails (missing `protoc`, invalid schema).
use std::env;
use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("shop_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(
            config,
            &["proto/inventory.proto", "proto/userop.proto"],
            &["proto"],
        )
        .unwrap();
}
