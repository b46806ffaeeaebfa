//! Build script for compiling Protocol Buffer definitions.
//!
//! Compiles `proto/chorus_speaker.proto` into Rust code with tonic-build.
//! The generated code lands in `$OUT_DIR` and is included via
//! `tonic::include_proto!` (see `src/proto.rs`).

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Tell Cargo to rerun this build script if the proto file changes
    println!("cargo:rerun-if-changed=../../proto/chorus_speaker.proto");
    println!("cargo:rerun-if-changed=../../proto");

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["../../proto/chorus_speaker.proto"], &["../../proto"])?;

    Ok(())
}
