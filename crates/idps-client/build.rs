// Build script for idps-client
// Handles protobuf code generation for the Crypto service

fn main() {
    // Use vendored protoc from protobuf-src
    std::env::set_var("PROTOC", protobuf_src::protoc());

    compile_protos();

    // Rebuild when protobuf files change
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=protos/");
}

/// Compile protocol buffers for the Crypto service
fn compile_protos() {
    tonic_prost_build::configure()
        .build_client(true)
        .build_server(true) // Server stubs back the in-process test service
        .compile_protos(&["protos/crypto.proto"], &["protos/"])
        .unwrap_or_else(|e| panic!("Failed to compile protos: {}", e));
}
