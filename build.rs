fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    tonic_build::configure()
        .build_transport(false)
        .bytes(["."])
        .compile_protos(&["proto/iris.proto", "proto/consensus.proto"], &["proto"])
        .unwrap_or_else(|e| panic!("protobuf compile error: {e}"));

    println!("cargo:rerun-if-changed=proto/iris.proto");
    println!("cargo:rerun-if-changed=proto/consensus.proto");
    Ok(())
}
