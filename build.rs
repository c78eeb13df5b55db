fn main() {
    println!("cargo:rerun-if-changed=src/donation_ledger.proto");
    if std::env::var_os("PROTOC").is_none() {
        if let Ok(protoc) = protoc_bin_vendored::protoc_bin_path() {
            std::env::set_var("PROTOC", protoc);
        }
    }
    // Generate Rust types and a file descriptor set for reflection (write it to OUT_DIR)
    let out_dir = std::env::var("OUT_DIR").expect("OUT_DIR env var not set by Cargo");
    let descriptor_path =
        std::path::PathBuf::from(&out_dir).join("donation_ledger_descriptor.bin");

    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .file_descriptor_set_path(&descriptor_path)
        .compile_protos(&["src/donation_ledger.proto"], &["src"])
        .unwrap();
}
