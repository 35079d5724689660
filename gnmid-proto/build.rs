fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure().build_client(true).build_server(true).compile(
        &["proto/gnmid.proto"],
        &["proto"],
    )?;
    println!("cargo:rerun-if-changed=proto/gnmid.proto");
    Ok(())
}
