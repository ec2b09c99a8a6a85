fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure().build_server(false).compile(
        &["proto/upsf.proto"],
        &["proto"],
    )?;

    println!("cargo:rerun-if-changed=proto/upsf.proto");

    Ok(())
}
