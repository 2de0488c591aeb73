pub fn execute() -> Result<(), Box<dyn std::error::Error>> {
    println!("xrt {}", env!("CARGO_PKG_VERSION"));
    println!("protocol {}", xrt_rpc::PROTOCOL_VERSION);
    println!("Platform: {}-{}", std::env::consts::ARCH, std::env::consts::OS);

    println!();
    match xrt_client::HarnessConfig::default_path() {
        Some(path) if path.exists() => println!("Config: {}", path.display()),
        Some(path) => println!("Config: {} (not found, using defaults)", path.display()),
        None => println!("Config: (no home directory)"),
    }
    Ok(())
}
