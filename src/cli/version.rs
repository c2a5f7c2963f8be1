/// Display version information
pub fn execute() {
    println!("courier {}", env!("CARGO_PKG_VERSION"));
    println!("Queued account-to-account message dispatcher");
}
