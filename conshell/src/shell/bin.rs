// Binary entry point for conshell
// This is a thin wrapper that delegates to the library implementation

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = conshell::shell::run().await {
        eprintln!("conshell fatal error: {:#}", e);
        return Err(e);
    }
    Ok(())
}
