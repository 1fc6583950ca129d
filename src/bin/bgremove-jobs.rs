//! Background removal job runner CLI
//!
//! Drives an external removal engine (or a simulated one) for each image and
//! renders synthesized progress.

#[cfg(feature = "cli")]
use bgremove_jobs::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Please rebuild with --features cli");
    std::process::exit(1);
}
