#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = scangrade::run().await {
        eprintln!("scangrade fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
