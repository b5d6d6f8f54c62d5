#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = examguard::run().await {
        eprintln!("examguard fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
