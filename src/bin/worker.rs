#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = examguard::run_worker().await {
        eprintln!("examguard-worker fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
