#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = photo_checker::run().await {
        eprintln!("photo-checker fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
