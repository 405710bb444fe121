use upm_registry::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::run().await
}
