#[tokio::main]
async fn main() -> anyhow::Result<()> {
    syncd::run_cli().await
}
