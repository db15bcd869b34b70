#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lead_webhook_server::app::run().await
}
