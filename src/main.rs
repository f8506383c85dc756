#[tokio::main]
async fn main() -> anyhow::Result<()> {
    aurora_billing::server::run().await
}
