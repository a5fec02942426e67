use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    regcheck_cli::main_entry().await
}
