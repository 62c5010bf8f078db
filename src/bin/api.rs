use defi_fund_manager::{advisor::Advisor, api::start_server, config::Settings};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env()?;
    if settings.llm.api_key.is_empty() {
        eprintln!("⚠️  GEMINI_API_KEY not set in .env");
    }

    info!("🚀 DeFi Fund Manager - API Server");
    info!("📍 Port: {}", settings.services.port);

    let advisor = Arc::new(Advisor::from_settings(&settings).await?);

    info!("✅ Advisor initialized");
    info!("📡 Starting API server...");

    start_server(advisor, settings.services.port).await?;

    Ok(())
}
