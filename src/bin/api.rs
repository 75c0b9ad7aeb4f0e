use assistant_engine::{
    api::{start_server, ApiState},
    domains, ConversationEngine, EngineConfig, EngineServices,
};
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

    let config = EngineConfig::from_env()?;

    info!("Assistant Engine - API Server");
    info!(port = config.port, provider = ?config.model_provider, "Configuration loaded");

    let services = EngineServices::from_config(&config)?;
    let ingestor = services.ingestor(&config.timeouts).map(Arc::new);

    let engines: Vec<ConversationEngine> = domains::all_profiles()
        .into_iter()
        .map(|profile| ConversationEngine::new(profile, services.clone(), &config))
        .collect();

    info!(assistants = engines.len(), retrieval = ingestor.is_some(), "Engines initialized");

    start_server(ApiState::new(engines, ingestor), config.port).await?;

    Ok(())
}
