use propflow_core::PipelineConfig;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = PipelineConfig::from_env()?;

    let (state, router) = propflow_api::setup::initialize_app(config.clone()).await?;

    propflow_api::setup::server::start_server(&config, router).await?;

    // Let in-flight items settle before the process exits.
    state.control.shutdown().await;
    tracing::info!("Migration scheduler stopped");

    Ok(())
}
