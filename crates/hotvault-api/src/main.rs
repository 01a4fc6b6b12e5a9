use hotvault_core::Config;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;

    hotvault_api::telemetry::init_telemetry(&config)?;

    // Initialize the application (database, services, routes)
    let (_state, router, sweeps) = hotvault_api::setup::initialize_app(config.clone()).await?;

    hotvault_api::setup::server::start_server(&config, router, sweeps).await?;

    Ok(())
}
