use roverlay::{
    logger::{self, LoggerConfig},
    server, Config,
};

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_loaded = dotenv::dotenv().is_ok();

    logger::init_with_config(LoggerConfig::from_env())?;

    if env_loaded {
        log::info!("✅ .env file loaded successfully");
    } else {
        log::warn!("⚠️  No .env file found, using system environment variables");
    }

    let config = Config::from_env();
    logger::log_startup_info(
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        config.host(),
        config.port(),
    );
    logger::log_config_info(&config);

    if !config.gemini.has_api_key() {
        log::warn!("⚠️  GEMINI_API_KEY is not set; generation requests will be rejected");
    }

    server::run(config).await?;
    Ok(())
}
