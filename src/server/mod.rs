//! HTTP surface: buffered and NDJSON-streamed generation plus a health probe.

pub mod handlers;

use crate::{config::Config, pipeline::Orchestrator};
use actix_web::{middleware, web, App, HttpServer};
use std::sync::Arc;

/// Generous enough for a base64 photo.
pub const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(Orchestrator::from_config(&config.gemini).with_budget(config.request_timeout()))
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::PayloadConfig::new(MAX_BODY_BYTES))
        .route("/health", web::get().to(handlers::health))
        .route("/api/generate", web::post().to(handlers::generate))
        .route("/api/generate/stream", web::post().to(handlers::generate_stream));
}

pub async fn run(config: Config) -> std::io::Result<()> {
    let state = web::Data::new(AppState::from_config(&config));
    let address = (config.host().to_string(), config.port());

    log::info!("🌐 Listening on http://{}:{}", address.0, address.1);

    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind(address)?
    .run()
    .await
}
