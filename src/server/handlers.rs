use crate::{
    error::{OverlayError, Result},
    models::GenerateRequest,
    pipeline::Failure,
    server::AppState,
};
use actix_web::{
    http::{header, StatusCode},
    web, HttpResponse,
};
use futures::StreamExt;
use serde_json::json;
use std::convert::Infallible;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson; charset=utf-8";

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

pub async fn generate(state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    let request = match parse_body(&body) {
        Ok(request) => request,
        Err(e) => return failure_response(Failure::local(e)),
    };

    match state.orchestrator.generate(&request).await {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(failure) => failure_response(failure),
    }
}

/// Validation problems are answered as a plain JSON failure; once the stream
/// starts every outcome arrives as a record.
pub async fn generate_stream(state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    let valid = match parse_body(&body).and_then(|request| state.orchestrator.validate(&request)) {
        Ok(valid) => valid,
        Err(e) => return failure_response(Failure::local(e)),
    };

    let records = state
        .orchestrator
        .clone()
        .generate_stream(valid)
        .map(|record| Ok::<_, Infallible>(web::Bytes::from(record.to_ndjson_line())));

    HttpResponse::Ok()
        .content_type(NDJSON_CONTENT_TYPE)
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .streaming(records)
}

fn parse_body(body: &[u8]) -> Result<GenerateRequest> {
    serde_json::from_slice(body)
        .map_err(|e| OverlayError::invalid_input(format!("Malformed request body: {}", e)))
}

fn failure_response(failure: Failure) -> HttpResponse {
    let status =
        StatusCode::from_u16(failure.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    log::warn!("Request failed with {}: {}", status.as_u16(), failure.error);
    HttpResponse::build(status).json(failure.into_body())
}
