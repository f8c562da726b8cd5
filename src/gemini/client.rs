use crate::{
    config::GeminiConfig,
    error::{OverlayError, Result},
    gemini::{OutputModality, ReplyPart, Transport, UpstreamReply, UpstreamRequest},
    models::InlineImage,
};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// `generateContent` over HTTPS with an API key.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key.clone().filter(|key| !key.trim().is_empty()),
            base_url: config.base_url().to_string(),
        }
    }

    fn endpoint(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{}", trimmed)
        };
        format!("{}/{}:generateContent", self.base_url, model_path)
    }

    pub fn build_payload(request: &UpstreamRequest) -> Value {
        let mut parts = Vec::new();
        if let Some(image) = &request.image {
            parts.push(json!({
                "inline_data": {
                    "mime_type": image.mime_type,
                    "data": image.data
                }
            }));
        }
        parts.push(json!({ "text": request.instruction }));

        let generation_config = match request.modality {
            OutputModality::Json => json!({
                "temperature": request.temperature,
                "responseMimeType": "application/json"
            }),
            OutputModality::Image => json!({
                "temperature": request.temperature,
                "responseModalities": ["IMAGE"]
            }),
        };

        json!({
            "contents": [{ "parts": parts }],
            "generationConfig": generation_config
        })
    }

    /// Reads the parts of the first candidate; unknown part kinds are skipped.
    pub fn parse_reply(body: &Value) -> UpstreamReply {
        let parts = body["candidates"][0]["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|part| {
                        if let Some(text) = part.get("text").and_then(Value::as_str) {
                            return Some(ReplyPart::Text(text.to_string()));
                        }
                        let inline = part.get("inlineData").or_else(|| part.get("inline_data"))?;
                        let data = inline.get("data").and_then(Value::as_str)?;
                        let mime_type = inline
                            .get("mimeType")
                            .or_else(|| inline.get("mime_type"))
                            .and_then(Value::as_str)
                            .unwrap_or("image/png");
                        Some(ReplyPart::Image(InlineImage::new(mime_type, data)))
                    })
                    .collect()
            })
            .unwrap_or_default();

        UpstreamReply { parts }
    }

    fn error_message(body: &str) -> String {
        serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|value| value["error"]["message"].as_str().map(String::from))
            .unwrap_or_else(|| body.to_string())
    }
}

#[async_trait]
impl Transport for GeminiClient {
    async fn call(&self, request: UpstreamRequest) -> Result<UpstreamReply> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| OverlayError::config("GEMINI_API_KEY is not configured"))?;

        let payload = Self::build_payload(&request);
        log::info!("Invoking model: {}", request.model);

        let response = self
            .client
            .post(self.endpoint(&request.model))
            .header(API_KEY_HEADER, api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                let e = e.without_url();
                log::error!("Gemini request error details: {:?}", e);
                OverlayError::RequestError(format!("Gemini request failed: {}", e))
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| OverlayError::RequestError(e.without_url().to_string()))?;

        if !status.is_success() {
            let message = Self::error_message(&body);
            log::error!("Gemini service error {}: {}", status.as_u16(), message);
            return Err(OverlayError::UpstreamError {
                status: status.as_u16(),
                message,
            });
        }

        let value: Value = serde_json::from_str(&body)
            .map_err(|e| OverlayError::parse(format!("Gemini response is not JSON: {}", e)))?;
        Ok(Self::parse_reply(&value))
    }

    fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }
}
