//! Runs one generation request end to end: locate, resolve placement,
//! synthesize, clean up transparency. The buffered and streaming entry points
//! share `run` and differ only in the `Progress` they hand it.

use crate::{
    config::GeminiConfig,
    error::{OverlayError, Result},
    gemini::{GeminiClient, Transport},
    geometry,
    logger::{self, LogEntry, LogLevel},
    models::{
        Anchor, CleanedOverlay, ErrorBody, GenerateRequest, ImageSize, InlineImage,
        OverlayPayload, OverlayResponse, StreamRecord,
    },
    stages::{png_size, run_stage, LocateInput, LocateStage, SynthesisInput, SynthesisStage},
    transparency::{self, TransparencyParams},
};
use async_trait::async_trait;
use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

const LOW_CONFIDENCE: f64 = 0.4;
const STREAM_BUFFER: usize = 32;
const LOW_CONFIDENCE_WARNING: &str =
    "Placement confidence is low; adjust the position manually or describe it more specifically.";
const CLEANUP_WARNING: &str =
    "The generated overlay had an opaque background that was removed automatically; check the edges.";

/// Receives every progress line as it is produced.
#[async_trait]
pub trait Progress: Send + Sync {
    async fn on_log(&self, line: &str);

    /// Checked between stages; a running upstream call is never interrupted.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Progress sink for the buffered mode.
pub struct Silent;

#[async_trait]
impl Progress for Silent {
    async fn on_log(&self, _line: &str) {}
}

struct ChannelProgress {
    tx: mpsc::Sender<StreamRecord>,
}

#[async_trait]
impl Progress for ChannelProgress {
    async fn on_log(&self, line: &str) {
        let _ = self
            .tx
            .send(StreamRecord::Log {
                message: line.to_string(),
            })
            .await;
    }

    fn is_cancelled(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A request that passed local validation.
#[derive(Debug, Clone)]
pub struct ValidRequest {
    pub image: InlineImage,
    pub instruction: String,
    pub image_size: ImageSize,
    pub anchor: Option<Anchor>,
}

impl ValidRequest {
    pub fn without_anchor(self) -> Self {
        Self {
            anchor: None,
            ..self
        }
    }
}

/// A failed run: the error plus every log line produced before it.
#[derive(Debug)]
pub struct Failure {
    pub error: OverlayError,
    pub logs: Vec<String>,
}

impl Failure {
    pub fn local(error: OverlayError) -> Self {
        Self {
            error,
            logs: Vec::new(),
        }
    }

    pub fn status(&self) -> u16 {
        self.error.kind().status()
    }

    pub fn into_body(self) -> ErrorBody {
        ErrorBody {
            error: self.error.user_message(),
            logs: self.logs,
        }
    }

    pub fn into_record(self) -> StreamRecord {
        let body = self.into_body();
        StreamRecord::Error {
            error: body.error,
            logs: body.logs,
        }
    }
}

struct RunLog<'a> {
    lines: Vec<String>,
    progress: &'a dyn Progress,
}

impl<'a> RunLog<'a> {
    fn new(progress: &'a dyn Progress) -> Self {
        Self {
            lines: Vec::new(),
            progress,
        }
    }

    async fn push(&mut self, message: impl AsRef<str>) {
        let line = format!("[{}] {}", Local::now().format("%H:%M:%S"), message.as_ref());
        self.progress.on_log(&line).await;
        self.lines.push(line);
    }
}

#[track_caller]
fn run_entry(level: LogLevel, request_id: Uuid, message: impl Into<String>) -> LogEntry {
    LogEntry::here(level, message, module_path!()).with_request_id(request_id)
}

pub struct Orchestrator {
    transport: Arc<dyn Transport>,
    locate: LocateStage,
    synthesis: SynthesisStage,
    transparency: TransparencyParams,
    budget: Option<Duration>,
}

impl Orchestrator {
    pub fn new(transport: Arc<dyn Transport>, config: &GeminiConfig) -> Self {
        Self {
            transport,
            locate: LocateStage::new(config.json_model()),
            synthesis: SynthesisStage::new(config.image_model()),
            transparency: TransparencyParams::default(),
            budget: None,
        }
    }

    pub fn from_config(config: &GeminiConfig) -> Self {
        Self::new(Arc::new(GeminiClient::new(config)), config)
    }

    pub fn with_transparency(mut self, params: TransparencyParams) -> Self {
        self.transparency = params;
        self
    }

    /// Wall-clock limit for a whole run, set by the hosting layer.
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn validate(&self, request: &GenerateRequest) -> Result<ValidRequest> {
        let image = request
            .image
            .as_deref()
            .filter(|image| !image.is_empty())
            .ok_or_else(|| OverlayError::invalid_input("Please upload an image first"))?;

        let instruction = request
            .prompt
            .as_deref()
            .filter(|prompt| !prompt.trim().is_empty())
            .ok_or_else(|| OverlayError::invalid_input("Please enter an edit instruction"))?;

        if !self.transport.has_credential() {
            return Err(OverlayError::config(
                "GEMINI_API_KEY is not configured on the server",
            ));
        }

        Ok(ValidRequest {
            image: InlineImage::from_data_url_or_base64(image),
            instruction: instruction.to_string(),
            image_size: request.resolved_image_size(),
            anchor: request.resolved_anchor(),
        })
    }

    /// Buffered mode: one response after the whole pipeline finished.
    pub async fn generate(&self, request: &GenerateRequest) -> std::result::Result<OverlayResponse, Failure> {
        let valid = self.validate(request).map_err(Failure::local)?;
        self.run(&valid, &Silent).await
    }

    /// Streaming mode: log records as stages progress, then exactly one
    /// terminal record. Anchors are not used here.
    pub fn generate_stream(self: Arc<Self>, request: ValidRequest) -> ReceiverStream<StreamRecord> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let request = request.without_anchor();

        tokio::spawn(async move {
            let progress = ChannelProgress { tx: tx.clone() };
            let terminal = match self.run(&request, &progress).await {
                Ok(response) => StreamRecord::Result {
                    data: response.payload,
                },
                Err(failure) => failure.into_record(),
            };
            if tx.send(terminal).await.is_err() {
                log::warn!("Stream consumer went away before the terminal record");
            }
        });

        ReceiverStream::new(rx)
    }

    pub async fn run(
        &self,
        request: &ValidRequest,
        progress: &dyn Progress,
    ) -> std::result::Result<OverlayResponse, Failure> {
        let request_id = Uuid::new_v4();
        let mut run_log = RunLog::new(progress);
        logger::write_entry(run_entry(LogLevel::Info, request_id, "Generation started"));

        let outcome = match self.budget {
            Some(budget) => tokio::time::timeout(budget, self.execute(request, &mut run_log))
                .await
                .unwrap_or(Err(OverlayError::Timeout)),
            None => self.execute(request, &mut run_log).await,
        };

        match outcome {
            Ok(response) => {
                logger::write_entry(run_entry(LogLevel::Info, request_id, "Generation finished"));
                Ok(response)
            }
            Err(error) => {
                logger::write_entry(run_entry(
                    LogLevel::Error,
                    request_id,
                    format!("Generation failed: {}", error),
                ));
                run_log.push(format!("Server error: {}", error)).await;
                Err(Failure {
                    error,
                    logs: run_log.lines,
                })
            }
        }
    }

    async fn execute(&self, request: &ValidRequest, run_log: &mut RunLog<'_>) -> Result<OverlayResponse> {
        let size = request.image_size;
        run_log.push("Request received: starting pipeline").await;
        run_log.push(format!("Instruction: {}", request.instruction)).await;
        run_log.push(format!("Base image size: {}x{}", size.w, size.h)).await;

        self.ensure_live(run_log.progress, "locate")?;
        run_log.push(format!(
            "Stage 1/2: locating and writing the overlay spec ({})",
            self.locate.model()
        ))
        .await;
        let locate_input = LocateInput {
            image: request.image.clone(),
            instruction: request.instruction.clone(),
            image_size: size,
            anchor: request.anchor,
        };
        let spec = run_stage(&self.locate, self.transport.as_ref(), &locate_input).await?;

        let placement = geometry::resolve(&spec.placement, size);
        run_log.push(format!(
            "Suggested placement: x={}, y={}, {}x{}, r={}°",
            placement.x.round(),
            placement.y.round(),
            placement.width.round(),
            placement.height.round(),
            placement.rotation.round()
        ))
        .await;

        self.ensure_live(run_log.progress, "synthesis")?;
        run_log.push(format!(
            "Stage 2/2: generating the transparent overlay ({})",
            self.synthesis.model()
        ))
        .await;
        let synthesis_input = SynthesisInput {
            overlay_brief: spec.overlay_brief.clone(),
            style_notes: spec.style_notes.clone(),
            negative_constraints: spec.negative_constraints.clone(),
            target_width: placement.width,
            target_height: placement.height,
        };
        let synthesized =
            run_stage(&self.synthesis, self.transport.as_ref(), &synthesis_input).await?;

        self.ensure_live(run_log.progress, "transparency cleanup")?;
        let params = self.transparency.clone();
        let raw = synthesized.image.clone();
        let overlay = tokio::task::spawn_blocking(move || clean_overlay(raw, &params))
            .await
            .unwrap_or_else(|e| {
                log::warn!("Transparency cleanup task failed: {}", e);
                CleanedOverlay {
                    image: synthesized.image.clone(),
                    size: synthesized.size,
                    background: None,
                }
            });

        let mut warnings = Vec::new();
        if spec.confidence < LOW_CONFIDENCE {
            warnings.push(LOW_CONFIDENCE_WARNING.to_string());
        }
        if let Some(background) = overlay.background {
            warnings.push(CLEANUP_WARNING.to_string());
            run_log.push(format!(
                "Transparency cleanup: removed {:?} background",
                background
            ))
            .await;
        }
        run_log.push(format!("Overlay ready (confidence {:.2})", spec.confidence))
            .await;

        Ok(OverlayResponse {
            payload: OverlayPayload {
                overlay_png_base64: overlay.image.to_data_url(),
                overlay_size: overlay.size.or(synthesized.size),
                placement,
                confidence: spec.confidence,
                warnings,
                logs: run_log.lines.clone(),
            },
            why: spec.why,
            assumptions: spec.assumptions,
        })
    }

    fn ensure_live(&self, progress: &dyn Progress, next: &str) -> Result<()> {
        if progress.is_cancelled() {
            log::warn!("Caller disconnected, stopping before {}", next);
            return Err(OverlayError::Cancelled(next.to_string()));
        }
        Ok(())
    }
}

/// Knocks out an opaque background if there is one. Never fails.
pub fn clean_overlay(image: InlineImage, params: &TransparencyParams) -> CleanedOverlay {
    let Some(bytes) = image.decode() else {
        return CleanedOverlay {
            size: png_size(&image),
            image,
            background: None,
        };
    };

    let cleanup = transparency::ensure_transparent_with(&bytes, params);
    if !cleanup.applied {
        return CleanedOverlay {
            size: png_size(&image),
            image,
            background: None,
        };
    }

    let cleaned = InlineImage::from_bytes("image/png", &cleanup.bytes);
    CleanedOverlay {
        size: png_size(&cleaned),
        image: cleaned,
        background: cleanup.background,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::stub::{locate_json, opaque_overlay, transparent_overlay, StubTransport};
    use crate::gemini::UpstreamReply;
    use crate::transparency::BackgroundKind;
    use futures::StreamExt;
    use serde_json::json;

    fn orchestrator(transport: StubTransport) -> (Arc<StubTransport>, Orchestrator) {
        let transport = Arc::new(transport);
        let config = GeminiConfig::new()
            .with_api_key("test")
            .with_models("json-model", "image-model");
        let orchestrator = Orchestrator::new(transport.clone(), &config);
        (transport, orchestrator)
    }

    fn happy_replies(confidence: f64) -> Vec<Result<UpstreamReply>> {
        vec![
            Ok(UpstreamReply::text(locate_json("a green top hat", confidence))),
            Ok(UpstreamReply::image(transparent_overlay(30, 20))),
        ]
    }

    fn request() -> GenerateRequest {
        GenerateRequest::new("data:image/jpeg;base64,AAAA", "put a hat on the dog")
            .with_image_size(ImageSize::new(400, 300))
    }

    #[tokio::test]
    async fn buffered_success_assembles_result() {
        let (transport, orchestrator) = orchestrator(StubTransport::new(happy_replies(0.9)));
        let response = orchestrator.generate(&request()).await.unwrap();

        let payload = &response.payload;
        assert_eq!(payload.placement.x, 40.0);
        assert_eq!(payload.placement.width, 120.0);
        assert_eq!(payload.overlay_size, Some(ImageSize::new(30, 20)));
        assert!(payload.overlay_png_base64.starts_with("data:image/png;base64,"));
        assert!(payload.warnings.is_empty());
        assert_eq!(response.why, "subject is centered");
        assert!(payload.logs.iter().all(|line| line.starts_with('[')));
        assert!(payload.logs.iter().any(|line| line.contains("Stage 2/2")));

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].model, "json-model");
        assert_eq!(requests[0].image.as_ref().unwrap().mime_type, "image/jpeg");
        assert_eq!(requests[1].model, "image-model");
        assert!(requests[1].instruction.contains("a green top hat"));
        assert!(requests[1].instruction.contains("120x60 px"));
    }

    #[tokio::test]
    async fn low_confidence_adds_warning() {
        let (_, orchestrator) = orchestrator(StubTransport::new(happy_replies(0.2)));
        let response = orchestrator.generate(&request()).await.unwrap();
        assert_eq!(response.payload.warnings, vec![LOW_CONFIDENCE_WARNING.to_string()]);
    }

    #[tokio::test]
    async fn confidence_is_clamped_from_any_upstream_shape() {
        for (raw, expected) in [(json!(3), 1.0), (json!("-1"), 0.0), (json!("n/a"), 0.5)] {
            let body = json!({"overlay_brief": "hat", "confidence": raw}).to_string();
            let transport = StubTransport::new(vec![
                Ok(UpstreamReply::text(body)),
                Ok(UpstreamReply::image(transparent_overlay(4, 4))),
            ]);
            let (_, orchestrator) = orchestrator(transport);
            let response = orchestrator.generate(&request()).await.unwrap();
            assert_eq!(response.payload.confidence, expected);
        }
    }

    #[tokio::test]
    async fn opaque_overlay_is_cleaned_and_flagged() {
        let transport = StubTransport::new(vec![
            Ok(UpstreamReply::text(locate_json("red square", 0.8))),
            Ok(UpstreamReply::image(opaque_overlay(40))),
        ]);
        let (_, orchestrator) = orchestrator(transport);
        let response = orchestrator.generate(&request()).await.unwrap();
        assert_eq!(response.payload.warnings, vec![CLEANUP_WARNING.to_string()]);
        assert!(response
            .payload
            .logs
            .iter()
            .any(|line| line.contains("Transparency cleanup")));
    }

    #[test]
    fn clean_overlay_reports_background_kind() {
        let cleaned = clean_overlay(opaque_overlay(40), &TransparencyParams::default());
        assert_eq!(cleaned.background, Some(BackgroundKind::Solid));
        assert_eq!(cleaned.size, Some(ImageSize::new(40, 40)));

        let untouched = InlineImage::new("image/png", "not base64 at all!");
        let result = clean_overlay(untouched.clone(), &TransparencyParams::default());
        assert_eq!(result.image, untouched);
        assert!(!result.cleaned());
    }

    #[tokio::test]
    async fn validation_order_and_statuses() {
        let (transport, orchestrator) = orchestrator(StubTransport::new(vec![]));

        let failure = orchestrator
            .generate(&GenerateRequest::default())
            .await
            .unwrap_err();
        assert_eq!(failure.status(), 400);
        assert!(failure.logs.is_empty());

        let failure = orchestrator
            .generate(&GenerateRequest::new("AAAA", "   "))
            .await
            .unwrap_err();
        assert_eq!(failure.status(), 400);
        assert_eq!(failure.into_body().error, "Please enter an edit instruction");

        let (_, no_key) = orchestrator_without_key();
        let failure = no_key.generate(&request()).await.unwrap_err();
        assert_eq!(failure.status(), 500);

        assert!(transport.requests().is_empty());
    }

    fn orchestrator_without_key() -> (Arc<StubTransport>, Orchestrator) {
        let transport = Arc::new(StubTransport::without_credential());
        let orchestrator = Orchestrator::new(transport.clone(), &GeminiConfig::new());
        (transport, orchestrator)
    }

    #[tokio::test]
    async fn upstream_failures_are_classified() {
        let cases = [
            (401, "API key expired", 401),
            (429, "RESOURCE_EXHAUSTED", 429),
            (404, "models/nope is not found", 400),
            (503, "overloaded", 500),
        ];
        for (status, message, expected) in cases {
            let transport = StubTransport::new(vec![Err(OverlayError::UpstreamError {
                status,
                message: message.into(),
            })]);
            let (_, orchestrator) = orchestrator(transport);
            let failure = orchestrator.generate(&request()).await.unwrap_err();
            assert_eq!(failure.status(), expected, "{}", message);
            assert!(failure.logs.last().unwrap().contains("Server error"));
        }
    }

    #[test]
    fn run_entries_carry_the_request_id() {
        let id = Uuid::new_v4();
        let entry = run_entry(LogLevel::Error, id, "Generation failed: boom");
        assert_eq!(entry.request_id, Some(id.to_string()));
        assert_eq!(entry.module, "roverlay::pipeline");
        assert_eq!(entry.level, LogLevel::Error);
    }

    #[tokio::test]
    async fn network_failure_does_not_expose_api_key() {
        let config = GeminiConfig::new()
            .with_api_key("SECRET-KEY-123")
            .with_base_url("http://127.0.0.1:9/v1beta");
        let orchestrator = Orchestrator::from_config(&config);

        let failure = orchestrator.generate(&request()).await.unwrap_err();
        assert_eq!(failure.status(), 500);
        let body = failure.into_body();
        assert!(!body.error.contains("SECRET-KEY-123"), "{}", body.error);
        assert!(body.logs.iter().all(|line| !line.contains("SECRET-KEY-123")));
        assert!(body.logs.last().unwrap().contains("Server error"));
    }

    #[tokio::test]
    async fn missing_brief_is_a_generic_failure() {
        let transport = StubTransport::new(vec![Ok(UpstreamReply::text(
            json!({"placement": {"x": 1}}).to_string(),
        ))]);
        let (transport, orchestrator) = orchestrator(transport);
        let failure = orchestrator.generate(&request()).await.unwrap_err();
        assert_eq!(failure.status(), 500);
        assert!(matches!(failure.error, OverlayError::NoOverlayBrief));
        // synthesis never ran
        assert_eq!(transport.requests().len(), 1);
    }

    async fn collect(orchestrator: Orchestrator) -> Vec<StreamRecord> {
        let orchestrator = Arc::new(orchestrator);
        let valid = orchestrator
            .validate(&request().with_anchor(Anchor { x: 10.0, y: 10.0 }))
            .unwrap();
        orchestrator.generate_stream(valid).collect().await
    }

    fn assert_single_terminal(records: &[StreamRecord]) {
        let terminals = records.iter().filter(|r| r.is_terminal()).count();
        assert_eq!(terminals, 1);
        assert!(records.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn stream_ends_with_one_result() {
        let (transport, orchestrator) = orchestrator(StubTransport::new(happy_replies(0.7)));
        let records = collect(orchestrator).await;
        assert_single_terminal(&records);

        let logs: Vec<&String> = records
            .iter()
            .filter_map(|r| match r {
                StreamRecord::Log { message } => Some(message),
                _ => None,
            })
            .collect();
        assert!(logs.len() >= 5);
        match records.last().unwrap() {
            StreamRecord::Result { data } => {
                assert_eq!(data.logs.len(), logs.len());
                assert_eq!(data.confidence, 0.7);
            }
            other => panic!("unexpected terminal record {:?}", other),
        }
        assert!(!transport.requests()[0].instruction.contains("anchor="));
    }

    #[tokio::test]
    async fn stream_ends_with_one_error() {
        let transport = StubTransport::new(vec![
            Ok(UpstreamReply::text(locate_json("hat", 0.9))),
            Ok(UpstreamReply::text("no image today")),
        ]);
        let (_, orchestrator) = orchestrator(transport);
        let records = collect(orchestrator).await;
        assert_single_terminal(&records);
        match records.last().unwrap() {
            StreamRecord::Error { error, logs } => {
                assert!(error.starts_with("Generation failed"));
                assert!(logs.last().unwrap().contains("Server error"));
            }
            other => panic!("unexpected terminal record {:?}", other),
        }
    }

    #[tokio::test]
    async fn budget_overrun_times_out() {
        struct Slow;

        #[async_trait]
        impl Transport for Slow {
            async fn call(
                &self,
                _request: crate::gemini::UpstreamRequest,
            ) -> Result<UpstreamReply> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(UpstreamReply::default())
            }
        }

        let orchestrator = Orchestrator::new(Arc::new(Slow), &GeminiConfig::new())
            .with_budget(Duration::from_millis(20));
        let failure = orchestrator.generate(&request()).await.unwrap_err();
        assert!(matches!(failure.error, OverlayError::Timeout));
        assert_eq!(failure.status(), 500);
        assert_eq!(failure.into_body().error, "request timed out");
    }

    #[tokio::test]
    async fn closed_consumer_stops_between_stages() {
        struct Gone;

        #[async_trait]
        impl Progress for Gone {
            async fn on_log(&self, _line: &str) {}

            fn is_cancelled(&self) -> bool {
                true
            }
        }

        let (transport, orchestrator) = orchestrator(StubTransport::new(happy_replies(0.9)));
        let valid = orchestrator.validate(&request()).unwrap();
        let failure = orchestrator.run(&valid, &Gone).await.unwrap_err();
        assert!(matches!(failure.error, OverlayError::Cancelled(_)));
        assert!(transport.requests().is_empty());
    }
}
