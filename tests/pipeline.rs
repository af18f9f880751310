//! Pipeline integration tests against a scripted in-process vision model.
//!
//! No network access: every test injects a [`ScriptedModel`] through
//! `AnalysisConfig::builder().client(..)`. Backoff timing tests run on a
//! paused tokio clock, so they finish instantly while still observing the
//! exact virtual delays between attempts.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage, Rgba, RgbaImage};
use image_insight::{
    AnalysisConfig, AnalysisConfigBuilder, AnalysisError, AnalysisProgressCallback, EncodedImage,
    GenerationOptions, ImageAnalyzer, ImageInput, ModelResponse, PipelineFailure, PipelineMode,
    ProviderError, Stage, ValidationError, VisionModel,
};
use std::collections::VecDeque;
use std::io::{Cursor, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_test::assert_ok;

// ── Test helpers ─────────────────────────────────────────────────────────────

const REPLY: &str = "Here is the result:\n```json\n{\"caption\":\"a cat\",\"summary\":\"...\",\"objects\":\"- cat\",\"mood\":\"calm\",\"story\":\"...\"}\n```";

const TINY_GIF_BASE64: &str = "R0lGODlhAQABAIAAAP///wAAACH5BAEAAAAALAAAAAABAAEAAAICRAEAOw==";

struct Call {
    at: Instant,
    prompt: String,
    size: (u32, u32),
    mime_type: &'static str,
}

/// Replays queued outcomes in order, then repeats `fallback`.
struct ScriptedModel {
    script: Mutex<VecDeque<Result<ModelResponse, ProviderError>>>,
    fallback: Result<ModelResponse, ProviderError>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedModel {
    fn new(
        script: impl IntoIterator<Item = Result<ModelResponse, ProviderError>>,
        fallback: Result<ModelResponse, ProviderError>,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn always(reply: &str) -> Arc<Self> {
        Self::new([], Ok(ModelResponse::Text(reply.to_string())))
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn gaps(&self) -> Vec<Duration> {
        let calls = self.calls.lock().unwrap();
        calls.windows(2).map(|w| w[1].at - w[0].at).collect()
    }
}

#[async_trait::async_trait]
impl VisionModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn analyze(
        &self,
        image: &EncodedImage,
        prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<ModelResponse, ProviderError> {
        self.calls.lock().unwrap().push(Call {
            at: Instant::now(),
            prompt: prompt.to_string(),
            size: (image.width, image.height),
            mime_type: image.mime_type,
        });
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

fn http_503() -> ProviderError {
    ProviderError::Status {
        status: 503,
        body: "overloaded".into(),
    }
}

fn analyzer(
    model: &Arc<ScriptedModel>,
    configure: impl FnOnce(AnalysisConfigBuilder) -> AnalysisConfigBuilder,
) -> ImageAnalyzer {
    let builder = AnalysisConfig::builder().client(Arc::clone(model) as Arc<dyn VisionModel>);
    let config = configure(builder).build().unwrap();
    ImageAnalyzer::new(config).unwrap()
}

fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
    buf
}

fn rgb_png(w: u32, h: u32) -> Vec<u8> {
    encode(
        DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 90])
        })),
        ImageFormat::Png,
    )
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("image_insight=debug")
        .try_init();
}

// ── Input formats and normalisation ──────────────────────────────────────────

#[tokio::test]
async fn every_supported_format_is_reported_as_rgb() {
    init_tracing();
    let inputs: Vec<(&str, Vec<u8>)> = vec![
        (
            "png rgba",
            encode(
                DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 6, Rgba([0, 0, 0, 0]))),
                ImageFormat::Png,
            ),
        ),
        (
            "jpeg",
            encode(DynamicImage::ImageRgb8(RgbImage::new(8, 6)), ImageFormat::Jpeg),
        ),
        (
            "webp",
            encode(
                DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 6, Rgba([1, 2, 3, 255]))),
                ImageFormat::WebP,
            ),
        ),
        (
            "grayscale png",
            encode(
                DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 6, Luma([40]))),
                ImageFormat::Png,
            ),
        ),
        ("gif", STANDARD.decode(TINY_GIF_BASE64).unwrap()),
    ];

    for (label, bytes) in inputs {
        let model = ScriptedModel::always(REPLY);
        let result = assert_ok!(analyzer(&model, |b| b).process_image(bytes).await);
        assert!(result.is_complete(), "[{label}] unexpected error {:?}", result.error);
        assert_eq!(result.metadata.image_mode, "RGB", "[{label}]");
        let expected = if label == "gif" { [1, 1] } else { [8, 6] };
        assert_eq!(result.metadata.image_size, expected, "[{label}]");
        assert_eq!(model.calls.lock().unwrap()[0].mime_type, "image/jpeg");
    }
}

#[tokio::test]
async fn oversized_dimensions_are_scaled_to_the_limit() {
    let model = ScriptedModel::always(REPLY);
    let result = analyzer(&model, |b| b.max_dimension(300))
        .process_image(rgb_png(1200, 400))
        .await
        .unwrap();

    assert_eq!(result.metadata.image_size, [300, 100]);
    assert_eq!(model.calls.lock().unwrap()[0].size, (300, 100));
}

#[tokio::test]
async fn rejected_inputs_never_reach_the_model() {
    let model = ScriptedModel::always(REPLY);
    let a = analyzer(&model, |b| b.max_image_bytes(64));

    let err = a.process_image(Vec::<u8>::new()).await.unwrap_err();
    assert!(matches!(err, AnalysisError::Validation(ValidationError::Empty)));

    let err = a.process_image(rgb_png(32, 32)).await.unwrap_err();
    assert!(
        matches!(err, AnalysisError::Validation(ValidationError::TooLarge { max: 64, .. })),
        "got {err:?}"
    );

    let err = a.process_image(&b"hello, not an image"[..]).await.unwrap_err();
    assert!(matches!(
        err,
        AnalysisError::Validation(ValidationError::UnsupportedFormat)
    ));

    let err = a.process_base64_image("!!!not base64!!!").await.unwrap_err();
    assert!(matches!(
        err,
        AnalysisError::Validation(ValidationError::InvalidBase64 { .. })
    ));

    assert_eq!(model.call_count(), 0);
}

#[tokio::test]
async fn data_uri_header_is_optional() {
    let b64 = STANDARD.encode(rgb_png(20, 10));
    let model = ScriptedModel::always(REPLY);
    let a = analyzer(&model, |b| b);

    let bare = a.process_base64_image(&b64).await.unwrap();
    let with_header = a
        .process_base64_image(&format!("data:image/png;base64,{b64}"))
        .await
        .unwrap();

    assert_eq!(bare, with_header);
    assert_eq!(bare.metadata.image_size, [20, 10]);
}

#[tokio::test]
async fn file_stream_is_rewound_after_reading() {
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(&rgb_png(16, 16)).unwrap();
    // Leave the cursor at the end, as a caller that just wrote would.
    let model = ScriptedModel::always(REPLY);

    let result = analyzer(&model, |b| b)
        .process_image(ImageInput::stream(&mut file))
        .await
        .unwrap();

    assert_eq!(result.metadata.image_size, [16, 16]);
    assert_eq!(file.stream_position().unwrap(), 0);
    assert!(file.seek(SeekFrom::End(0)).unwrap() > 0);
}

// ── Retry and backoff ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_with_doubling_backoff() {
    let model = ScriptedModel::new(
        [Err(http_503()), Err(http_503())],
        Ok(ModelResponse::Text(REPLY.to_string())),
    );

    let result = analyzer(&model, |b| b).process_image(rgb_png(4, 4)).await.unwrap();

    assert!(result.is_complete());
    assert_eq!(result.caption, "a cat");
    assert_eq!(model.call_count(), 3);
    assert_eq!(
        model.gaps(),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_yield_placeholder_record_with_metadata() {
    let model = ScriptedModel::new([], Err(http_503()));

    let result = analyzer(&model, |b| b).process_image(rgb_png(12, 8)).await.unwrap();

    assert_eq!(model.call_count(), 3);
    assert_eq!(result.caption, "Error analyzing image");
    assert_eq!(result.summary, "Could not generate summary due to an error.");
    assert_eq!(result.objects, "- Error");
    assert_eq!(result.mood, "Error");
    assert_eq!(result.story, "Error");
    assert_eq!(result.metadata.image_size, [12, 8]);
    assert!(matches!(
        result.failure,
        Some(PipelineFailure::Request { attempts: 3, .. })
    ));
    let err = result.error.as_deref().unwrap();
    assert!(err.contains("503"), "got {err}");

    let v = serde_json::to_value(&result).unwrap();
    assert!(v["error"].is_string());
}

#[tokio::test(start_paused = true)]
async fn single_attempt_does_not_sleep() {
    let model = ScriptedModel::new([], Err(http_503()));
    let started = Instant::now();
    let result = analyzer(&model, |b| b.max_retries(1))
        .process_image(rgb_png(4, 4))
        .await
        .unwrap();
    assert!(!result.is_complete());
    assert_eq!(model.call_count(), 1);
    assert!(started.elapsed() < Duration::from_millis(1));
}

// ── Consolidated parsing ─────────────────────────────────────────────────────

#[tokio::test]
async fn fenced_json_reply_fills_all_fields() {
    let model = ScriptedModel::always(REPLY);
    let result = analyzer(&model, |b| b).process_image(rgb_png(4, 4)).await.unwrap();

    assert_eq!(result.caption, "a cat");
    assert_eq!(result.summary, "...");
    assert_eq!(result.objects, "- cat");
    assert_eq!(result.mood, "calm");
    assert_eq!(result.story, "...");
    assert!(result.error.is_none());
    assert_eq!(model.call_count(), 1);

    let v = serde_json::to_value(&result).unwrap();
    assert!(v.get("error").is_none());
}

#[tokio::test]
async fn unparseable_reply_is_a_parse_failure() {
    let model = ScriptedModel::always("I'd rather not answer in JSON.");
    let result = analyzer(&model, |b| b).process_image(rgb_png(4, 4)).await.unwrap();

    assert_eq!(result.caption, "Error analyzing image");
    assert!(matches!(result.failure, Some(PipelineFailure::Parse { .. })));
    // Parse failures are not retried.
    assert_eq!(model.call_count(), 1);
}

#[tokio::test]
async fn blocked_reply_is_reported_in_the_error() {
    let model = ScriptedModel::new(
        [],
        Ok(ModelResponse::Blocked {
            reason: "content_filter".into(),
        }),
    );
    let result = analyzer(&model, |b| b).process_image(rgb_png(4, 4)).await.unwrap();

    let err = result.error.as_deref().unwrap();
    assert!(err.contains("[Response blocked: content_filter]"), "got {err}");
    assert_eq!(model.call_count(), 1);
}

// ── Staged mode ──────────────────────────────────────────────────────────────

fn staged_script() -> Vec<Result<ModelResponse, ProviderError>> {
    ["A cat on a sofa.", "A cat rests.", "- cat\n- sofa", "Calm.", "Once upon a time."]
        .into_iter()
        .map(|s| Ok(ModelResponse::Text(s.to_string())))
        .collect()
}

#[tokio::test]
async fn staged_mode_chains_prior_outputs_into_later_prompts() {
    let model = ScriptedModel::new(staged_script(), Err(http_503()));
    let result = analyzer(&model, |b| b.mode(PipelineMode::Staged))
        .process_image(rgb_png(4, 4))
        .await
        .unwrap();

    assert!(result.is_complete());
    assert_eq!(result.caption, "A cat on a sofa.");
    assert_eq!(result.objects, "- cat\n- sofa");
    assert_eq!(result.story, "Once upon a time.");

    let calls = model.calls.lock().unwrap();
    assert_eq!(calls.len(), 5);
    assert!(calls[1].prompt.contains("A cat on a sofa."));
    assert!(calls[3].prompt.contains("A cat rests."));
    assert!(calls[4].prompt.contains("- cat\n- sofa"));
    assert!(calls[4].prompt.contains("Calm."));
}

#[tokio::test(start_paused = true)]
async fn staged_blocked_and_empty_replies_are_kept_without_retry() {
    let mut script = staged_script();
    script[1] = Ok(ModelResponse::Blocked {
        reason: "content_filter".into(),
    });
    script[2] = Ok(ModelResponse::Empty);
    let model = ScriptedModel::new(script, Err(http_503()));

    let result = analyzer(&model, |b| b.mode(PipelineMode::Staged))
        .process_image(rgb_png(4, 4))
        .await
        .unwrap();

    assert_eq!(result.caption, "A cat on a sofa.");
    assert_eq!(result.summary, "[Response blocked: content_filter]");
    assert_eq!(result.objects, "[No response generated]");
    assert_eq!(result.mood, "Calm.");
    assert_eq!(result.story, "Once upon a time.");
    assert!(result.error.is_none(), "error: {:?}", result.error);
    assert_eq!(model.call_count(), 5);

    let calls = model.calls.lock().unwrap();
    assert!(calls[4].prompt.contains("[No response generated]"));
}

#[tokio::test(start_paused = true)]
async fn staged_failure_keeps_completed_fields() {
    let mut script = staged_script();
    script.truncate(3);
    let model = ScriptedModel::new(script, Err(http_503()));

    let result = analyzer(&model, |b| b.mode(PipelineMode::Staged))
        .process_image(rgb_png(10, 5))
        .await
        .unwrap();

    assert_eq!(result.caption, "A cat on a sofa.");
    assert_eq!(result.summary, "A cat rests.");
    assert_eq!(result.objects, "- cat\n- sofa");
    assert_eq!(result.mood, "");
    assert_eq!(result.story, "");
    assert_eq!(result.metadata.image_size, [10, 5]);
    // 3 successful stages + 3 attempts at the mood stage.
    assert_eq!(model.call_count(), 6);

    match result.failure {
        Some(PipelineFailure::Partial {
            failed_stage,
            ref completed,
            ..
        }) => {
            assert_eq!(failed_stage, Stage::Mood);
            assert_eq!(completed, &[Stage::Caption, Stage::Summary, Stage::Objects]);
        }
        ref other => panic!("expected partial failure, got {other:?}"),
    }
    assert!(result.error.as_deref().unwrap().contains("3 of 5"));
}

#[tokio::test(start_paused = true)]
async fn staged_failure_on_first_stage_leaves_everything_empty() {
    let model = ScriptedModel::new([], Err(http_503()));
    let result = analyzer(&model, |b| b.mode(PipelineMode::Staged))
        .process_image(rgb_png(4, 4))
        .await
        .unwrap();

    assert!(Stage::ALL.iter().all(|&s| result.field(s).is_empty()));
    assert!(matches!(
        result.failure,
        Some(PipelineFailure::Provider {
            stage: Stage::Caption,
            ..
        })
    ));
}

// ── Progress callbacks ───────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl AnalysisProgressCallback for Recorder {
    fn on_analysis_start(&self, total_stages: usize) {
        self.events.lock().unwrap().push(format!("start {total_stages}"));
    }
    fn on_stage_complete(&self, stage: Stage, index: usize, total: usize, _text_len: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("{stage} {index}/{total}"));
    }
    fn on_stage_error(&self, stage: Stage, _index: usize, _total: usize, _error: &str) {
        self.events.lock().unwrap().push(format!("{stage} failed"));
    }
    fn on_analysis_complete(&self, total_stages: usize, completed: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("done {completed}/{total_stages}"));
    }
}

#[tokio::test(start_paused = true)]
async fn progress_events_follow_the_stages() {
    let recorder = Arc::new(Recorder::default());
    let mut script = staged_script();
    script.truncate(2);
    let model = ScriptedModel::new(script, Err(http_503()));

    let cb = Arc::clone(&recorder);
    analyzer(&model, move |b| {
        b.mode(PipelineMode::Staged)
            .progress_callback(cb as Arc<dyn AnalysisProgressCallback>)
    })
    .process_image(rgb_png(4, 4))
    .await
    .unwrap();

    assert_eq!(
        *recorder.events.lock().unwrap(),
        vec![
            "start 5",
            "caption 1/5",
            "summary 2/5",
            "objects failed",
            "done 2/5"
        ]
    );
}
