use super::*;
use crate::builder::QuestionType;
use crate::embeddings::{EmbeddingError, HashingEmbedder};
use crate::generation::CompletionError;
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;

/// Answers every prompt with the same text
struct StubModel {
    reply: Result<String, CompletionError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StubModel {
    fn replying(text: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(text.into()),
            delay: None,
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(error: CompletionError) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(error),
            delay: None,
            calls: AtomicUsize::new(0),
        })
    }

    fn slow(text: impl Into<String>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(text.into()),
            delay: Some(delay),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn complete(&self, _prompt: &str, _timeout: Duration) -> Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.reply.clone()
    }
}

/// Counts how many texts reach the wrapped embedder
struct CountingEmbedder {
    inner: HashingEmbedder,
    embedded: AtomicUsize,
}

impl Embedder for CountingEmbedder {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.embedded.fetch_add(texts.len(), Ordering::SeqCst);
        self.inner.embed(texts)
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.chunking.chunk_size = 200;
    config.chunking.overlap = 20;
    config.generation.timeout_seconds = 5;
    config.generation.backoff_base_ms = 1;
    config
}

fn sources() -> Vec<Source> {
    vec![
        Source::Bytes {
            name: "volcanoes.txt".to_string(),
            content: "Volcanoes form where magma reaches the surface. Most volcanoes sit on plate \
                      boundaries. Shield volcanoes have gentle slopes built from fluid lava flows. \
                      Stratovolcanoes are steep and erupt explosively."
                .as_bytes()
                .to_vec(),
        },
        Source::Bytes {
            name: "rocks.md".to_string(),
            content: b"# Rocks\n\nIgneous rock forms when magma or lava cools and hardens.".to_vec(),
        },
    ]
}

fn quiz_reply(count: usize) -> String {
    let questions: Vec<_> = (1..=count)
        .map(|n| {
            json!({
                "prompt": format!("Volcano question {n}?"),
                "choices": ["Magma", "Ice", "Sand"],
                "correct_answer": "Magma",
                "explanation": "Volcanoes erupt molten rock."
            })
        })
        .collect();
    json!({ "questions": questions }).to_string()
}

fn quiz(count: usize) -> TaskParams {
    TaskParams::new("quiz", count, "easy", "volcanoes").expect("valid parameters")
}

fn pipeline(model: Arc<StubModel>) -> Pipeline {
    Pipeline::new(&test_config(), Arc::new(HashingEmbedder::new(64)), model)
}

#[tokio::test]
async fn produces_a_quiz() {
    let model = StubModel::replying(quiz_reply(3));
    let pipeline = pipeline(Arc::clone(&model));

    let artifact = pipeline.run(&sources(), &quiz(3)).await.expect("run should succeed");

    let Artifact::Quiz(quiz) = artifact else {
        panic!("expected a quiz");
    };
    assert_eq!(quiz.questions.len(), 3);
    assert_eq!(quiz.subject, "volcanoes");
    assert_eq!(model.calls(), 1);
    assert!(!pipeline.cache().is_empty());
}

#[tokio::test]
async fn produces_a_worksheet() {
    let reply = json!({"items": [
        {"question_type": "true_false", "prompt": "All volcanoes are extinct.", "answer": "false"},
        {"question_type": "fill_in_the_blank", "prompt": "Molten rock underground is called ___.", "answer": "magma"}
    ]})
    .to_string();
    let pipeline = pipeline(StubModel::replying(reply));
    let params = TaskParams::new("worksheet", 2, "medium", "volcanoes").expect("valid parameters");

    let artifact = pipeline.run(&sources(), &params).await.expect("run should succeed");

    let Artifact::Worksheet(worksheet) = artifact else {
        panic!("expected a worksheet");
    };
    assert_eq!(worksheet.item_count(), 2);
    assert_eq!(worksheet.sections[0].question_type, QuestionType::TrueFalse);
}

#[tokio::test]
async fn failures_name_their_stage() {
    let pipeline = pipeline(StubModel::replying(quiz_reply(3)));

    let err = pipeline.run(&[], &quiz(3)).await.expect_err("no sources");
    assert_eq!(err.stage, Stage::Load);
    assert_eq!(err.class(), ErrorClass::Input);

    let blank = vec![Source::Bytes {
        name: "blank.txt".to_string(),
        content: b"   \n\n ".to_vec(),
    }];
    let err = pipeline.run(&blank, &quiz(3)).await.expect_err("empty document");
    assert_eq!(err.stage, Stage::Load);

    let err = pipeline.run(&sources(), &quiz(11)).await.expect_err("too many items");
    assert_eq!(err.stage, Stage::Prompt);
    assert_eq!(err.class(), ErrorClass::Input);

    let err = pipeline.run(&sources(), &quiz(5)).await.expect_err("only three items returned");
    assert_eq!(err.stage, Stage::Build);
    assert_eq!(err.class(), ErrorClass::Semantic);
}

#[tokio::test]
async fn bad_chunking_parameters_fail_in_chunk_stage() {
    let mut config = test_config();
    config.chunking.overlap = config.chunking.chunk_size;
    let pipeline = Pipeline::new(
        &config,
        Arc::new(HashingEmbedder::new(64)),
        StubModel::replying(quiz_reply(1)),
    );

    let err = pipeline.run(&sources(), &quiz(1)).await.expect_err("overlap too large");

    assert_eq!(err.stage, Stage::Chunk);
    assert_eq!(err.class(), ErrorClass::Input);
}

#[tokio::test]
async fn garbage_output_fails_in_build_stage() {
    let pipeline = pipeline(StubModel::replying("Volcanoes are fascinating!"));

    let err = pipeline.run(&sources(), &quiz(1)).await.expect_err("not json");

    assert_eq!(err.stage, Stage::Build);
    assert!(err.to_string().starts_with("build stage failed"));
}

#[tokio::test]
async fn refusal_fails_in_generate_stage() {
    let model = StubModel::failing(CompletionError::Refusal("content policy".to_string()));
    let pipeline = pipeline(Arc::clone(&model));

    let err = pipeline.run(&sources(), &quiz(1)).await.expect_err("refused");

    assert_eq!(err.stage, Stage::Generate);
    assert_eq!(err.class(), ErrorClass::Semantic);
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn concurrent_runs_share_the_cache() {
    let embedder = Arc::new(CountingEmbedder {
        inner: HashingEmbedder::new(64),
        embedded: AtomicUsize::new(0),
    });
    let pipeline = Arc::new(Pipeline::new(
        &test_config(),
        Arc::clone(&embedder) as Arc<dyn Embedder>,
        StubModel::replying(quiz_reply(2)),
    ));

    let first = tokio::spawn({
        let pipeline = Arc::clone(&pipeline);
        async move { pipeline.run(&sources(), &quiz(2)).await }
    });
    let second = tokio::spawn({
        let pipeline = Arc::clone(&pipeline);
        async move { pipeline.run(&sources(), &quiz(2)).await }
    });

    for handle in [first, second] {
        let artifact = handle.await.expect("task should not panic").expect("run should succeed");
        assert_eq!(artifact.item_count(), 2);
    }

    let cached = pipeline.cache().len();
    let after_concurrent = embedder.embedded.load(Ordering::SeqCst);

    pipeline.run(&sources(), &quiz(2)).await.expect("run should succeed");

    assert_eq!(pipeline.cache().len(), cached);
    // Only the query is embedded on a warm cache
    assert_eq!(embedder.embedded.load(Ordering::SeqCst), after_concurrent + 1);
}

#[tokio::test]
async fn cancellation_reports_the_running_stage() {
    let model = StubModel::slow(quiz_reply(1), Duration::from_secs(30));
    let pipeline = pipeline(Arc::clone(&model));

    let err = pipeline
        .run_with_cancel(&sources(), &quiz(1), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
        })
        .await
        .expect_err("cancelled");

    assert!(err.is_cancelled());
    assert_eq!(err.stage, Stage::Generate);
    assert_eq!(err.class(), ErrorClass::Transient);
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn uncancelled_run_completes() {
    let pipeline = pipeline(StubModel::replying(quiz_reply(1)));

    let artifact = pipeline
        .run_with_cancel(&sources(), &quiz(1), std::future::pending())
        .await
        .expect("run should succeed");

    assert_eq!(artifact.item_count(), 1);
}

#[test]
fn stages_round_trip_through_u8() {
    for stage in Stage::ALL {
        assert_eq!(Stage::from_u8(stage.as_u8()), stage);
    }
    assert_eq!(Stage::Generate.to_string(), "generate");
}

#[test]
fn pipeline_is_shareable() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Pipeline>();
    assert_send_sync::<PipelineError>();
}
