use super::*;
use crate::chunking::{ChunkingConfig, chunk_documents};
use crate::embeddings::HashingEmbedder;
use crate::models::Document;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts occurrences of three marker words
#[derive(Debug, Default)]
struct KeywordEmbedder {
    calls: AtomicUsize,
    embedded: Mutex<Vec<String>>,
}

impl Embedder for KeywordEmbedder {
    fn name(&self) -> &str {
        "keyword"
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.embedded
            .lock()
            .expect("lock should not be poisoned")
            .extend(texts.iter().cloned());
        Ok(texts
            .iter()
            .map(|text| {
                ["alpha", "beta", "gamma"]
                    .iter()
                    .map(|word| text.matches(word).count() as f32)
                    .collect()
            })
            .collect())
    }
}

struct BrokenEmbedder;

impl Embedder for BrokenEmbedder {
    fn name(&self) -> &str {
        "broken"
    }

    fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(Vec::new())
    }
}

fn chunk(document: &str, position: usize, text: &str) -> Chunk {
    let mut metadata = Metadata::new();
    metadata.insert("source".to_string(), document.to_string());
    Chunk {
        id: format!("{document}-{position}"),
        document_id: document.to_string(),
        text: text.to_string(),
        position,
        metadata,
        embedding: None,
    }
}

fn indexer(embedder: Arc<dyn Embedder>) -> Indexer {
    Indexer::new(embedder, Arc::new(EmbeddingCache::new()))
}

#[test]
fn returns_every_chunk_when_k_exceeds_count() {
    let chunks = vec![
        chunk("doc-a", 0, "beta"),
        chunk("doc-a", 1, "alpha alpha"),
        chunk("doc-a", 2, "gamma"),
    ];
    let index = indexer(Arc::new(KeywordEmbedder::default()))
        .index(chunks)
        .expect("indexing should succeed");

    let context = retrieve(&RetrievalQuery::new("alpha beta", 10), &index).expect("retrieve");

    assert_eq!(context.len(), 3);
    let scores: Vec<f32> = context.iter().map(|s| s.score).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    let mut ids: Vec<&str> = context.iter().map(|s| s.chunk.id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 3);
    assert_eq!(context.chunks()[2].chunk.id, "doc-a-2");
}

#[test]
fn single_chunk_index_returns_that_chunk() {
    let index = indexer(Arc::new(HashingEmbedder::new(64)))
        .index(vec![chunk("doc-a", 0, "Cells divide by mitosis.")])
        .expect("indexing should succeed");

    let context = retrieve(&RetrievalQuery::new("mitosis", 2), &index).expect("retrieve");

    assert_eq!(context.len(), 1);
    assert_eq!(context.chunks()[0].chunk.id, "doc-a-0");
}

#[test]
fn ties_break_by_position_then_document_order() {
    let chunks = vec![
        chunk("doc-a", 1, "alpha"),
        chunk("doc-b", 0, "alpha"),
        chunk("doc-a", 0, "alpha"),
        chunk("doc-c", 0, "alpha"),
    ];
    let index = indexer(Arc::new(KeywordEmbedder::default()))
        .index(chunks)
        .expect("indexing should succeed");

    let context = retrieve(&RetrievalQuery::new("alpha", 4), &index).expect("retrieve");
    let ids: Vec<&str> = context.iter().map(|s| s.chunk.id.as_str()).collect();

    assert_eq!(ids, vec!["doc-b-0", "doc-a-0", "doc-c-0", "doc-a-1"]);
}

#[test]
fn top_k_truncates() {
    let chunks = vec![
        chunk("doc-a", 0, "gamma"),
        chunk("doc-a", 1, "alpha"),
        chunk("doc-a", 2, "alpha beta"),
    ];
    let index = indexer(Arc::new(KeywordEmbedder::default()))
        .index(chunks)
        .expect("indexing should succeed");

    let context = retrieve(&RetrievalQuery::new("alpha", 1), &index).expect("retrieve");

    assert_eq!(context.len(), 1);
    assert_eq!(context.chunks()[0].chunk.id, "doc-a-1");
    assert!((context.chunks()[0].score - 1.0).abs() < 1e-6);
}

#[test]
fn filters_match_metadata_exactly() {
    let chunks = vec![chunk("doc-a", 0, "alpha"), chunk("doc-b", 0, "alpha beta")];
    let index = indexer(Arc::new(KeywordEmbedder::default()))
        .index(chunks)
        .expect("indexing should succeed");

    let query = RetrievalQuery::new("alpha", 5).with_filter("source", "doc-b");
    let context = retrieve(&query, &index).expect("retrieve");

    assert_eq!(context.len(), 1);
    assert_eq!(context.chunks()[0].chunk.document_id, "doc-b");
}

#[test]
fn empty_index_is_an_error() {
    let index = indexer(Arc::new(HashingEmbedder::new(32)))
        .index(Vec::new())
        .expect("indexing nothing succeeds");

    let err = retrieve(&RetrievalQuery::new("anything", 3), &index).expect_err("empty index");
    assert!(matches!(err, RetrievalError::EmptyIndex));
}

#[test]
fn zero_k_is_invalid() {
    let index = indexer(Arc::new(HashingEmbedder::new(32)))
        .index(vec![chunk("doc-a", 0, "text")])
        .expect("indexing should succeed");

    let err = retrieve(&RetrievalQuery::new("text", 0), &index).expect_err("k = 0");
    assert!(matches!(err, RetrievalError::InvalidQuery { .. }));
}

#[test]
fn embedder_count_mismatch_is_reported() {
    let err = indexer(Arc::new(BrokenEmbedder))
        .index(vec![chunk("doc-a", 0, "text")])
        .expect_err("broken embedder");

    assert!(matches!(
        err,
        RetrievalError::Embedding(EmbeddingError::CountMismatch {
            expected: 1,
            actual: 0
        })
    ));
}

#[test]
fn cache_is_shared_between_indexers() {
    let embedder = Arc::new(KeywordEmbedder::default());
    let cache = Arc::new(EmbeddingCache::new());
    let dyn_embedder: Arc<dyn Embedder> = Arc::clone(&embedder) as Arc<dyn Embedder>;

    let first = Indexer::new(Arc::clone(&dyn_embedder), Arc::clone(&cache));
    first
        .index(vec![chunk("doc-a", 0, "alpha"), chunk("doc-a", 1, "alpha")])
        .expect("indexing should succeed");
    assert_eq!(cache.len(), 1);

    let second = Indexer::new(dyn_embedder, Arc::clone(&cache));
    let index = second
        .index(vec![chunk("doc-b", 0, "alpha"), chunk("doc-b", 1, "beta")])
        .expect("indexing should succeed");

    let embedded = embedder.embedded.lock().expect("lock should not be poisoned").clone();
    assert_eq!(embedded, vec!["alpha".to_string(), "beta".to_string()]);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    assert!(index.chunks().iter().all(|c| c.embedding.is_some()));
    assert_eq!(index.dimension(), 3);
}

#[test]
fn retrieves_relevant_passage_from_documents() {
    let docs = vec![
        Document::new(
            "bio.txt",
            "Photosynthesis takes place in the chloroplast. Light energy becomes chemical energy.",
            Metadata::new(),
        ),
        Document::new(
            "history.txt",
            "The Treaty of Versailles was signed in 1919 after the First World War.",
            Metadata::new(),
        ),
    ];
    let config = ChunkingConfig {
        chunk_size: 200,
        overlap: 20,
    };
    let chunks = chunk_documents(&docs, &config).expect("valid parameters");
    let index = indexer(Arc::new(HashingEmbedder::new(256)))
        .index(chunks)
        .expect("indexing should succeed");

    let context = retrieve(&RetrievalQuery::new("photosynthesis chloroplast", 1), &index)
        .expect("retrieve");

    assert_eq!(context.chunks()[0].chunk.document_id, docs[0].id);
}

#[test]
fn cosine_of_zero_vector_is_zero() {
    assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    assert!((cosine_similarity(&[2.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
}
