use super::*;

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[test]
fn vectors_are_normalized() {
    let embedder = HashingEmbedder::new(64);
    let vector = embedder.embed_text("Photosynthesis converts light energy into chemical energy");
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();

    assert_eq!(vector.len(), 64);
    assert!((norm - 1.0).abs() < 1e-5);
}

#[test]
fn identical_text_embeds_identically() {
    let embedder = HashingEmbedder::new(128);
    let texts = vec!["The mitochondria".to_string(), "the MITOCHONDRIA!".to_string()];
    let vectors = embedder.embed(&texts).expect("hashing never fails");

    assert_eq!(vectors.len(), 2);
    assert_eq!(vectors[0], vectors[1]);
}

#[test]
fn related_text_scores_higher() {
    let embedder = HashingEmbedder::new(256);
    let query = embedder.embed_text("chloroplast photosynthesis light");
    let related = embedder.embed_text("Photosynthesis happens in the chloroplast using light.");
    let unrelated = embedder.embed_text("The French revolution began in 1789.");

    assert!(cosine(&query, &related) > cosine(&query, &unrelated));
}

#[test]
fn text_without_words_is_zero_vector() {
    let embedder = HashingEmbedder::new(16);
    let vector = embedder.embed_text("  ... !! ");
    assert!(vector.iter().all(|v| *v == 0.0));
}

#[test]
fn name_includes_dimension() {
    assert_eq!(HashingEmbedder::new(384).name(), "hashing:384");
    assert_eq!(HashingEmbedder::new(0).dimension(), 1);
}
