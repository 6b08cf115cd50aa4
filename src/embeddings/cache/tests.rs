use super::*;
use std::thread;

#[test]
fn first_writer_wins() {
    let cache = EmbeddingCache::new();
    let key = EmbeddingCache::key("hashing", "photosynthesis");

    let stored = cache.insert_if_absent(key.clone(), vec![1.0, 0.0]);
    let second = cache.insert_if_absent(key.clone(), vec![0.0, 1.0]);

    assert_eq!(&*stored, &[1.0, 0.0]);
    assert_eq!(&*second, &[1.0, 0.0]);
    assert_eq!(cache.get(&key).as_deref(), Some(&[1.0, 0.0][..]));
    assert_eq!(cache.len(), 1);
}

#[test]
fn keys_are_namespaced_by_embedder() {
    let a = EmbeddingCache::key("hashing", "same text");
    let b = EmbeddingCache::key("ollama:nomic", "same text");
    assert_ne!(a, b);
    assert_eq!(a, EmbeddingCache::key("hashing", "same text"));
}

#[test]
fn missing_key() {
    let cache = EmbeddingCache::new();
    assert!(cache.is_empty());
    assert!(cache.get("nothing").is_none());
}

#[test]
fn concurrent_writers_agree() {
    let cache = Arc::new(EmbeddingCache::new());
    let key = EmbeddingCache::key("hashing", "shared chunk");

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            thread::spawn(move || cache.insert_if_absent(key, vec![i as f32]))
        })
        .collect();

    let results: Vec<Arc<[f32]>> = handles
        .into_iter()
        .map(|h| h.join().expect("writer thread should not panic"))
        .collect();

    let stored = cache.get(&key).expect("key should be present");
    assert!(results.iter().all(|r| **r == *stored));
    assert_eq!(cache.len(), 1);
}
