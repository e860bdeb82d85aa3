use super::*;

fn distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[test]
fn vectors_have_configured_dimension() {
    let embedder = HashingEmbedder::new("hashing/test", 64).expect("should create embedder");
    let vectors = embedder
        .embed_batch(&["hello world", "another text"])
        .expect("should embed");

    assert_eq!(vectors.len(), 2);
    assert!(vectors.iter().all(|v| v.len() == 64));
    assert_eq!(embedder.model_id(), "hashing/test");
}

#[test]
fn identical_text_gives_identical_vectors() {
    let embedder = HashingEmbedder::new("hashing/test", 128).expect("should create embedder");
    let first = embedder.embed_batch(&["The same sentence."]).expect("should embed");
    let second = embedder.embed_batch(&["The same sentence."]).expect("should embed");

    for (a, b) in first[0].iter().zip(&second[0]) {
        assert!((a - b).abs() < 1e-5);
    }
}

#[test]
fn vectors_are_unit_length() {
    let embedder = HashingEmbedder::new("hashing/test", 128).expect("should create embedder");
    let vectors = embedder
        .embed_batch(&["normalize me please"])
        .expect("should embed");

    let norm = vectors[0].iter().map(|v| v * v).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-5);
}

#[test]
fn shared_vocabulary_is_closer() {
    let embedder = HashingEmbedder::new("hashing/test", 256).expect("should create embedder");
    let vectors = embedder
        .embed_batch(&[
            "rust ownership and borrowing rules",
            "borrowing rules in rust",
            "baking sourdough bread at home",
        ])
        .expect("should embed");

    assert!(distance(&vectors[0], &vectors[1]) < distance(&vectors[0], &vectors[2]));
}

#[test]
fn text_without_words_is_zero_vector() {
    let embedder = HashingEmbedder::new("hashing/test", 16).expect("should create embedder");
    let vectors = embedder.embed_batch(&["  ...  "]).expect("should embed");

    assert!(vectors[0].iter().all(|v| *v == 0.0));
}

#[test]
fn zero_dimension_is_rejected() {
    assert!(HashingEmbedder::new("hashing/test", 0).is_err());
}
