use super::*;
use crate::embeddings::{Chunk, HashingEmbedder, embed_texts};
use crate::index::IndexPair;

const TEXTS: &[&str] = &[
    "Rust ownership rules and the borrow checker",
    "Baking sourdough bread with a starter",
    "Tokio runtime and async tasks in Rust",
    "Growing tomatoes in a small garden",
    "SQLite transactions and write-ahead logging",
];

fn embedder() -> HashingEmbedder {
    HashingEmbedder::new("hashing/test-64", 64).expect("should create embedder")
}

fn build_pair(embedder: &HashingEmbedder, texts: &[&str]) -> IndexPair {
    let vectors = embed_texts(embedder, texts, 2).expect("should embed");
    let chunks = texts
        .iter()
        .enumerate()
        .map(|(i, text)| Chunk {
            text: (*text).to_string(),
            provenance: Provenance {
                source: format!("doc{i}.txt"),
                document_id: None,
                page: None,
                title: None,
            },
            position: 0,
            start: 0,
            end: text.chars().count(),
        })
        .collect();
    IndexPair::build(embedder.model_id(), &vectors, chunks).expect("should build pair")
}

#[test]
fn exact_text_ranks_first() {
    let embedder = embedder();
    let pair = build_pair(&embedder, TEXTS);

    let matches = query(TEXTS[2], &pair, &embedder, 3).expect("query should succeed");

    assert_eq!(matches.len(), 3);
    assert_eq!(matches[0].ordinal, 2);
    assert_eq!(matches[0].rank, 1);
    assert_eq!(matches[0].text, TEXTS[2]);
    assert_eq!(matches[0].provenance.source, "doc2.txt");
    assert!(matches[0].distance < 1e-5);
}

#[test]
fn results_are_sorted_and_ranked() {
    let embedder = embedder();
    let pair = build_pair(&embedder, TEXTS);

    let matches = query("rust borrow checker", &pair, &embedder, 5).expect("query should succeed");

    assert!(matches.windows(2).all(|w| w[0].distance <= w[1].distance));
    let ranks: Vec<usize> = matches.iter().map(|m| m.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3, 4, 5]);
    assert!(matches.iter().all(|m| m.distance >= 0.0));
}

#[test]
fn k_larger_than_index_returns_everything() {
    let embedder = embedder();
    let pair = build_pair(&embedder, TEXTS);

    let matches = query("anything", &pair, &embedder, 10).expect("query should succeed");

    assert_eq!(matches.len(), 5);
}

#[test]
fn k_zero_returns_nothing() {
    let embedder = embedder();
    let pair = build_pair(&embedder, TEXTS);

    let matches = query("anything", &pair, &embedder, 0).expect("query should succeed");

    assert!(matches.is_empty());
}

#[test]
fn blank_query_is_rejected() {
    let embedder = embedder();
    let pair = build_pair(&embedder, TEXTS);

    assert!(matches!(
        query("   \n", &pair, &embedder, 5),
        Err(PipelineError::EmptyQuery)
    ));
}

#[test]
fn different_model_is_rejected() {
    let embedder = embedder();
    let pair = build_pair(&embedder, TEXTS);
    let other = HashingEmbedder::new("hashing/test-32", 32).expect("should create embedder");

    let error = query("rust", &pair, &other, 5).expect_err("query should fail");

    assert!(matches!(error, PipelineError::ModelMismatch { .. }));
    assert!(error.requires_reprocess());
}

#[test]
fn repeated_queries_are_deterministic() {
    let embedder = embedder();
    let pair = build_pair(&embedder, TEXTS);

    let first = query("async tasks", &pair, &embedder, 5).expect("query should succeed");
    let second = query("async tasks", &pair, &embedder, 5).expect("query should succeed");

    assert_eq!(first, second);
}
