//! Vector store integration: the blocked scan must agree with a
//! brute-force ranking computed in the open, and dimension checks must
//! reject bad writes before they reach the table.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use refbase::Error;
use refbase::config::VectorConfig;
use refbase::test_utils::fixtures::{TEST_DIM, test_config};
use refbase::vector::{Metric, VectorEntry, VectorStore, cosine_similarity};

fn random_vector(rng: &mut StdRng, dim: usize) -> Vec<f32> {
    (0..dim).map(|_| rng.random_range(-1.0f32..1.0)).collect()
}

fn open_store(dir: &TempDir) -> (VectorStore, VectorConfig) {
    let config = test_config(dir.path()).vector;
    let store = VectorStore::open(dir.path(), &config).unwrap();
    (store, config)
}

#[tokio::test]
async fn test_blocked_scan_matches_brute_force() {
    let dir = TempDir::new().unwrap();
    let (store, _) = open_store(&dir);
    let col = store.create_collection("scan", TEST_DIM).await.unwrap();

    // 50 entries over block size 8: six full blocks plus a remainder.
    let mut rng = StdRng::seed_from_u64(7);
    let mut corpus = Vec::new();
    for i in 0..50 {
        let vector = random_vector(&mut rng, TEST_DIM);
        let entry = VectorEntry::new(format!("v{i}"), format!("g{i}"), vector.clone());
        col.insert(&entry).await.unwrap();
        corpus.push((format!("v{i}"), vector));
    }

    let query = random_vector(&mut rng, TEST_DIM);
    let hits = col.search(&query, 5, Metric::Cosine, None).await.unwrap();

    let mut expected: Vec<(String, f32)> = corpus
        .iter()
        .map(|(id, v)| (id.clone(), cosine_similarity(&query, v)))
        .collect();
    expected.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
    expected.truncate(5);

    assert_eq!(hits.len(), 5);
    for (got, want) in hits.iter().zip(expected.iter()) {
        assert_eq!(got.0, want.0);
        assert!((got.1 - want.1).abs() < 1e-5);
    }
}

#[tokio::test]
async fn test_group_restriction_scopes_the_scan() {
    let dir = TempDir::new().unwrap();
    let (store, _) = open_store(&dir);
    let col = store.create_collection("chunks", TEST_DIM).await.unwrap();

    let mut rng = StdRng::seed_from_u64(11);
    for group in ["a", "b"] {
        for chunk in 0..3 {
            let entry = VectorEntry::new(
                format!("{group}_{chunk}"),
                group,
                random_vector(&mut rng, TEST_DIM),
            );
            col.insert(&entry).await.unwrap();
        }
    }

    let query = random_vector(&mut rng, TEST_DIM);
    let hits = col.search(&query, 10, Metric::Cosine, Some("a")).await.unwrap();
    assert_eq!(hits.len(), 3);
    assert!(hits.iter().all(|(id, _)| id.starts_with("a_")));

    let allowed: HashSet<String> = HashSet::from(["b".to_string()]);
    let hits = col
        .search_within(&query, 10, Metric::Cosine, &allowed)
        .await
        .unwrap();
    assert_eq!(hits.len(), 3);
    assert!(hits.iter().all(|(id, _)| id.starts_with("b_")));

    // Empty candidate set short-circuits without touching the table.
    let hits = col
        .search_within(&query, 10, Metric::Cosine, &HashSet::new())
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn test_neg_l2_ranks_by_distance() {
    let dir = TempDir::new().unwrap();
    let (store, _) = open_store(&dir);
    let col = store.create_collection("dist", TEST_DIM).await.unwrap();

    let mut base = vec![0.0f32; TEST_DIM];
    base[0] = 1.0;
    for (i, offset) in [0.1f32, 0.5, 2.0].iter().enumerate() {
        let mut v = base.clone();
        v[1] = *offset;
        col.insert(&VectorEntry::new(format!("d{i}"), format!("d{i}"), v))
            .await
            .unwrap();
    }

    let hits = col.search(&base, 3, Metric::L2, None).await.unwrap();
    let ids: Vec<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["d0", "d1", "d2"]);
    // Scores are negated squared distances, so they descend toward zero.
    assert!(hits[0].1 > hits[1].1 && hits[1].1 > hits[2].1);
    assert!(hits[0].1 <= 0.0);
}

#[tokio::test]
async fn test_reopen_validates_recorded_dimension() {
    let dir = TempDir::new().unwrap();
    let (store, config) = open_store(&dir);
    let col = store.create_collection("features", TEST_DIM).await.unwrap();
    col.insert(&VectorEntry::new("v1", "v1", vec![0.5; TEST_DIM]))
        .await
        .unwrap();
    store.commit().await.unwrap();
    drop(col);
    drop(store);

    let reopened = VectorStore::open(dir.path(), &config).unwrap();
    let err = reopened.ensure_collection("features", TEST_DIM * 2).await;
    assert!(matches!(err, Err(Error::Validation(_))));

    // The matching dimension opens the same data.
    let col = reopened.ensure_collection("features", TEST_DIM).await.unwrap();
    assert_eq!(col.count().await.unwrap(), 1);
    let entry = col.get("v1").await.unwrap();
    assert_eq!(entry.vector, vec![0.5; TEST_DIM]);
}

#[tokio::test]
async fn test_dimension_mismatch_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let config = VectorConfig {
        dimension: 512,
        ..VectorConfig::default()
    };
    let store = VectorStore::open(dir.path(), &config).unwrap();
    let col = store.create_collection("features", 512).await.unwrap();

    let err = col
        .insert(&VectorEntry::new("v1", "v1", vec![0.1; 768]))
        .await;
    assert!(matches!(err, Err(Error::Validation(_))));
    assert_eq!(col.count().await.unwrap(), 0);

    // Queries of the wrong width are rejected the same way.
    let err = col.search(&vec![0.1; 768], 5, Metric::Cosine, None).await;
    assert!(matches!(err, Err(Error::Validation(_))));
}

#[tokio::test]
async fn test_non_finite_vectors_rejected() {
    let dir = TempDir::new().unwrap();
    let (store, _) = open_store(&dir);
    let col = store.create_collection("finite", TEST_DIM).await.unwrap();

    let mut bad = vec![0.2f32; TEST_DIM];
    bad[3] = f32::NAN;
    let err = col.insert(&VectorEntry::new("v1", "v1", bad.clone())).await;
    assert!(matches!(err, Err(Error::Validation(_))));

    bad[3] = f32::INFINITY;
    let err = col.insert(&VectorEntry::new("v1", "v1", bad)).await;
    assert!(matches!(err, Err(Error::Validation(_))));
    assert_eq!(col.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_vectors_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let (store, config) = open_store(&dir);
    let col = store.create_collection("durable", TEST_DIM).await.unwrap();

    let mut rng = StdRng::seed_from_u64(29);
    let kept = random_vector(&mut rng, TEST_DIM);
    for i in 0..10 {
        let vector = if i == 3 {
            kept.clone()
        } else {
            random_vector(&mut rng, TEST_DIM)
        };
        col.insert(&VectorEntry::new(format!("v{i}"), format!("v{i}"), vector))
            .await
            .unwrap();
    }
    store.commit().await.unwrap();
    drop(col);
    drop(store);

    let reopened = VectorStore::open(dir.path(), &config).unwrap();
    assert_eq!(
        reopened.collection_names().await.unwrap(),
        vec!["durable".to_string()]
    );
    let col = reopened.collection("durable").await.unwrap();
    assert_eq!(col.count().await.unwrap(), 10);
    // Blob round-trip is exact for f32 payloads.
    assert_eq!(col.get("v3").await.unwrap().vector, kept);
    assert!(reopened.disk_usage() > 0);
}
