//! Feature-indexing pipeline.
//!
//! Keeps the vector collection in step with the metadata store without
//! being transactional with it: each cycle walks the live records,
//! re-embeds the ones whose feature text changed (detected by content
//! fingerprint, never by recomputing the embedding), and prunes vectors
//! whose owning record is gone. A connectivity failure against the
//! embedding provider skips the affected record for this cycle and is
//! retried on the next one; it is never fatal to the store.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::record::DocumentRecord;
use crate::store::MetadataStore;
use crate::vector::{Collection, VectorEntry};

// ============================================================================
// Provider traits
// ============================================================================

/// Turns text into a fixed-dimension embedding. Implementations are
/// typically remote model services; failures they cannot recover from
/// locally surface as `Connectivity`.
pub trait EmbeddingProvider: Send + Sync {
    /// Dimension of every vector this provider produces.
    fn dim(&self) -> usize;

    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>>> + Send;
}

/// Selects the feature text for a record: abstract, then generated
/// summary, then extracted full text, then title, whichever source the
/// implementation can reach first. `None` means nothing usable.
pub trait TextSource: Send + Sync {
    fn extract_text(
        &self,
        record: &DocumentRecord,
    ) -> impl Future<Output = Result<Option<String>>> + Send;
}

/// Text source working from record metadata alone: abstract when
/// present, otherwise the title. Summary and full-text extraction need
/// external collaborators and plug in through their own [`TextSource`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordTextSource;

impl TextSource for RecordTextSource {
    async fn extract_text(&self, record: &DocumentRecord) -> Result<Option<String>> {
        let text = if record.abstract_text.trim().is_empty() {
            record.title.trim()
        } else {
            record.abstract_text.trim()
        };
        if text.is_empty() {
            return Ok(None);
        }
        Ok(Some(text.to_string()))
    }
}

// ============================================================================
// Hash embedder
// ============================================================================

/// FNV-1a token-hashing embedder. Fully deterministic, no model
/// dependencies; shared tokens land in shared buckets, so lexically
/// overlapping texts score close under cosine. The offline fallback
/// when no model-backed provider is configured, and the workhorse of
/// the test suite.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    dim: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self { dim: 384 }
    }
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    /// The actual hashing, callable without an executor.
    pub fn features(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = fnv1a(token.as_bytes());
            let bucket = usize::try_from(hash % self.dim as u64).unwrap_or(0);
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.features(text))
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Content fingerprint of a feature text. Stored alongside the vector
/// so staleness checks never re-embed.
pub fn fingerprint(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    hex::encode(digest)
}

// ============================================================================
// Indexer
// ============================================================================

/// What one indexing cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Records embedded or re-embedded this cycle.
    pub embedded: usize,
    /// Records whose fingerprint still matched.
    pub unchanged: usize,
    /// Records skipped: no usable text, or provider unreachable.
    pub skipped: usize,
    /// Vector entries removed because their record is gone.
    pub pruned: usize,
}

/// Push-model indexing job over the store and one vector collection.
pub struct FeatureIndexer<E, S> {
    store: Arc<MetadataStore>,
    features: Collection,
    embedder: Arc<E>,
    source: S,
}

impl<E: EmbeddingProvider, S: TextSource> FeatureIndexer<E, S> {
    pub fn new(store: Arc<MetadataStore>, features: Collection, embedder: Arc<E>, source: S) -> Self {
        Self {
            store,
            features,
            embedder,
            source,
        }
    }

    /// Run one full cycle: refresh stale vectors, prune orphaned ones.
    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        let records = self.store.load_all().await?;
        let live: HashSet<String> = records.iter().map(|r| r.id.clone()).collect();
        let mut summary = CycleSummary::default();

        for record in &records {
            match self.refresh_record(record).await? {
                RecordOutcome::Embedded => summary.embedded += 1,
                RecordOutcome::Unchanged => summary.unchanged += 1,
                RecordOutcome::Skipped => summary.skipped += 1,
            }
        }

        for group in self.features.groups().await? {
            // Entries without an owner are outside this pipeline's remit.
            if group.is_empty() || live.contains(&group) {
                continue;
            }
            summary.pruned += self.features.delete_group(&group).await?;
        }

        info!(
            embedded = summary.embedded,
            unchanged = summary.unchanged,
            skipped = summary.skipped,
            pruned = summary.pruned,
            "feature indexing cycle finished"
        );
        Ok(summary)
    }

    async fn refresh_record(&self, record: &DocumentRecord) -> Result<RecordOutcome> {
        let Some(text) = self.source.extract_text(record).await? else {
            debug!(id = %record.id, "no feature text, skipped");
            return Ok(RecordOutcome::Skipped);
        };
        let fingerprint = fingerprint(&text);

        let stored = match self.features.get(&record.id).await {
            Ok(entry) => Some(entry.fingerprint),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err),
        };
        if stored.as_deref() == Some(fingerprint.as_str()) {
            return Ok(RecordOutcome::Unchanged);
        }

        let vector = match self.embedder.embed(&text).await {
            Ok(vector) => vector,
            Err(Error::Connectivity(reason)) => {
                warn!(id = %record.id, %reason, "embedding provider unreachable, skipping this cycle");
                return Ok(RecordOutcome::Skipped);
            }
            Err(err) => return Err(err),
        };

        let entry = VectorEntry::new(record.id.clone(), record.id.clone(), vector)
            .with_fingerprint(fingerprint);
        self.features.upsert(&entry).await?;
        debug!(id = %record.id, "embedded feature vector");
        Ok(RecordOutcome::Embedded)
    }
}

enum RecordOutcome {
    Embedded,
    Unchanged,
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ReverseIndexCache;
    use crate::config::Config;
    use crate::record::{DocumentDraft, FieldChanges, SchemaInfo};
    use crate::vector::{Metric, VectorStore};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::{TempDir, tempdir};

    const DIM: usize = 16;

    /// Embedder that counts calls and can simulate an outage.
    struct FlakyEmbedder {
        inner: HashEmbedder,
        calls: AtomicUsize,
        offline: AtomicBool,
    }

    impl FlakyEmbedder {
        fn new() -> Self {
            Self {
                inner: HashEmbedder::new(DIM),
                calls: AtomicUsize::new(0),
                offline: AtomicBool::new(false),
            }
        }
    }

    impl EmbeddingProvider for FlakyEmbedder {
        fn dim(&self) -> usize {
            DIM
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(Error::Connectivity("provider offline".to_string()));
            }
            self.inner.embed(text).await
        }
    }

    struct Fixture {
        _dir: TempDir,
        store: Arc<MetadataStore>,
        features: Collection,
        embedder: Arc<FlakyEmbedder>,
        indexer: FeatureIndexer<FlakyEmbedder, RecordTextSource>,
    }

    async fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let mut config = Config::for_data_dir(dir.path());
        config.vector.dimension = DIM;

        let cache = Arc::new(ReverseIndexCache::new());
        let store = Arc::new(
            MetadataStore::open(&config.storage, Arc::clone(&cache))
                .await
                .unwrap(),
        );
        let vectors = VectorStore::open(dir.path(), &config.vector).unwrap();
        let features = vectors
            .ensure_collection(&config.vector.collection, DIM)
            .await
            .unwrap();
        let embedder = Arc::new(FlakyEmbedder::new());
        let indexer = FeatureIndexer::new(
            Arc::clone(&store),
            features.clone(),
            Arc::clone(&embedder),
            RecordTextSource,
        );
        Fixture {
            _dir: dir,
            store,
            features,
            embedder,
            indexer,
        }
    }

    async fn seed(fx: &Fixture, id: &str, title: &str, abstract_text: &str) {
        let draft = DocumentDraft::new(title, 2021, vec!["Author, Some".into()])
            .with_id(id)
            .with_abstract(abstract_text);
        fx.store.insert(draft).await.unwrap();
    }

    #[test]
    fn test_hash_embedder_is_deterministic_and_normalized() {
        let embedder = HashEmbedder::new(64);
        let a = futures_block(embedder.embed("attention is all you need"));
        let b = futures_block(embedder.embed("attention is all you need"));
        assert_eq!(a, b);
        let norm = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);

        // Overlapping text scores closer than disjoint text.
        let c = futures_block(embedder.embed("attention mechanisms in networks"));
        let d = futures_block(embedder.embed("sqlite storage internals"));
        let sim_overlap = Metric::Cosine.score(&a, &c);
        let sim_disjoint = Metric::Cosine.score(&a, &d);
        assert!(sim_overlap > sim_disjoint);
    }

    fn futures_block(fut: impl Future<Output = Result<Vec<f32>>>) -> Vec<f32> {
        // HashEmbedder::embed never actually suspends.
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(fut)
            .unwrap()
    }

    #[test]
    fn test_fingerprint_is_stable_and_distinct() {
        assert_eq!(fingerprint("abc"), fingerprint("abc"));
        assert_ne!(fingerprint("abc"), fingerprint("abd"));
        assert_eq!(fingerprint("abc").len(), 64);
    }

    #[tokio::test]
    async fn test_cycle_embeds_new_records() {
        let fx = fixture().await;
        seed(&fx, "d1", "Attention", "self-attention networks").await;
        seed(&fx, "d2", "ResNet", "").await;

        let summary = fx.indexer.run_cycle().await.unwrap();
        assert_eq!(summary.embedded, 2);
        assert_eq!(summary.unchanged, 0);
        assert_eq!(fx.features.count().await.unwrap(), 2);

        // d2 had no abstract; its title was the fallback source.
        let entry = fx.features.get("d2").await.unwrap();
        assert_eq!(entry.fingerprint, fingerprint("ResNet"));
        assert_eq!(entry.group, "d2");
    }

    #[tokio::test]
    async fn test_cycle_skips_unchanged_fingerprints() {
        let fx = fixture().await;
        seed(&fx, "d1", "Attention", "self-attention networks").await;

        fx.indexer.run_cycle().await.unwrap();
        let calls_after_first = fx.embedder.calls.load(Ordering::SeqCst);

        let summary = fx.indexer.run_cycle().await.unwrap();
        assert_eq!(summary.embedded, 0);
        assert_eq!(summary.unchanged, 1);
        // Staleness is decided on the fingerprint, not by re-embedding.
        assert_eq!(fx.embedder.calls.load(Ordering::SeqCst), calls_after_first);
    }

    #[tokio::test]
    async fn test_cycle_reembeds_on_text_change() {
        let fx = fixture().await;
        seed(&fx, "d1", "Attention", "self-attention networks").await;
        fx.indexer.run_cycle().await.unwrap();

        let mut changes = FieldChanges::default();
        changes.abstract_text = Some("multi-head attention revisited".to_string());
        fx.store.update("d1", changes).await.unwrap();

        let summary = fx.indexer.run_cycle().await.unwrap();
        assert_eq!(summary.embedded, 1);
        let entry = fx.features.get("d1").await.unwrap();
        assert_eq!(entry.fingerprint, fingerprint("multi-head attention revisited"));
    }

    #[tokio::test]
    async fn test_cycle_prunes_removed_records() {
        let fx = fixture().await;
        seed(&fx, "d1", "Attention", "self-attention networks").await;
        seed(&fx, "d2", "ResNet", "residual learning").await;
        fx.indexer.run_cycle().await.unwrap();

        fx.store.remove("d1").await.unwrap();
        let summary = fx.indexer.run_cycle().await.unwrap();
        assert_eq!(summary.pruned, 1);
        assert!(fx.features.get("d1").await.unwrap_err().is_not_found());
        assert!(fx.features.get("d2").await.is_ok());
    }

    #[tokio::test]
    async fn test_connectivity_failure_skips_not_fails() {
        let fx = fixture().await;
        seed(&fx, "d1", "Attention", "self-attention networks").await;

        fx.embedder.offline.store(true, Ordering::SeqCst);
        let summary = fx.indexer.run_cycle().await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.embedded, 0);
        assert_eq!(fx.features.count().await.unwrap(), 0);

        // Back online, the next cycle picks the record up.
        fx.embedder.offline.store(false, Ordering::SeqCst);
        let summary = fx.indexer.run_cycle().await.unwrap();
        assert_eq!(summary.embedded, 1);
    }

    #[tokio::test]
    async fn test_record_text_source_priority() {
        let source = RecordTextSource;
        let mut record = DocumentRecord {
            id: "d1".into(),
            citation_text: String::new(),
            doc_type: String::new(),
            title: "Fallback Title".into(),
            year: 2021,
            publication: String::new(),
            authors: vec!["A".into()],
            tags: Default::default(),
            url: String::new(),
            abstract_text: "the abstract wins".into(),
            notes: String::new(),
            time_created: 0.0,
            time_modified: 0.0,
            schema_info: SchemaInfo::new(),
            doc_extension: String::new(),
        };
        assert_eq!(
            source.extract_text(&record).await.unwrap().as_deref(),
            Some("the abstract wins")
        );

        record.abstract_text.clear();
        assert_eq!(
            source.extract_text(&record).await.unwrap().as_deref(),
            Some("Fallback Title")
        );

        record.title = "   ".into();
        assert_eq!(source.extract_text(&record).await.unwrap(), None);
    }
}
