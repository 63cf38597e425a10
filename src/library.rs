//! Library façade.
//!
//! Wires the metadata store, reverse-index cache, vector collection,
//! feature indexer and query engine into one handle, constructed once
//! at process start from an explicit [`Config`]. No component reaches
//! for global state; everything flows through this object.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, ReverseIndexCache};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::pipeline::{CycleSummary, EmbeddingProvider, FeatureIndexer, RecordTextSource};
use crate::query::{CompoundQuery, QueryEngine, QueryOutcome};
use crate::store::MetadataStore;
use crate::vector::{Collection, VectorStore};

/// One open document library.
pub struct Library<E> {
    config: Config,
    cache: Arc<ReverseIndexCache>,
    store: Arc<MetadataStore>,
    vectors: VectorStore,
    features: Collection,
    engine: QueryEngine<E>,
    indexer: FeatureIndexer<E, RecordTextSource>,
}

impl<E: EmbeddingProvider> Library<E> {
    /// Open the library under `config.storage.data_dir`, rebuilding the
    /// reverse-index cache from the row store.
    pub async fn open(config: Config, embedder: Arc<E>) -> Result<Self> {
        config.validate()?;
        if embedder.dim() != config.vector.dimension {
            return Err(Error::Config(format!(
                "embedding provider produces dimension {}, vector.dimension is {}",
                embedder.dim(),
                config.vector.dimension
            )));
        }

        let cache = Arc::new(ReverseIndexCache::new());
        let store = Arc::new(MetadataStore::open(&config.storage, Arc::clone(&cache)).await?);
        let vectors = VectorStore::open(&config.storage.data_dir, &config.vector)?;
        let features = vectors
            .ensure_collection(&config.vector.collection, config.vector.dimension)
            .await?;

        let engine = QueryEngine::new(
            Arc::clone(&store),
            features.clone(),
            Arc::clone(&embedder),
            &config,
        );
        let indexer = FeatureIndexer::new(
            Arc::clone(&store),
            features.clone(),
            embedder,
            RecordTextSource,
        );

        let records = store.count().await?;
        info!(
            data_dir = %config.storage.data_dir.display(),
            records,
            collection = %config.vector.collection,
            "library opened"
        );
        Ok(Self {
            config,
            cache,
            store,
            vectors,
            features,
            engine,
            indexer,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<MetadataStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<ReverseIndexCache> {
        &self.cache
    }

    pub fn features(&self) -> &Collection {
        &self.features
    }

    pub fn vectors(&self) -> &VectorStore {
        &self.vectors
    }

    pub fn engine(&self) -> &QueryEngine<E> {
        &self.engine
    }

    /// Execute a compound query.
    pub async fn query(&self, query: &CompoundQuery) -> Result<QueryOutcome> {
        self.engine.run(query).await
    }

    /// Run one feature-indexing cycle against the vector collection.
    pub async fn index_features(&self) -> Result<CycleSummary> {
        self.indexer.run_cycle().await
    }

    /// Rebuild the reverse-index cache wholesale from the row store.
    pub async fn rebuild_cache(&self) -> Result<CacheStats> {
        self.store.rebuild_cache().await
    }

    /// Flush buffered writes in both durable stores.
    pub async fn commit_all(&self) -> Result<()> {
        self.store.commit().await?;
        self.vectors.commit().await
    }

    /// Number of records in the library.
    pub async fn count(&self) -> Result<u64> {
        self.store.count().await
    }

    /// Bytes on disk across both databases, for quota enforcement.
    pub fn disk_usage(&self) -> u64 {
        self.store.disk_usage() + self.vectors.disk_usage()
    }

    /// Spawn the periodic flush task at `config.storage.flush_interval`.
    /// Callers hold the handle and abort it on shutdown; a failed flush
    /// is logged and retried next tick.
    pub fn spawn_autocommit(&self) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let vectors = self.vectors.clone();
        let period = self.config.storage.flush_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so startup does
            // not trigger an empty flush.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = store.commit().await {
                    warn!(%err, "periodic metadata flush failed");
                }
                if let Err(err) = vectors.commit().await {
                    warn!(%err, "periodic vector flush failed");
                }
                debug!("periodic flush tick");
            }
        })
    }
}

impl<E> std::fmt::Debug for Library<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("data_dir", &self.config.storage.data_dir)
            .field("collection", &self.features.name())
            .finish_non_exhaustive()
    }
}
