//! Filesystem-backed fixtures for store and library tests.

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use crate::cache::ReverseIndexCache;
use crate::config::Config;
use crate::library::Library;
use crate::pipeline::HashEmbedder;
use crate::record::DocumentDraft;
use crate::store::MetadataStore;

/// Embedding dimension used across the test suite. Small enough that
/// fixtures stay fast, large enough that token collisions stay rare.
pub const TEST_DIM: usize = 32;

/// Configuration rooted at the given directory, sized for tests: tiny
/// vector blocks so block-boundary paths are exercised by a handful of
/// entries.
pub fn test_config(data_dir: &Path) -> Config {
    let mut config = Config::for_data_dir(data_dir);
    config.vector.dimension = TEST_DIM;
    config.vector.block_size = 8;
    config
}

/// Draft with sensible defaults; tests override what they care about.
pub fn sample_draft(id: &str, title: &str) -> DocumentDraft {
    DocumentDraft::new(title, 2020, vec!["Doe, Jane".to_string()]).with_id(id)
}

/// Isolated metadata store in a temp directory.
pub struct StoreFixture {
    pub temp_dir: TempDir,
    pub config: Config,
    pub cache: Arc<ReverseIndexCache>,
    pub store: Arc<MetadataStore>,
}

impl StoreFixture {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let config = test_config(temp_dir.path());
        let cache = Arc::new(ReverseIndexCache::new());
        let store = Arc::new(
            MetadataStore::open(&config.storage, Arc::clone(&cache))
                .await
                .expect("open metadata store"),
        );
        Self {
            temp_dir,
            config,
            cache,
            store,
        }
    }

    pub fn data_dir(&self) -> &Path {
        self.temp_dir.path()
    }
}

/// Full library in a temp directory, with the deterministic hash
/// embedder standing in for a model-backed provider.
pub struct LibraryFixture {
    pub temp_dir: TempDir,
    pub library: Library<HashEmbedder>,
}

impl LibraryFixture {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let library = open_test_library(temp_dir.path()).await;
        Self { temp_dir, library }
    }

    /// Fresh handle to the same on-disk library. The two handles hold
    /// separate connections, like two processes sharing the data dir.
    pub async fn reopen(&self) -> Library<HashEmbedder> {
        open_test_library(self.temp_dir.path()).await
    }
}

async fn open_test_library(data_dir: &Path) -> Library<HashEmbedder> {
    Library::open(test_config(data_dir), Arc::new(HashEmbedder::new(TEST_DIM)))
        .await
        .expect("open library")
}
