//! refbase - hybrid retrieval over a personal document library.
//!
//! Three indices answer compound queries together: a durable SQLite row
//! store of bibliographic records ([`store::MetadataStore`], the single
//! source of truth), an in-memory reverse index from tag and author
//! tokens to record ids ([`cache::ReverseIndexCache`], rebuilt at
//! startup and patched on every mutation), and a durable vector
//! collection of per-document embeddings ([`vector::VectorStore`], fed
//! by the [`pipeline::FeatureIndexer`]). The [`query::QueryEngine`]
//! coordinates them: structured predicates narrow first, free-text
//! scans the narrowed candidates, and semantic search ranks whatever
//! survived by similarity.
//!
//! Consistency is eventual by design. Store mutations patch the cache
//! synchronously but not transactionally, the vector collection trails
//! the store by one indexing cycle, and durable writes are buffered
//! until [`Library::commit_all`] or the periodic flush task runs.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use refbase::pipeline::HashEmbedder;
//! use refbase::query::{CompoundQuery, SemanticQuery};
//! use refbase::record::DocumentDraft;
//! use refbase::{Config, Library};
//!
//! # async fn demo() -> refbase::Result<()> {
//! let mut config = Config::for_data_dir("/tmp/refbase-demo");
//! config.vector.dimension = 384;
//! let library = Library::open(config, Arc::new(HashEmbedder::default())).await?;
//!
//! let draft = DocumentDraft::new("Attention Is All You Need", 2017, vec![
//!     "Vaswani, Ashish".to_string(),
//! ]);
//! let id = library.store().insert(draft).await?;
//! library.index_features().await?;
//!
//! let results = library
//!     .query(&CompoundQuery::new().with_semantic(SemanticQuery::new("attention models")))
//!     .await?;
//! println!("best match for {id}: {:?}", results.into_ids().first());
//! library.commit_all().await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod library;
pub mod pipeline;
pub mod query;
pub mod record;
pub mod store;
pub mod tags;
pub mod test_utils;
pub mod vector;

pub use config::Config;
pub use error::{Error, Result};
pub use library::Library;
