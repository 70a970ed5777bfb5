//! pixvault — encrypted photo ingestion and organization pipeline.
//!
//! Uploads flow through a resumable state machine that derives, per image: a
//! confidentiality envelope (per-user DEK wrapped under a server master key,
//! per-image object keys), exact and perceptual duplicate signatures, faces
//! grouped into per-owner person clusters, a semantic embedding for
//! similarity search, and automatic date/location/person albums. Transport,
//! authentication, UI and the physical blob store are the host application's
//! business; this crate exposes [`pipeline::IngestionPipeline`] and the
//! [`storage::ObjectStore`] capability interface and nothing else about them.

pub mod albums;
pub mod config;
pub mod embed;
pub mod error;
pub mod faces;
pub mod hashing;
pub mod index;
pub mod keys;
pub mod logging;
pub mod pipeline;
pub mod storage;
pub mod store;

pub use albums::{AlbumOrganizer, AlbumSummary};
pub use config::Config;
pub use embed::{ImageEmbedder, PerceptualEmbedder};
pub use error::{PipelineError, PipelineResult};
pub use faces::{DetectedFace, FaceClusterer, FaceEngine, NoFaceEngine};
pub use hashing::ContentSignature;
pub use index::EmbeddingIndex;
pub use keys::{DataKey, KeyManager};
pub use pipeline::{IngestMetadata, IngestionPipeline, IngestionResult, Stage, WorkerPool};
pub use storage::{DeadlineStore, FsStore, MemoryStore, ObjectStore};
pub use store::{
    AlbumRecord, FaceBox, FaceRecord, ImageRecord, PersonClusterSummary, Store,
};

#[cfg(feature = "onnx-models")]
pub use embed::ClipEmbedder;
#[cfg(feature = "onnx-models")]
pub use faces::OnnxFaceEngine;
