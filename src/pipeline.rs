//! Ingestion pipeline: an ordered, resumable state machine per image.
//!
//! `ingest` runs the synchronous prefix (validate, hash, dedup, encrypt,
//! store) and acknowledges with a definite result; the remaining stages run
//! through `process`, either inline, from a worker pool, or on resume after a
//! crash. The `stage` field on the Image row is the single source of truth
//! for where processing picks back up.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use image::{DynamicImage, GenericImageView};
use std::collections::HashMap;
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::albums::{AlbumOrganizer, AlbumSummary};
use crate::config::Config;
use crate::embed::ImageEmbedder;
use crate::error::{PipelineError, PipelineResult};
use crate::faces::{FaceClusterer, FaceEngine};
use crate::hashing;
use crate::index::EmbeddingIndex;
use crate::keys::{DataKey, KeyManager};
use crate::storage::{DeadlineStore, ObjectStore};
use crate::store::{
    AlbumRecord, ImageRecord, InsertOutcome, NewImage, PersonClusterSummary, Store,
};

/// Pipeline stages, in order. Stored as TEXT on the Image row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Hashed,
    DuplicateResolved,
    Encrypted,
    FacesDetected,
    Clustered,
    Embedded,
    Organized,
    Complete,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Hashed => "hashed",
            Stage::DuplicateResolved => "duplicate-resolved",
            Stage::Encrypted => "encrypted",
            Stage::FacesDetected => "faces-detected",
            Stage::Clustered => "clustered",
            Stage::Embedded => "embedded",
            Stage::Organized => "organized",
            Stage::Complete => "complete",
            Stage::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Stage> {
        match s {
            "received" => Some(Stage::Received),
            "hashed" => Some(Stage::Hashed),
            "duplicate-resolved" => Some(Stage::DuplicateResolved),
            "encrypted" => Some(Stage::Encrypted),
            "faces-detected" => Some(Stage::FacesDetected),
            "clustered" => Some(Stage::Clustered),
            "embedded" => Some(Stage::Embedded),
            "organized" => Some(Stage::Organized),
            "complete" => Some(Stage::Complete),
            "failed" => Some(Stage::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Stage::DuplicateResolved | Stage::Complete | Stage::Failed
        )
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upload-declared metadata. Fields left empty are backfilled from EXIF in
/// the uploaded bytes when present.
#[derive(Debug, Clone, Default)]
pub struct IngestMetadata {
    pub content_type: Option<String>,
    pub capture_time: Option<DateTime<Utc>>,
    pub gps: Option<(f64, f64)>,
}

/// Synchronous acknowledgment for one upload.
#[derive(Debug, Clone)]
pub struct IngestionResult {
    pub image_id: i64,
    pub stage: Stage,
    /// Set when the upload resolved to an existing record
    pub duplicate_of: Option<i64>,
    /// Advisory: existing images within the near-duplicate Hamming threshold
    pub near_duplicates: Vec<i64>,
}

pub struct IngestionPipeline {
    config: Config,
    store: Arc<Store>,
    objects: Arc<dyn ObjectStore>,
    keys: Arc<KeyManager>,
    face_engine: Arc<dyn FaceEngine>,
    embedder: Arc<dyn ImageEmbedder>,
    clusterer: FaceClusterer,
    organizer: AlbumOrganizer,
    indexes: Mutex<HashMap<i64, Arc<EmbeddingIndex>>>,
}

impl IngestionPipeline {
    pub fn new(
        config: Config,
        store: Arc<Store>,
        objects: Arc<dyn ObjectStore>,
        keys: Arc<KeyManager>,
        face_engine: Arc<dyn FaceEngine>,
        embedder: Arc<dyn ImageEmbedder>,
    ) -> PipelineResult<Self> {
        if embedder.dimension() != config.embedding.dimension {
            return Err(PipelineError::Dimension {
                expected: config.embedding.dimension,
                actual: embedder.dimension(),
            });
        }

        let clusterer = FaceClusterer::new(Arc::clone(&store), &config.faces);
        let organizer = AlbumOrganizer::new(Arc::clone(&store), &config.albums);

        // Every storage call carries the configured deadline; a missed one
        // surfaces as a recoverable Timeout
        let objects: Arc<dyn ObjectStore> = Arc::new(DeadlineStore::new(
            objects,
            Duration::from_millis(config.retry.storage_timeout_ms),
        ));

        Ok(Self {
            config,
            store,
            objects,
            keys,
            face_engine,
            embedder,
            clusterer,
            organizer,
            indexes: Mutex::new(HashMap::new()),
        })
    }

    // ========================================================================
    // Owner provisioning
    // ========================================================================

    /// Generate, wrap and persist a DEK for a new owner. Idempotent: an
    /// already-provisioned owner keeps their existing key.
    pub fn provision_owner(&self, owner_id: i64) -> PipelineResult<()> {
        if self.store.wrapped_dek(owner_id)?.is_some() {
            return Ok(());
        }
        let dek = self.keys.generate_dek();
        let wrapped = self.keys.wrap(&dek)?;
        self.store.upsert_user(owner_id, &wrapped)?;
        tracing::info!(owner_id, "owner provisioned");
        Ok(())
    }

    fn owner_dek(&self, owner_id: i64) -> PipelineResult<DataKey> {
        let wrapped = self.store.wrapped_dek(owner_id)?.ok_or_else(|| {
            PipelineError::Key(format!("owner {} has no provisioned DEK", owner_id))
        })?;
        self.keys.unwrap(&wrapped)
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Accept an upload. Runs synchronously through the `encrypted` stage so
    /// the plaintext is never parked outside the envelope, then returns; the
    /// remaining stages run via `process`.
    ///
    /// Errors: `Validation` for undecodable bytes, `Key` when the owner's DEK
    /// cannot be unwrapped (aborts the owner's batch). Everything else is
    /// reported through the result's stage and the record's `last_error`.
    pub fn ingest(
        &self,
        owner_id: i64,
        bytes: &[u8],
        metadata: &IngestMetadata,
    ) -> PipelineResult<IngestionResult> {
        // Key problems abort before any state is written
        let dek = self.owner_dek(owner_id)?;

        let img = hashing::decode_image(bytes)?;
        let signature = hashing::compute_signature(&img)?;
        let (width, height) = img.dimensions();

        // Backfill capture time / GPS from EXIF when the upload did not
        // declare them
        let (exif_time, exif_gps) = extract_exif_metadata(bytes);
        let capture_time = metadata.capture_time.or(exif_time);
        let gps = metadata.gps.or(exif_gps);

        let outcome = self.store.insert_image(&NewImage {
            owner_id,
            checksum: signature.checksum.clone(),
            perceptual_hash: Some(signature.perceptual_hash.clone()),
            content_type: metadata.content_type.clone(),
            size_bytes: bytes.len() as i64,
            width: Some(width as i64),
            height: Some(height as i64),
            capture_time: capture_time.map(|t| t.to_rfc3339()),
            gps_latitude: gps.map(|g| g.0),
            gps_longitude: gps.map(|g| g.1),
        })?;

        let image_id = match outcome {
            InsertOutcome::Existing(existing) => {
                tracing::info!(owner_id, image_id = existing, "upload resolved as duplicate");
                return Ok(IngestionResult {
                    image_id: existing,
                    stage: Stage::DuplicateResolved,
                    duplicate_of: Some(existing),
                    near_duplicates: Vec::new(),
                });
            }
            InsertOutcome::Created(id) => id,
        };

        self.store.set_stage(image_id, Stage::Hashed.as_str())?;

        let near_duplicates = self.find_near_duplicates(owner_id, image_id, &signature.perceptual_hash)?;
        if !near_duplicates.is_empty() {
            tracing::info!(
                owner_id,
                image_id,
                candidates = near_duplicates.len(),
                "possible near-duplicates detected"
            );
        }

        // Encrypt and store before acknowledging; everything after this is
        // resumable from the blob store
        let object_key = format!("{}/{}.enc", owner_id, image_id);
        let key = self.keys.derive_object_key(&dek, image_id)?;
        let ciphertext = self.keys.encrypt(bytes, &key)?;

        let put_result = self.with_retries("put", || self.objects.put(&object_key, &ciphertext));
        if let Err(e) = put_result {
            // The plaintext is not persisted anywhere; this record cannot be
            // resumed later
            self.store.mark_failed(image_id, &e.to_string())?;
            return Ok(IngestionResult {
                image_id,
                stage: Stage::Failed,
                duplicate_of: None,
                near_duplicates,
            });
        }

        self.store.set_object_key(image_id, &object_key)?;
        self.store.set_stage(image_id, Stage::Encrypted.as_str())?;

        Ok(IngestionResult {
            image_id,
            stage: Stage::Encrypted,
            duplicate_of: None,
            near_duplicates,
        })
    }

    /// Convenience: ingest and, unless the upload was a duplicate or already
    /// failed, drive the remaining stages to completion inline.
    pub fn ingest_and_process(
        &self,
        owner_id: i64,
        bytes: &[u8],
        metadata: &IngestMetadata,
    ) -> PipelineResult<IngestionResult> {
        let mut result = self.ingest(owner_id, bytes, metadata)?;
        if result.stage == Stage::Encrypted {
            result.stage = self.process(result.image_id)?;
        }
        Ok(result)
    }

    fn find_near_duplicates(
        &self,
        owner_id: i64,
        image_id: i64,
        perceptual_hash: &str,
    ) -> PipelineResult<Vec<i64>> {
        let threshold = self.config.hashing.near_duplicate_threshold;
        let mut hits = Vec::new();
        for (other_id, other_hash) in self.store.phashes_for_owner(owner_id, image_id)? {
            match hashing::hamming_distance(perceptual_hash, &other_hash) {
                Ok(distance) if distance <= threshold => hits.push(other_id),
                Ok(_) => {}
                Err(e) => {
                    // A corrupt stored hash only degrades the advisory signal
                    tracing::warn!(image_id = other_id, error = %e, "skipping unreadable perceptual hash");
                }
            }
        }
        Ok(hits)
    }

    // ========================================================================
    // Stage machine
    // ========================================================================

    /// Drive an image from its recorded stage to a terminal one. Idempotent;
    /// safe to call on any record. Recoverable and clustering failures leave
    /// the record parked at its last completed stage and return the error;
    /// fatal failures move it to `failed`.
    pub fn process(&self, image_id: i64) -> PipelineResult<Stage> {
        // Decoded pixels are cached across stages within one call
        let mut decoded: Option<DynamicImage> = None;

        loop {
            let record = self
                .store
                .get_image(image_id)?
                .ok_or_else(|| PipelineError::Database(format!("image {} not found", image_id)))?;

            let stage = Stage::parse(&record.stage).ok_or_else(|| {
                PipelineError::Database(format!("image {} has unknown stage {:?}", image_id, record.stage))
            })?;

            if stage.is_terminal() {
                return Ok(stage);
            }

            let step = self.advance(&record, stage, &mut decoded);
            match step {
                Ok(()) => continue,
                Err(e) if e.is_recoverable() || matches!(e, PipelineError::Clustering(_)) => {
                    // Parked at the last completed stage for retry
                    self.store.record_error(image_id, &e.to_string())?;
                    tracing::warn!(image_id, stage = %stage, error = %e, "stage parked for retry");
                    return Err(e);
                }
                Err(e) => {
                    self.store.mark_failed(image_id, &e.to_string())?;
                    tracing::error!(image_id, stage = %stage, error = %e, "stage failed");
                    return Ok(Stage::Failed);
                }
            }
        }
    }

    /// Run the single stage after `stage`, recording the new stage on success.
    fn advance(
        &self,
        record: &ImageRecord,
        stage: Stage,
        decoded: &mut Option<DynamicImage>,
    ) -> PipelineResult<()> {
        match stage {
            Stage::Received | Stage::Hashed => {
                // Crashed before the envelope was written; the plaintext is
                // gone and there is nothing to resume from
                Err(PipelineError::Validation(
                    "plaintext was lost before encryption completed".into(),
                ))
            }
            Stage::Encrypted => {
                // Resuming after a crash between face insert and the stage
                // write must not duplicate rows
                if self.store.faces_for_image(record.id)?.is_empty() {
                    let img = self.decoded_image(record, decoded)?;
                    let faces = self
                        .face_engine
                        .detect(&img)
                        .map_err(|e| PipelineError::FaceEngine(e.to_string()))?;

                    for face in &faces {
                        self.store.insert_face(record.id, &face.bbox, &face.embedding)?;
                    }
                    tracing::debug!(image_id = record.id, count = faces.len(), "faces detected");
                }
                self.store.set_stage(record.id, Stage::FacesDetected.as_str())
            }
            Stage::FacesDetected => {
                self.clusterer.cluster_image_faces(record.owner_id, record.id)?;
                self.store.set_stage(record.id, Stage::Clustered.as_str())
            }
            Stage::Clustered => {
                let img = self.decoded_image(record, decoded)?;
                let vector = self
                    .embedder
                    .embed(&img)
                    .map_err(|e| PipelineError::Validation(format!("embedding failed: {}", e)))?;

                if vector.len() != self.config.embedding.dimension {
                    return Err(PipelineError::Dimension {
                        expected: self.config.embedding.dimension,
                        actual: vector.len(),
                    });
                }

                self.store.set_image_embedding(record.id, &vector)?;
                self.owner_index(record.owner_id)?
                    .upsert(record.id, vector, record.capture_time())?;
                self.store.set_stage(record.id, Stage::Embedded.as_str())
            }
            Stage::Embedded => {
                self.organizer.reorganize(record.owner_id)?;
                self.store.set_stage(record.id, Stage::Organized.as_str())
            }
            Stage::Organized => self.store.set_stage(record.id, Stage::Complete.as_str()),
            Stage::DuplicateResolved | Stage::Complete | Stage::Failed => Ok(()),
        }
    }

    /// Fetch, decrypt and decode the stored image, caching the result for
    /// subsequent stages in the same `process` call.
    fn decoded_image(
        &self,
        record: &ImageRecord,
        decoded: &mut Option<DynamicImage>,
    ) -> PipelineResult<DynamicImage> {
        if let Some(img) = decoded {
            return Ok(img.clone());
        }

        let object_key = record.object_key.as_deref().ok_or_else(|| {
            PipelineError::Validation(format!("image {} has no stored object", record.id))
        })?;

        let ciphertext = self
            .with_retries("get", || self.objects.get(object_key))?
            .ok_or_else(|| {
                PipelineError::Storage(format!("object {} missing from storage", object_key))
            })?;

        let dek = self.owner_dek(record.owner_id)?;
        let key = self.keys.derive_object_key(&dek, record.id)?;
        let plaintext = self.keys.decrypt(&ciphertext, &key)?;

        let img = hashing::decode_image(&plaintext)?;
        *decoded = Some(img.clone());
        Ok(img)
    }

    /// Retry recoverable failures with exponential backoff.
    fn with_retries<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> PipelineResult<T>,
    ) -> PipelineResult<T> {
        let mut attempt: u32 = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_recoverable() && attempt + 1 < self.config.retry.max_attempts => {
                    let delay = Duration::from_millis(
                        self.config.retry.base_delay_ms.saturating_mul(1u64 << attempt),
                    );
                    tracing::warn!(op = what, attempt, error = %e, "retrying after backoff");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get_image(&self, image_id: i64) -> PipelineResult<Option<ImageRecord>> {
        self.store.get_image(image_id)
    }

    /// Nearest neighbors among the owner's embedded images, descending by
    /// cosine similarity.
    pub fn query_similar(
        &self,
        owner_id: i64,
        vector: &[f32],
        k: usize,
    ) -> PipelineResult<Vec<(i64, f32)>> {
        self.owner_index(owner_id)?.query_nearest(vector, k, 0.0)
    }

    pub fn list_person_clusters(&self, owner_id: i64) -> PipelineResult<Vec<PersonClusterSummary>> {
        self.store.cluster_summaries(owner_id)
    }

    pub fn rename_person_cluster(
        &self,
        owner_id: i64,
        cluster_id: i64,
        name: &str,
    ) -> PipelineResult<bool> {
        self.store.rename_cluster(owner_id, cluster_id, name)
    }

    /// Explicit album regeneration trigger. Idempotent.
    pub fn reorganize_albums(&self, owner_id: i64) -> PipelineResult<AlbumSummary> {
        self.organizer.reorganize(owner_id)
    }

    pub fn list_albums(&self, owner_id: i64) -> PipelineResult<Vec<AlbumRecord>> {
        self.store.albums_for_owner(owner_id)
    }

    pub fn album_members(&self, album_id: i64) -> PipelineResult<Vec<i64>> {
        self.store.album_members(album_id)
    }

    pub fn create_manual_album(&self, owner_id: i64, name: &str) -> PipelineResult<i64> {
        self.store.create_manual_album(owner_id, name)
    }

    pub fn add_to_album(&self, owner_id: i64, album_id: i64, image_id: i64) -> PipelineResult<()> {
        self.require_manual_album(owner_id, album_id)?;
        self.store.add_to_album(album_id, image_id)
    }

    pub fn remove_from_album(
        &self,
        owner_id: i64,
        album_id: i64,
        image_id: i64,
    ) -> PipelineResult<()> {
        self.require_manual_album(owner_id, album_id)?;
        self.store.remove_from_album(album_id, image_id)
    }

    /// Manual membership edits only apply to manual albums; auto albums are
    /// owned by the organizer.
    fn require_manual_album(&self, owner_id: i64, album_id: i64) -> PipelineResult<()> {
        let albums = self.store.albums_for_owner(owner_id)?;
        match albums.iter().find(|a| a.id == album_id) {
            Some(album) if !album.is_auto => Ok(()),
            Some(_) => Err(PipelineError::Validation(format!(
                "album {} is auto-generated and cannot be edited manually",
                album_id
            ))),
            None => Err(PipelineError::Validation(format!(
                "album {} not found for owner {}",
                album_id, owner_id
            ))),
        }
    }

    // ========================================================================
    // Embedding index management
    // ========================================================================

    /// The owner's index, built lazily from persisted embeddings. One index
    /// per owner keeps similarity queries isolated by construction.
    fn owner_index(&self, owner_id: i64) -> PipelineResult<Arc<EmbeddingIndex>> {
        let mut indexes = self
            .indexes
            .lock()
            .map_err(|_| PipelineError::Database("index table poisoned".into()))?;

        if let Some(index) = indexes.get(&owner_id) {
            return Ok(Arc::clone(index));
        }

        let index = Arc::new(EmbeddingIndex::new(self.config.embedding.dimension));
        index.rebuild(self.stored_embeddings(owner_id)?)?;
        indexes.insert(owner_id, Arc::clone(&index));
        Ok(index)
    }

    /// Drop and rebuild the owner's index from Image rows.
    pub fn rebuild_index(&self, owner_id: i64) -> PipelineResult<()> {
        let index = self.owner_index(owner_id)?;
        index.rebuild(self.stored_embeddings(owner_id)?)
    }

    fn stored_embeddings(
        &self,
        owner_id: i64,
    ) -> PipelineResult<Vec<(i64, Vec<f32>, Option<DateTime<Utc>>)>> {
        Ok(self
            .store
            .embeddings_for_owner(owner_id)?
            .into_iter()
            .map(|(id, vector, capture_time)| {
                let parsed = capture_time
                    .as_deref()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&Utc));
                (id, vector, parsed)
            })
            .collect())
    }

    // ========================================================================
    // Worker pool
    // ========================================================================

    /// Spawn worker threads that drain queued image ids through `process`.
    pub fn spawn_workers(pipeline: &Arc<Self>, count: usize) -> WorkerPool {
        let (tx, rx) = mpsc::channel::<i64>();
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..count.max(1))
            .map(|worker| {
                let pipeline = Arc::clone(pipeline);
                let rx = Arc::clone(&rx);
                std::thread::spawn(move || loop {
                    let next = match rx.lock() {
                        Ok(guard) => guard.recv(),
                        Err(_) => break,
                    };
                    match next {
                        Ok(image_id) => {
                            if let Err(e) = pipeline.process(image_id) {
                                tracing::warn!(worker, image_id, error = %e, "processing parked");
                            }
                        }
                        Err(_) => break, // channel closed
                    }
                })
            })
            .collect();

        WorkerPool {
            tx: Some(tx),
            handles,
        }
    }
}

/// Handle to the background processing threads. Dropping it closes the queue
/// and joins the workers.
pub struct WorkerPool {
    tx: Option<mpsc::Sender<i64>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Queue an image for background processing. Returns false if the pool
    /// has shut down.
    pub fn enqueue(&self, image_id: i64) -> bool {
        match &self.tx {
            Some(tx) => tx.send(image_id).is_ok(),
            None => false,
        }
    }

    pub fn shutdown(mut self) {
        self.join_inner();
    }

    fn join_inner(&mut self) {
        self.tx = None; // close the queue
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.join_inner();
    }
}

/// Pull capture time and GPS coordinates out of EXIF, if any.
fn extract_exif_metadata(bytes: &[u8]) -> (Option<DateTime<Utc>>, Option<(f64, f64)>) {
    let mut cursor = std::io::Cursor::new(bytes);
    let exif = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(exif) => exif,
        Err(_) => return (None, None),
    };

    let capture_time = exif
        .get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)
        .and_then(|field| {
            let raw = field.display_value().to_string();
            let trimmed = raw.trim_matches('"');
            NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S")
                .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y:%m:%d %H:%M:%S"))
                .ok()
        })
        .map(|naive| Utc.from_utc_datetime(&naive));

    let gps = read_gps(&exif);

    (capture_time, gps)
}

fn read_gps(exif: &exif::Exif) -> Option<(f64, f64)> {
    let lat_field = exif.get_field(exif::Tag::GPSLatitude, exif::In::PRIMARY)?;
    let lat_ref = exif.get_field(exif::Tag::GPSLatitudeRef, exif::In::PRIMARY)?;
    let lon_field = exif.get_field(exif::Tag::GPSLongitude, exif::In::PRIMARY)?;
    let lon_ref = exif.get_field(exif::Tag::GPSLongitudeRef, exif::In::PRIMARY)?;

    let (lat_vals, lon_vals) = match (&lat_field.value, &lon_field.value) {
        (exif::Value::Rational(lat), exif::Value::Rational(lon))
            if lat.len() >= 3 && lon.len() >= 3 =>
        {
            (lat, lon)
        }
        _ => return None,
    };

    let lat = dms_to_decimal(
        lat_vals[0].num as f64 / lat_vals[0].denom as f64,
        lat_vals[1].num as f64 / lat_vals[1].denom as f64,
        lat_vals[2].num as f64 / lat_vals[2].denom as f64,
    );
    let lon = dms_to_decimal(
        lon_vals[0].num as f64 / lon_vals[0].denom as f64,
        lon_vals[1].num as f64 / lon_vals[1].denom as f64,
        lon_vals[2].num as f64 / lon_vals[2].denom as f64,
    );

    let lat = if lat_ref.display_value().to_string().contains('S') {
        -lat
    } else {
        lat
    };
    let lon = if lon_ref.display_value().to_string().contains('W') {
        -lon
    } else {
        lon
    };

    Some((lat, lon))
}

fn dms_to_decimal(degrees: f64, minutes: f64, seconds: f64) -> f64 {
    degrees + minutes / 60.0 + seconds / 3600.0
}
