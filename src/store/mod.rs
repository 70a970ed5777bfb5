//! Metadata persistence on SQLite.
//!
//! Owns every record type the pipeline derives: users, images, faces, person
//! clusters and albums. The `(owner_id, checksum)` uniqueness constraint is
//! the atomic check-and-insert that makes deduplication race-safe, and the
//! `version` column on person clusters backs the optimistic centroid update
//! protocol.

mod schema;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::{PipelineError, PipelineResult};
pub use schema::{MIGRATIONS, SCHEMA};

/// Normalized face bounding box, all coordinates in [0,1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

/// An image row
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub id: i64,
    pub owner_id: i64,
    pub checksum: String,
    pub perceptual_hash: Option<String>,
    pub content_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub object_key: Option<String>,
    pub capture_time: Option<String>,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
    pub embedding: Option<Vec<f32>>,
    pub stage: String,
    pub last_error: Option<String>,
}

impl ImageRecord {
    /// Parsed capture time, if the stored value is valid RFC 3339.
    pub fn capture_time(&self) -> Option<DateTime<Utc>> {
        self.capture_time
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// A detected face row
#[derive(Debug, Clone)]
pub struct FaceRecord {
    pub id: i64,
    pub image_id: i64,
    pub bbox: FaceBox,
    pub embedding: Vec<f32>,
    pub cluster_id: Option<i64>,
}

/// A person cluster row
#[derive(Debug, Clone)]
pub struct ClusterRecord {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub centroid: Vec<f32>,
    pub member_count: i64,
    pub version: i64,
}

/// Cluster listing entry for callers
#[derive(Debug, Clone)]
pub struct PersonClusterSummary {
    pub id: i64,
    pub name: String,
    pub member_count: i64,
}

/// An album row
#[derive(Debug, Clone)]
pub struct AlbumRecord {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub kind: String,
    pub bucket_key: Option<String>,
    pub center_lat: Option<f64>,
    pub center_lng: Option<f64>,
    pub is_auto: bool,
}

/// Fields for a new image row
#[derive(Debug, Clone)]
pub struct NewImage {
    pub owner_id: i64,
    pub checksum: String,
    pub perceptual_hash: Option<String>,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub capture_time: Option<String>,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
}

/// Outcome of the atomic dedup check-and-insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new row was created
    Created(i64),
    /// The (owner, checksum) pair already existed; this is the winner's id
    Existing(i64),
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> PipelineResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn open_in_memory() -> PipelineResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> PipelineResult<()> {
        let conn = self.conn()?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        for migration in MIGRATIONS {
            // Additive; re-adding an existing column fails harmlessly
            let _ = conn.execute(migration, []);
        }
        Ok(())
    }

    fn conn(&self) -> PipelineResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PipelineError::Database("store mutex poisoned".into()))
    }

    // ========================================================================
    // Users
    // ========================================================================

    /// Register an owner with their wrapped DEK. Idempotent: an existing row
    /// keeps its key.
    pub fn upsert_user(&self, owner_id: i64, wrapped_dek: &str) -> PipelineResult<()> {
        self.conn()?.execute(
            "INSERT OR IGNORE INTO users (id, wrapped_dek) VALUES (?, ?)",
            params![owner_id, wrapped_dek],
        )?;
        Ok(())
    }

    pub fn wrapped_dek(&self, owner_id: i64) -> PipelineResult<Option<String>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            "SELECT wrapped_dek FROM users WHERE id = ?",
            [owner_id],
            |row| row.get(0),
        );
        match result {
            Ok(dek) => Ok(Some(dek)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // ========================================================================
    // Images
    // ========================================================================

    /// Atomic dedup check-and-insert on (owner, checksum). A concurrent
    /// duplicate upload loses the race on the uniqueness constraint and is
    /// resolved to the winner's row.
    pub fn insert_image(&self, new: &NewImage) -> PipelineResult<InsertOutcome> {
        let conn = self.conn()?;
        let result = conn.execute(
            r#"
            INSERT INTO images (
                owner_id, checksum, perceptual_hash, content_type, size_bytes,
                width, height, capture_time, gps_latitude, gps_longitude, stage
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'received')
            "#,
            params![
                new.owner_id,
                new.checksum,
                new.perceptual_hash,
                new.content_type,
                new.size_bytes,
                new.width,
                new.height,
                new.capture_time,
                new.gps_latitude,
                new.gps_longitude,
            ],
        );

        match result {
            Ok(_) => Ok(InsertOutcome::Created(conn.last_insert_rowid())),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                // Lost the race (or a plain re-upload): re-read the winner
                let id = conn.query_row(
                    "SELECT id FROM images WHERE owner_id = ? AND checksum = ?",
                    params![new.owner_id, new.checksum],
                    |row| row.get(0),
                )?;
                Ok(InsertOutcome::Existing(id))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_image(&self, image_id: i64) -> PipelineResult<Option<ImageRecord>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            r#"
            SELECT id, owner_id, checksum, perceptual_hash, content_type,
                   size_bytes, width, height, object_key, capture_time,
                   gps_latitude, gps_longitude, embedding, stage, last_error
            FROM images WHERE id = ?
            "#,
            [image_id],
            |row| {
                let embedding: Option<Vec<u8>> = row.get(12)?;
                Ok(ImageRecord {
                    id: row.get(0)?,
                    owner_id: row.get(1)?,
                    checksum: row.get(2)?,
                    perceptual_hash: row.get(3)?,
                    content_type: row.get(4)?,
                    size_bytes: row.get(5)?,
                    width: row.get(6)?,
                    height: row.get(7)?,
                    object_key: row.get(8)?,
                    capture_time: row.get(9)?,
                    gps_latitude: row.get(10)?,
                    gps_longitude: row.get(11)?,
                    embedding: embedding.map(|b| bytes_to_embedding(&b)),
                    stage: row.get(13)?,
                    last_error: row.get(14)?,
                })
            },
        );

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set_stage(&self, image_id: i64, stage: &str) -> PipelineResult<()> {
        self.conn()?.execute(
            "UPDATE images SET stage = ?, last_error = NULL WHERE id = ?",
            params![stage, image_id],
        )?;
        Ok(())
    }

    /// Record an error without moving the stage (recoverable failures park
    /// the record where it was).
    pub fn record_error(&self, image_id: i64, error: &str) -> PipelineResult<()> {
        self.conn()?.execute(
            "UPDATE images SET last_error = ? WHERE id = ?",
            params![error, image_id],
        )?;
        Ok(())
    }

    pub fn mark_failed(&self, image_id: i64, error: &str) -> PipelineResult<()> {
        self.conn()?.execute(
            "UPDATE images SET stage = 'failed', last_error = ? WHERE id = ?",
            params![error, image_id],
        )?;
        Ok(())
    }

    pub fn set_object_key(&self, image_id: i64, object_key: &str) -> PipelineResult<()> {
        self.conn()?.execute(
            "UPDATE images SET object_key = ? WHERE id = ?",
            params![object_key, image_id],
        )?;
        Ok(())
    }

    pub fn set_image_embedding(&self, image_id: i64, embedding: &[f32]) -> PipelineResult<()> {
        self.conn()?.execute(
            "UPDATE images SET embedding = ?, embedding_dim = ? WHERE id = ?",
            params![embedding_to_bytes(embedding), embedding.len() as i64, image_id],
        )?;
        Ok(())
    }

    /// Perceptual hashes of the owner's other images, for the advisory
    /// near-duplicate check.
    pub fn phashes_for_owner(
        &self,
        owner_id: i64,
        exclude_image: i64,
    ) -> PipelineResult<Vec<(i64, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, perceptual_hash FROM images
            WHERE owner_id = ? AND id != ? AND perceptual_hash IS NOT NULL
            "#,
        )?;
        let rows = stmt
            .query_map(params![owner_id, exclude_image], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn images_for_owner(&self, owner_id: i64) -> PipelineResult<Vec<ImageRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, owner_id, checksum, perceptual_hash, content_type,
                   size_bytes, width, height, object_key, capture_time,
                   gps_latitude, gps_longitude, embedding, stage, last_error
            FROM images WHERE owner_id = ? ORDER BY id
            "#,
        )?;
        let rows = stmt
            .query_map([owner_id], |row| {
                let embedding: Option<Vec<u8>> = row.get(12)?;
                Ok(ImageRecord {
                    id: row.get(0)?,
                    owner_id: row.get(1)?,
                    checksum: row.get(2)?,
                    perceptual_hash: row.get(3)?,
                    content_type: row.get(4)?,
                    size_bytes: row.get(5)?,
                    width: row.get(6)?,
                    height: row.get(7)?,
                    object_key: row.get(8)?,
                    capture_time: row.get(9)?,
                    gps_latitude: row.get(10)?,
                    gps_longitude: row.get(11)?,
                    embedding: embedding.map(|b| bytes_to_embedding(&b)),
                    stage: row.get(13)?,
                    last_error: row.get(14)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// All computed embeddings for an owner, for index rebuilds.
    pub fn embeddings_for_owner(
        &self,
        owner_id: i64,
    ) -> PipelineResult<Vec<(i64, Vec<f32>, Option<String>)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, embedding, capture_time FROM images
            WHERE owner_id = ? AND embedding IS NOT NULL
            "#,
        )?;
        let rows = stmt
            .query_map([owner_id], |row| {
                let bytes: Vec<u8> = row.get(1)?;
                Ok((row.get(0)?, bytes_to_embedding(&bytes), row.get(2)?))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    // ========================================================================
    // Faces
    // ========================================================================

    pub fn insert_face(
        &self,
        image_id: i64,
        bbox: &FaceBox,
        embedding: &[f32],
    ) -> PipelineResult<i64> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO faces (image_id, bbox_x, bbox_y, bbox_w, bbox_h, embedding, embedding_dim)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                image_id,
                bbox.x,
                bbox.y,
                bbox.w,
                bbox.h,
                embedding_to_bytes(embedding),
                embedding.len() as i64,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn faces_for_image(&self, image_id: i64) -> PipelineResult<Vec<FaceRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, image_id, bbox_x, bbox_y, bbox_w, bbox_h, embedding, cluster_id
            FROM faces WHERE image_id = ? ORDER BY id
            "#,
        )?;
        let rows = stmt
            .query_map([image_id], |row| {
                let bytes: Vec<u8> = row.get(6)?;
                Ok(FaceRecord {
                    id: row.get(0)?,
                    image_id: row.get(1)?,
                    bbox: FaceBox {
                        x: row.get(2)?,
                        y: row.get(3)?,
                        w: row.get(4)?,
                        h: row.get(5)?,
                    },
                    embedding: bytes_to_embedding(&bytes),
                    cluster_id: row.get(7)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn assign_face_to_cluster(&self, face_id: i64, cluster_id: i64) -> PipelineResult<()> {
        self.conn()?.execute(
            "UPDATE faces SET cluster_id = ? WHERE id = ?",
            params![cluster_id, face_id],
        )?;
        Ok(())
    }

    /// Distinct images containing at least one face of the given cluster.
    pub fn image_ids_for_cluster(&self, cluster_id: i64) -> PipelineResult<Vec<i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT image_id FROM faces WHERE cluster_id = ? ORDER BY image_id",
        )?;
        let rows = stmt
            .query_map([cluster_id], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    // ========================================================================
    // Person clusters
    // ========================================================================

    pub fn clusters_for_owner(&self, owner_id: i64) -> PipelineResult<Vec<ClusterRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, owner_id, name, centroid, member_count, version
            FROM person_clusters WHERE owner_id = ? ORDER BY id
            "#,
        )?;
        let rows = stmt
            .query_map([owner_id], |row| {
                let bytes: Vec<u8> = row.get(3)?;
                Ok(ClusterRecord {
                    id: row.get(0)?,
                    owner_id: row.get(1)?,
                    name: row.get(2)?,
                    centroid: bytes_to_embedding(&bytes),
                    member_count: row.get(4)?,
                    version: row.get(5)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn create_cluster(
        &self,
        owner_id: i64,
        name: &str,
        centroid: &[f32],
    ) -> PipelineResult<i64> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO person_clusters (owner_id, name, centroid, centroid_dim, member_count)
            VALUES (?, ?, ?, ?, 1)
            "#,
            params![
                owner_id,
                name,
                embedding_to_bytes(centroid),
                centroid.len() as i64
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Optimistic centroid write: succeeds only if nobody bumped the version
    /// since it was read. Returns false on a stale write so the caller can
    /// re-read and retry.
    pub fn try_update_centroid(
        &self,
        cluster_id: i64,
        centroid: &[f32],
        member_count: i64,
        expected_version: i64,
    ) -> PipelineResult<bool> {
        let changed = self.conn()?.execute(
            r#"
            UPDATE person_clusters
            SET centroid = ?, centroid_dim = ?, member_count = ?, version = version + 1
            WHERE id = ? AND version = ?
            "#,
            params![
                embedding_to_bytes(centroid),
                centroid.len() as i64,
                member_count,
                cluster_id,
                expected_version,
            ],
        )?;
        Ok(changed == 1)
    }

    pub fn cluster_summaries(&self, owner_id: i64) -> PipelineResult<Vec<PersonClusterSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, name, member_count FROM person_clusters
            WHERE owner_id = ? ORDER BY member_count DESC, id
            "#,
        )?;
        let rows = stmt
            .query_map([owner_id], |row| {
                Ok(PersonClusterSummary {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    member_count: row.get(2)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Rename a cluster; the owner check keeps one user from relabeling
    /// another's people.
    pub fn rename_cluster(
        &self,
        owner_id: i64,
        cluster_id: i64,
        name: &str,
    ) -> PipelineResult<bool> {
        let changed = self.conn()?.execute(
            "UPDATE person_clusters SET name = ? WHERE id = ? AND owner_id = ?",
            params![name, cluster_id, owner_id],
        )?;
        Ok(changed == 1)
    }

    // ========================================================================
    // Albums
    // ========================================================================

    pub fn get_or_create_auto_album(
        &self,
        owner_id: i64,
        kind: &str,
        bucket_key: &str,
        name: &str,
        center: Option<(f64, f64)>,
    ) -> PipelineResult<i64> {
        let conn = self.conn()?;
        let existing: Option<i64> = match conn.query_row(
            "SELECT id FROM albums WHERE owner_id = ? AND kind = ? AND bucket_key = ?",
            params![owner_id, kind, bucket_key],
            |row| row.get(0),
        ) {
            Ok(id) => Some(id),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        if let Some(id) = existing {
            // Keep the display name current (a renamed person cluster renames
            // its album on the next pass)
            conn.execute(
                "UPDATE albums SET name = ? WHERE id = ?",
                params![name, id],
            )?;
            return Ok(id);
        }

        conn.execute(
            r#"
            INSERT INTO albums (owner_id, name, kind, bucket_key, center_lat, center_lng, is_auto)
            VALUES (?, ?, ?, ?, ?, ?, 1)
            "#,
            params![
                owner_id,
                name,
                kind,
                bucket_key,
                center.map(|c| c.0),
                center.map(|c| c.1),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Replace an album's membership wholesale. Auto albums are reconciled by
    /// regeneration, never patched incrementally.
    pub fn replace_album_members(&self, album_id: i64, image_ids: &[i64]) -> PipelineResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM album_images WHERE album_id = ?", [album_id])?;
        for image_id in image_ids {
            tx.execute(
                "INSERT OR IGNORE INTO album_images (album_id, image_id) VALUES (?, ?)",
                params![album_id, image_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Delete auto albums of one kind whose bucket no longer exists.
    pub fn delete_stale_auto_albums(
        &self,
        owner_id: i64,
        kind: &str,
        live_keys: &[String],
    ) -> PipelineResult<usize> {
        let stale: Vec<i64> = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                "SELECT id, bucket_key FROM albums WHERE owner_id = ? AND kind = ? AND is_auto = 1",
            )?;
            let ids: Vec<i64> = stmt
                .query_map(params![owner_id, kind], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?))
                })?
                .filter_map(|r| r.ok())
                .filter(|(_, key)| match key {
                    Some(key) => !live_keys.contains(key),
                    None => false,
                })
                .map(|(id, _)| id)
                .collect();
            ids
        };

        let conn = self.conn()?;
        for id in &stale {
            conn.execute("DELETE FROM albums WHERE id = ?", [id])?;
        }
        Ok(stale.len())
    }

    pub fn albums_for_owner(&self, owner_id: i64) -> PipelineResult<Vec<AlbumRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, owner_id, name, kind, bucket_key, center_lat, center_lng, is_auto
            FROM albums WHERE owner_id = ? ORDER BY kind, name
            "#,
        )?;
        let rows = stmt
            .query_map([owner_id], |row| {
                Ok(AlbumRecord {
                    id: row.get(0)?,
                    owner_id: row.get(1)?,
                    name: row.get(2)?,
                    kind: row.get(3)?,
                    bucket_key: row.get(4)?,
                    center_lat: row.get(5)?,
                    center_lng: row.get(6)?,
                    is_auto: row.get::<_, i64>(7)? != 0,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn album_members(&self, album_id: i64) -> PipelineResult<Vec<i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT image_id FROM album_images WHERE album_id = ? ORDER BY image_id",
        )?;
        let rows = stmt
            .query_map([album_id], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn create_manual_album(&self, owner_id: i64, name: &str) -> PipelineResult<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO albums (owner_id, name, kind, is_auto) VALUES (?, ?, 'manual', 0)",
            params![owner_id, name],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn add_to_album(&self, album_id: i64, image_id: i64) -> PipelineResult<()> {
        self.conn()?.execute(
            "INSERT OR IGNORE INTO album_images (album_id, image_id) VALUES (?, ?)",
            params![album_id, image_id],
        )?;
        Ok(())
    }

    pub fn remove_from_album(&self, album_id: i64, image_id: i64) -> PipelineResult<()> {
        self.conn()?.execute(
            "DELETE FROM album_images WHERE album_id = ? AND image_id = ?",
            params![album_id, image_id],
        )?;
        Ok(())
    }
}

/// Convert f32 slice to bytes for storage
pub(crate) fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

/// Convert bytes back to f32 vector
pub(crate) fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let mut arr = [0u8; 4];
            arr.copy_from_slice(chunk);
            f32::from_le_bytes(arr)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        let store = Store::open_in_memory().unwrap();
        store.upsert_user(1, "wrapped-a").unwrap();
        store.upsert_user(2, "wrapped-b").unwrap();
        store
    }

    fn new_image(owner_id: i64, checksum: &str) -> NewImage {
        NewImage {
            owner_id,
            checksum: checksum.to_string(),
            perceptual_hash: Some("AAAA".to_string()),
            content_type: Some("image/png".to_string()),
            size_bytes: 1024,
            width: Some(640),
            height: Some(480),
            capture_time: Some("2024-06-01T12:00:00+00:00".to_string()),
            gps_latitude: None,
            gps_longitude: None,
        }
    }

    #[test]
    fn test_embedding_conversion() {
        let original = vec![1.5, -2.3, 0.0, 100.0];
        let bytes = embedding_to_bytes(&original);
        let recovered = bytes_to_embedding(&bytes);
        assert_eq!(original, recovered);
    }

    #[test]
    fn test_user_upsert_is_idempotent() {
        let store = store();
        assert_eq!(store.wrapped_dek(1).unwrap().unwrap(), "wrapped-a");

        // Second upsert must not clobber the existing key
        store.upsert_user(1, "other").unwrap();
        assert_eq!(store.wrapped_dek(1).unwrap().unwrap(), "wrapped-a");
        assert!(store.wrapped_dek(99).unwrap().is_none());
    }

    #[test]
    fn test_insert_image_dedups_per_owner() {
        let store = store();

        let first = store.insert_image(&new_image(1, "c1")).unwrap();
        let id = match first {
            InsertOutcome::Created(id) => id,
            InsertOutcome::Existing(_) => panic!("first insert must create"),
        };

        // Same owner, same checksum: resolves to the winner
        let second = store.insert_image(&new_image(1, "c1")).unwrap();
        assert_eq!(second, InsertOutcome::Existing(id));

        // Different owner, same checksum: distinct record
        let other = store.insert_image(&new_image(2, "c1")).unwrap();
        match other {
            InsertOutcome::Created(other_id) => assert_ne!(other_id, id),
            InsertOutcome::Existing(_) => panic!("cross-owner upload must create"),
        }
    }

    #[test]
    fn test_stage_and_error_tracking() {
        let store = store();
        let id = match store.insert_image(&new_image(1, "c1")).unwrap() {
            InsertOutcome::Created(id) => id,
            InsertOutcome::Existing(_) => unreachable!(),
        };

        assert_eq!(store.get_image(id).unwrap().unwrap().stage, "received");

        store.set_stage(id, "hashed").unwrap();
        store.record_error(id, "storage unreachable").unwrap();
        let record = store.get_image(id).unwrap().unwrap();
        assert_eq!(record.stage, "hashed");
        assert_eq!(record.last_error.as_deref(), Some("storage unreachable"));

        // Advancing a stage clears the stale error
        store.set_stage(id, "encrypted").unwrap();
        assert!(store.get_image(id).unwrap().unwrap().last_error.is_none());

        store.mark_failed(id, "gave up").unwrap();
        let record = store.get_image(id).unwrap().unwrap();
        assert_eq!(record.stage, "failed");
        assert_eq!(record.last_error.as_deref(), Some("gave up"));
    }

    #[test]
    fn test_capture_time_parsing() {
        let store = store();
        let id = match store.insert_image(&new_image(1, "c1")).unwrap() {
            InsertOutcome::Created(id) => id,
            InsertOutcome::Existing(_) => unreachable!(),
        };
        let record = store.get_image(id).unwrap().unwrap();
        let parsed = record.capture_time().unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-06-01T12:00:00+00:00");
    }

    #[test]
    fn test_faces_and_clusters() {
        let store = store();
        let image_id = match store.insert_image(&new_image(1, "c1")).unwrap() {
            InsertOutcome::Created(id) => id,
            InsertOutcome::Existing(_) => unreachable!(),
        };

        let bbox = FaceBox { x: 0.1, y: 0.2, w: 0.3, h: 0.4 };
        let face_id = store.insert_face(image_id, &bbox, &[1.0, 0.0]).unwrap();

        let faces = store.faces_for_image(image_id).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].bbox, bbox);
        assert!(faces[0].cluster_id.is_none());

        let cluster_id = store.create_cluster(1, "Person 1", &[1.0, 0.0]).unwrap();
        store.assign_face_to_cluster(face_id, cluster_id).unwrap();
        assert_eq!(
            store.faces_for_image(image_id).unwrap()[0].cluster_id,
            Some(cluster_id)
        );
        assert_eq!(store.image_ids_for_cluster(cluster_id).unwrap(), vec![image_id]);
    }

    #[test]
    fn test_optimistic_centroid_update() {
        let store = store();
        let cluster_id = store.create_cluster(1, "Person 1", &[1.0, 0.0]).unwrap();

        let cluster = &store.clusters_for_owner(1).unwrap()[0];
        assert_eq!(cluster.version, 0);

        // Write at the observed version succeeds and bumps it
        assert!(store
            .try_update_centroid(cluster_id, &[0.9, 0.1], 2, 0)
            .unwrap());

        // A second write against the stale version is rejected
        assert!(!store
            .try_update_centroid(cluster_id, &[0.5, 0.5], 3, 0)
            .unwrap());

        let cluster = &store.clusters_for_owner(1).unwrap()[0];
        assert_eq!(cluster.version, 1);
        assert_eq!(cluster.member_count, 2);
        assert_eq!(cluster.centroid, vec![0.9, 0.1]);
    }

    #[test]
    fn test_album_reconciliation_primitives() {
        let store = store();
        let a = match store.insert_image(&new_image(1, "c1")).unwrap() {
            InsertOutcome::Created(id) => id,
            InsertOutcome::Existing(_) => unreachable!(),
        };
        let b = match store.insert_image(&new_image(1, "c2")).unwrap() {
            InsertOutcome::Created(id) => id,
            InsertOutcome::Existing(_) => unreachable!(),
        };

        let album = store
            .get_or_create_auto_album(1, "date", "date:2024-06-01", "June 1, 2024", None)
            .unwrap();
        // Same bucket resolves to the same album
        let again = store
            .get_or_create_auto_album(1, "date", "date:2024-06-01", "June 1, 2024", None)
            .unwrap();
        assert_eq!(album, again);

        store.replace_album_members(album, &[a, b]).unwrap();
        assert_eq!(store.album_members(album).unwrap(), vec![a, b]);
        store.replace_album_members(album, &[a]).unwrap();
        assert_eq!(store.album_members(album).unwrap(), vec![a]);

        // Stale bucket cleanup leaves live keys and manual albums alone
        let manual = store.create_manual_album(1, "Favorites").unwrap();
        store.add_to_album(manual, a).unwrap();
        let deleted = store
            .delete_stale_auto_albums(1, "date", &["date:2024-06-02".to_string()])
            .unwrap();
        assert_eq!(deleted, 1);
        let remaining = store.albums_for_owner(1).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].kind, "manual");
        assert_eq!(store.album_members(manual).unwrap(), vec![a]);
    }
}
