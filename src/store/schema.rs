pub const SCHEMA: &str = r#"
-- Users: owner identities and their wrapped data-encryption keys.
-- The plaintext DEK is never stored; only the master-key-wrapped form.
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    wrapped_dek TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- Images: one row per accepted upload
CREATE TABLE IF NOT EXISTS images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL,
    checksum TEXT NOT NULL,         -- SHA-256 over canonical decoded pixels
    perceptual_hash TEXT,           -- base64 DCT hash for near-duplicate checks
    content_type TEXT,
    size_bytes INTEGER,
    width INTEGER,
    height INTEGER,

    -- Opaque reference into the blob store; NULL until encrypted
    object_key TEXT,

    -- Source metadata (upload-declared or EXIF)
    capture_time TEXT,
    gps_latitude REAL,
    gps_longitude REAL,

    -- Semantic embedding, float32 array stored as bytes
    embedding BLOB,
    embedding_dim INTEGER,

    -- Pipeline state machine; single source of truth for resume
    stage TEXT NOT NULL DEFAULT 'received',
    last_error TEXT,

    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (owner_id) REFERENCES users(id) ON DELETE CASCADE,
    UNIQUE (owner_id, checksum)
);

CREATE INDEX IF NOT EXISTS idx_images_owner ON images(owner_id);
CREATE INDEX IF NOT EXISTS idx_images_stage ON images(stage);
CREATE INDEX IF NOT EXISTS idx_images_capture_time ON images(capture_time);

-- Faces: detected regions with embeddings; bbox is normalized to [0,1]
CREATE TABLE IF NOT EXISTS faces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    image_id INTEGER NOT NULL,
    bbox_x REAL NOT NULL,
    bbox_y REAL NOT NULL,
    bbox_w REAL NOT NULL,
    bbox_h REAL NOT NULL,
    embedding BLOB NOT NULL,
    embedding_dim INTEGER NOT NULL,
    cluster_id INTEGER,             -- NULL until clustering runs
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (image_id) REFERENCES images(id) ON DELETE CASCADE,
    FOREIGN KEY (cluster_id) REFERENCES person_clusters(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_faces_image ON faces(image_id);
CREATE INDEX IF NOT EXISTS idx_faces_cluster ON faces(cluster_id);

-- Person clusters: per-owner running centroids over face embeddings.
-- version guards concurrent centroid writes (optimistic check-and-bump).
CREATE TABLE IF NOT EXISTS person_clusters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    centroid BLOB NOT NULL,
    centroid_dim INTEGER NOT NULL,
    member_count INTEGER NOT NULL DEFAULT 0,
    version INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (owner_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_person_clusters_owner ON person_clusters(owner_id);

-- Albums: auto-generated partitions (date/location/person) plus manual sets.
-- bucket_key identifies an auto bucket stably across regenerations; NULL for
-- manual albums.
CREATE TABLE IF NOT EXISTS albums (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,             -- 'date', 'location', 'person', 'manual'
    bucket_key TEXT,
    center_lat REAL,
    center_lng REAL,
    is_auto INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (owner_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_albums_bucket
    ON albums(owner_id, kind, bucket_key) WHERE bucket_key IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_albums_owner ON albums(owner_id);

-- Album membership
CREATE TABLE IF NOT EXISTS album_images (
    album_id INTEGER NOT NULL,
    image_id INTEGER NOT NULL,
    added_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (album_id, image_id),
    FOREIGN KEY (album_id) REFERENCES albums(id) ON DELETE CASCADE,
    FOREIGN KEY (image_id) REFERENCES images(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_album_images_image ON album_images(image_id);
"#;

/// Additive migrations for databases created before a column existed.
/// Failures are ignored so re-adding an existing column is harmless.
pub const MIGRATIONS: &[&str] = &[
    "ALTER TABLE images ADD COLUMN last_error TEXT",
    "ALTER TABLE images ADD COLUMN content_type TEXT",
    "ALTER TABLE person_clusters ADD COLUMN version INTEGER NOT NULL DEFAULT 0",
];
