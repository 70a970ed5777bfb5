//! Automatic album generation.
//!
//! A pure derivation over already-computed image, face and person-cluster
//! state: three partitions (calendar day, location, person) reconciled
//! against the stored auto albums by stable bucket key. Regenerating with
//! unchanged inputs reproduces identical membership; manual albums and
//! manual edits are never touched. Runs are serialized per owner so two
//! concurrent passes cannot race each other's reconciliation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::config::AlbumConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::store::{ImageRecord, Store};

/// Counts from one reorganization pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlbumSummary {
    pub date_albums: usize,
    pub location_albums: usize,
    pub person_albums: usize,
}

pub struct AlbumOrganizer {
    store: Arc<Store>,
    location_radius_km: f64,
    min_person_album_faces: usize,
    owner_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl AlbumOrganizer {
    pub fn new(store: Arc<Store>, config: &AlbumConfig) -> Self {
        Self {
            store,
            location_radius_km: config.location_radius_km,
            min_person_album_faces: config.min_person_album_faces,
            owner_locks: Mutex::new(HashMap::new()),
        }
    }

    fn owner_lock(&self, owner_id: i64) -> PipelineResult<Arc<Mutex<()>>> {
        let mut locks = self
            .owner_locks
            .lock()
            .map_err(|_| PipelineError::Database("organizer lock table poisoned".into()))?;
        Ok(Arc::clone(locks.entry(owner_id).or_default()))
    }

    /// Regenerate the owner's auto albums from current state.
    pub fn reorganize(&self, owner_id: i64) -> PipelineResult<AlbumSummary> {
        let lock = self.owner_lock(owner_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| PipelineError::Database("organizer lock poisoned".into()))?;

        let images: Vec<ImageRecord> = self
            .store
            .images_for_owner(owner_id)?
            .into_iter()
            .filter(|img| img.stage != "failed")
            .collect();

        let summary = AlbumSummary {
            date_albums: self.reconcile_date_albums(owner_id, &images)?,
            location_albums: self.reconcile_location_albums(owner_id, &images)?,
            person_albums: self.reconcile_person_albums(owner_id)?,
        };

        tracing::info!(
            owner_id,
            date = summary.date_albums,
            location = summary.location_albums,
            person = summary.person_albums,
            "albums reorganized"
        );
        Ok(summary)
    }

    fn reconcile_date_albums(
        &self,
        owner_id: i64,
        images: &[ImageRecord],
    ) -> PipelineResult<usize> {
        // BTreeMap keeps bucket iteration deterministic
        let mut buckets: BTreeMap<String, Vec<i64>> = BTreeMap::new();
        for img in images {
            if let Some(taken) = img.capture_time() {
                let day = taken.format("%Y-%m-%d").to_string();
                buckets.entry(day).or_default().push(img.id);
            }
        }

        let mut live_keys = Vec::new();
        for (day, members) in &buckets {
            let bucket_key = format!("date:{}", day);
            let album_id =
                self.store
                    .get_or_create_auto_album(owner_id, "date", &bucket_key, day, None)?;
            self.store.replace_album_members(album_id, members)?;
            live_keys.push(bucket_key);
        }

        self.store
            .delete_stale_auto_albums(owner_id, "date", &live_keys)?;
        Ok(live_keys.len())
    }

    fn reconcile_location_albums(
        &self,
        owner_id: i64,
        images: &[ImageRecord],
    ) -> PipelineResult<usize> {
        // Greedy nearest-center grouping in ascending image-id order; the
        // deterministic order makes regeneration converge on the same centers
        // for unchanged inputs.
        let mut centers: Vec<(f64, f64, Vec<i64>)> = Vec::new();

        for img in images {
            let (lat, lng) = match (img.gps_latitude, img.gps_longitude) {
                (Some(lat), Some(lng)) => (lat, lng),
                _ => continue,
            };

            let nearest = centers
                .iter_mut()
                .map(|center| (haversine_km(lat, lng, center.0, center.1), center))
                .filter(|(dist, _)| *dist <= self.location_radius_km)
                .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

            match nearest {
                Some((_, center)) => center.2.push(img.id),
                None => centers.push((lat, lng, vec![img.id])),
            }
        }

        let mut live_keys = Vec::new();
        for (lat, lng, members) in &centers {
            let bucket_key = format!("loc:{:.4}:{:.4}", lat, lng);
            let name = format!("Near {:.4}, {:.4}", lat, lng);
            let album_id = self.store.get_or_create_auto_album(
                owner_id,
                "location",
                &bucket_key,
                &name,
                Some((*lat, *lng)),
            )?;
            self.store.replace_album_members(album_id, members)?;
            live_keys.push(bucket_key);
        }

        self.store
            .delete_stale_auto_albums(owner_id, "location", &live_keys)?;
        Ok(live_keys.len())
    }

    fn reconcile_person_albums(&self, owner_id: i64) -> PipelineResult<usize> {
        let clusters = self.store.clusters_for_owner(owner_id)?;

        let mut live_keys = Vec::new();
        for cluster in clusters {
            if (cluster.member_count as usize) < self.min_person_album_faces {
                continue;
            }

            let members = self.store.image_ids_for_cluster(cluster.id)?;
            if members.is_empty() {
                continue;
            }

            let bucket_key = format!("person:{}", cluster.id);
            let album_id = self.store.get_or_create_auto_album(
                owner_id,
                "person",
                &bucket_key,
                &cluster.name,
                None,
            )?;
            self.store.replace_album_members(album_id, &members)?;
            live_keys.push(bucket_key);
        }

        self.store
            .delete_stale_auto_albums(owner_id, "person", &live_keys)?;
        Ok(live_keys.len())
    }
}

/// Great-circle distance in kilometers
fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;

    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AlbumRecord, FaceBox, InsertOutcome, NewImage};

    fn setup() -> (Arc<Store>, AlbumOrganizer) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.upsert_user(1, "wrapped").unwrap();
        let organizer = AlbumOrganizer::new(Arc::clone(&store), &AlbumConfig::default());
        (store, organizer)
    }

    fn add_image(
        store: &Store,
        checksum: &str,
        capture_time: Option<&str>,
        gps: Option<(f64, f64)>,
    ) -> i64 {
        let outcome = store
            .insert_image(&NewImage {
                owner_id: 1,
                checksum: checksum.to_string(),
                perceptual_hash: None,
                content_type: None,
                size_bytes: 0,
                width: None,
                height: None,
                capture_time: capture_time.map(|s| s.to_string()),
                gps_latitude: gps.map(|g| g.0),
                gps_longitude: gps.map(|g| g.1),
            })
            .unwrap();
        match outcome {
            InsertOutcome::Created(id) => id,
            InsertOutcome::Existing(_) => panic!("fixture checksum reused"),
        }
    }

    fn snapshot(store: &Store) -> Vec<(AlbumRecord, Vec<i64>)> {
        store
            .albums_for_owner(1)
            .unwrap()
            .into_iter()
            .map(|album| {
                let members = store.album_members(album.id).unwrap();
                (album, members)
            })
            .collect()
    }

    #[test]
    fn test_haversine_sanity() {
        // Paris to London is roughly 344 km
        let d = haversine_km(48.8566, 2.3522, 51.5074, -0.1278);
        assert!((d - 344.0).abs() < 10.0, "distance was {}", d);

        assert!(haversine_km(48.0, 2.0, 48.0, 2.0) < 1e-9);
    }

    #[test]
    fn test_date_albums_bucket_by_day() {
        let (store, organizer) = setup();
        let a = add_image(&store, "c1", Some("2024-06-01T09:00:00+00:00"), None);
        let b = add_image(&store, "c2", Some("2024-06-01T21:30:00+00:00"), None);
        let c = add_image(&store, "c3", Some("2024-06-02T08:00:00+00:00"), None);
        add_image(&store, "c4", None, None);

        let summary = organizer.reorganize(1).unwrap();
        assert_eq!(summary.date_albums, 2);

        let albums = snapshot(&store);
        let day1 = albums
            .iter()
            .find(|(album, _)| album.bucket_key.as_deref() == Some("date:2024-06-01"))
            .unwrap();
        assert_eq!(day1.1, vec![a, b]);

        let day2 = albums
            .iter()
            .find(|(album, _)| album.bucket_key.as_deref() == Some("date:2024-06-02"))
            .unwrap();
        assert_eq!(day2.1, vec![c]);
    }

    #[test]
    fn test_location_albums_group_within_radius() {
        let (store, organizer) = setup();
        // Two points ~150 m apart, one ~15 km away
        let a = add_image(&store, "c1", None, Some((48.8566, 2.3522)));
        let b = add_image(&store, "c2", None, Some((48.8576, 2.3532)));
        let c = add_image(&store, "c3", None, Some((48.99, 2.40)));

        let summary = organizer.reorganize(1).unwrap();
        assert_eq!(summary.location_albums, 2);

        let albums = snapshot(&store);
        let near: Vec<_> = albums
            .iter()
            .filter(|(album, _)| album.kind == "location")
            .collect();
        assert_eq!(near.len(), 2);
        let first = near.iter().find(|(_, members)| members.contains(&a)).unwrap();
        assert_eq!(first.1, vec![a, b]);
        let second = near.iter().find(|(_, members)| members.contains(&c)).unwrap();
        assert_eq!(second.1, vec![c]);
    }

    #[test]
    fn test_person_albums_require_min_members() {
        let (store, organizer) = setup();
        let a = add_image(&store, "c1", None, None);
        let b = add_image(&store, "c2", None, None);
        let c = add_image(&store, "c3", None, None);

        let bbox = FaceBox { x: 0.0, y: 0.0, w: 0.5, h: 0.5 };
        let big = store.create_cluster(1, "Person 1", &[1.0, 0.0]).unwrap();
        let fa = store.insert_face(a, &bbox, &[1.0, 0.0]).unwrap();
        let fb = store.insert_face(b, &bbox, &[1.0, 0.0]).unwrap();
        store.assign_face_to_cluster(fa, big).unwrap();
        store.assign_face_to_cluster(fb, big).unwrap();
        assert!(store.try_update_centroid(big, &[1.0, 0.0], 2, 0).unwrap());

        // Singleton cluster: no album for it
        let small = store.create_cluster(1, "Person 2", &[0.0, 1.0]).unwrap();
        let fc = store.insert_face(c, &bbox, &[0.0, 1.0]).unwrap();
        store.assign_face_to_cluster(fc, small).unwrap();

        let summary = organizer.reorganize(1).unwrap();
        assert_eq!(summary.person_albums, 1);

        let albums = snapshot(&store);
        let person: Vec<_> = albums
            .iter()
            .filter(|(album, _)| album.kind == "person")
            .collect();
        assert_eq!(person.len(), 1);
        assert_eq!(person[0].0.name, "Person 1");
        assert_eq!(person[0].1, vec![a, b]);
    }

    #[test]
    fn test_reorganize_is_idempotent() {
        let (store, organizer) = setup();
        add_image(
            &store,
            "c1",
            Some("2024-06-01T09:00:00+00:00"),
            Some((48.8566, 2.3522)),
        );
        add_image(
            &store,
            "c2",
            Some("2024-06-01T10:00:00+00:00"),
            Some((48.8576, 2.3532)),
        );

        organizer.reorganize(1).unwrap();
        let first = snapshot(&store);

        let summary = organizer.reorganize(1).unwrap();
        let second = snapshot(&store);

        assert_eq!(first.len(), second.len());
        for ((album_a, members_a), (album_b, members_b)) in first.iter().zip(second.iter()) {
            assert_eq!(album_a.id, album_b.id);
            assert_eq!(album_a.bucket_key, album_b.bucket_key);
            assert_eq!(members_a, members_b);
        }
        assert_eq!(summary.date_albums, 1);
        assert_eq!(summary.location_albums, 1);
    }

    #[test]
    fn test_manual_albums_untouched() {
        let (store, organizer) = setup();
        let a = add_image(&store, "c1", Some("2024-06-01T09:00:00+00:00"), None);

        let manual = store.create_manual_album(1, "Favorites").unwrap();
        store.add_to_album(manual, a).unwrap();

        organizer.reorganize(1).unwrap();
        organizer.reorganize(1).unwrap();

        assert_eq!(store.album_members(manual).unwrap(), vec![a]);
        let albums = store.albums_for_owner(1).unwrap();
        assert!(albums.iter().any(|album| album.kind == "manual" && !album.is_auto));
    }
}
