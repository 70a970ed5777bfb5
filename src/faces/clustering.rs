//! Incremental person clustering.
//!
//! Each new face is compared against every centroid the same owner already
//! has; the best match above the similarity threshold absorbs the face and
//! its centroid moves to the running mean of all members, otherwise the face
//! starts a new singleton cluster. Adding one image touches O(clusters), not
//! O(faces), and earlier assignments are never revisited. Known limitation:
//! with no retroactive re-clustering pass, cluster boundaries can drift as
//! more faces arrive.
//!
//! Assignment for one owner is serialized by a per-owner mutex, and the
//! centroid write additionally re-checks the cluster version so a stale
//! write loses and retries instead of clobbering a concurrent update.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::FaceConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::index::cosine_similarity;
use crate::store::{ClusterRecord, FaceRecord, Store};

/// Bound on optimistic-write retries before the face is parked for re-attempt
const MAX_CENTROID_RETRIES: usize = 8;

pub struct FaceClusterer {
    store: Arc<Store>,
    similarity_threshold: f32,
    tie_epsilon: f32,
    owner_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl FaceClusterer {
    pub fn new(store: Arc<Store>, config: &FaceConfig) -> Self {
        Self {
            store,
            similarity_threshold: config.similarity_threshold,
            tie_epsilon: config.tie_epsilon,
            owner_locks: Mutex::new(HashMap::new()),
        }
    }

    fn owner_lock(&self, owner_id: i64) -> PipelineResult<Arc<Mutex<()>>> {
        let mut locks = self
            .owner_locks
            .lock()
            .map_err(|_| PipelineError::Clustering("owner lock table poisoned".into()))?;
        Ok(Arc::clone(locks.entry(owner_id).or_default()))
    }

    /// Assign every unclustered face of an image to a person cluster.
    /// Returns the cluster ids chosen, in face order.
    pub fn cluster_image_faces(&self, owner_id: i64, image_id: i64) -> PipelineResult<Vec<i64>> {
        let lock = self.owner_lock(owner_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| PipelineError::Clustering("owner lock poisoned".into()))?;

        let faces = self.store.faces_for_image(image_id)?;
        let mut assigned = Vec::new();

        for face in faces.iter().filter(|f| f.cluster_id.is_none()) {
            assigned.push(self.assign_face(owner_id, face)?);
        }

        Ok(assigned)
    }

    /// Assign one face. Caller holds the owner lock.
    fn assign_face(&self, owner_id: i64, face: &FaceRecord) -> PipelineResult<i64> {
        if face.embedding.is_empty() {
            return Err(PipelineError::Clustering(format!(
                "face {} has an empty embedding",
                face.id
            )));
        }

        for _attempt in 0..MAX_CENTROID_RETRIES {
            let clusters = self.store.clusters_for_owner(owner_id)?;

            let best = best_match(
                &clusters,
                &face.embedding,
                self.similarity_threshold,
                self.tie_epsilon,
            )?;

            match best {
                Some(cluster) => {
                    let centroid =
                        running_mean(&cluster.centroid, cluster.member_count, &face.embedding);
                    let updated = self.store.try_update_centroid(
                        cluster.id,
                        &centroid,
                        cluster.member_count + 1,
                        cluster.version,
                    )?;

                    if !updated {
                        // Someone moved the centroid since we read it; re-read
                        // and re-decide
                        continue;
                    }

                    self.store.assign_face_to_cluster(face.id, cluster.id)?;
                    tracing::debug!(
                        face_id = face.id,
                        cluster_id = cluster.id,
                        members = cluster.member_count + 1,
                        "face joined existing person cluster"
                    );
                    return Ok(cluster.id);
                }
                None => {
                    let name = format!("Person {}", clusters.len() + 1);
                    let cluster_id =
                        self.store
                            .create_cluster(owner_id, &name, &face.embedding)?;
                    self.store.assign_face_to_cluster(face.id, cluster_id)?;
                    tracing::debug!(
                        face_id = face.id,
                        cluster_id,
                        "face started a new person cluster"
                    );
                    return Ok(cluster_id);
                }
            }
        }

        Err(PipelineError::Clustering(format!(
            "face {} lost {} consecutive centroid races",
            face.id, MAX_CENTROID_RETRIES
        )))
    }
}

/// Pick the cluster a face should join, if any: highest cosine similarity at
/// or above the threshold, ties within `epsilon` going to the cluster with
/// more members.
fn best_match<'a>(
    clusters: &'a [ClusterRecord],
    embedding: &[f32],
    threshold: f32,
    epsilon: f32,
) -> PipelineResult<Option<&'a ClusterRecord>> {
    let mut best: Option<(&ClusterRecord, f32)> = None;

    for cluster in clusters {
        if cluster.centroid.len() != embedding.len() {
            return Err(PipelineError::Clustering(format!(
                "cluster {} centroid has {} dims, face embedding has {}",
                cluster.id,
                cluster.centroid.len(),
                embedding.len()
            )));
        }

        let similarity = cosine_similarity(embedding, &cluster.centroid);

        best = match best {
            None => Some((cluster, similarity)),
            Some((current, current_sim)) => {
                if similarity > current_sim + epsilon {
                    Some((cluster, similarity))
                } else if (similarity - current_sim).abs() <= epsilon
                    && cluster.member_count > current.member_count
                {
                    Some((cluster, similarity))
                } else {
                    Some((current, current_sim))
                }
            }
        };
    }

    Ok(best
        .filter(|(_, similarity)| *similarity >= threshold)
        .map(|(cluster, _)| cluster))
}

/// Incremental centroid update: mean of all member embeddings after adding
/// one more.
fn running_mean(centroid: &[f32], member_count: i64, embedding: &[f32]) -> Vec<f32> {
    let n = member_count as f32;
    centroid
        .iter()
        .zip(embedding.iter())
        .map(|(c, e)| (c * n + e) / (n + 1.0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FaceBox, InsertOutcome, NewImage};

    fn setup() -> (Arc<Store>, FaceClusterer) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.upsert_user(1, "wrapped").unwrap();
        let clusterer = FaceClusterer::new(Arc::clone(&store), &FaceConfig::default());
        (store, clusterer)
    }

    fn add_image(store: &Store, checksum: &str) -> i64 {
        let outcome = store
            .insert_image(&NewImage {
                owner_id: 1,
                checksum: checksum.to_string(),
                perceptual_hash: None,
                content_type: None,
                size_bytes: 0,
                width: None,
                height: None,
                capture_time: None,
                gps_latitude: None,
                gps_longitude: None,
            })
            .unwrap();
        match outcome {
            InsertOutcome::Created(id) => id,
            InsertOutcome::Existing(_) => panic!("fixture checksum reused"),
        }
    }

    fn add_face(store: &Store, image_id: i64, embedding: &[f32]) -> i64 {
        let bbox = FaceBox { x: 0.1, y: 0.1, w: 0.2, h: 0.2 };
        store.insert_face(image_id, &bbox, embedding).unwrap()
    }

    #[test]
    fn test_running_mean() {
        let centroid = running_mean(&[1.0, 0.0], 1, &[0.0, 1.0]);
        assert_eq!(centroid, vec![0.5, 0.5]);

        let centroid = running_mean(&centroid, 2, &[0.5, 0.5]);
        assert_eq!(centroid, vec![0.5, 0.5]);
    }

    #[test]
    fn test_first_face_creates_singleton() {
        let (store, clusterer) = setup();
        let image = add_image(&store, "c1");
        add_face(&store, image, &[1.0, 0.0, 0.0]);

        let assigned = clusterer.cluster_image_faces(1, image).unwrap();
        assert_eq!(assigned.len(), 1);

        let clusters = store.clusters_for_owner(1).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].member_count, 1);
        assert_eq!(clusters[0].centroid, vec![1.0, 0.0, 0.0]);
        assert_eq!(clusters[0].name, "Person 1");
    }

    #[test]
    fn test_similar_face_joins_and_moves_centroid() {
        let (store, clusterer) = setup();
        let a = add_image(&store, "c1");
        add_face(&store, a, &[1.0, 0.0, 0.0]);
        clusterer.cluster_image_faces(1, a).unwrap();

        // cos = 0.9 against the existing centroid, above the 0.6 threshold
        let b = add_image(&store, "c2");
        let similar = [0.9, (1.0f32 - 0.81).sqrt(), 0.0];
        add_face(&store, b, &similar);
        clusterer.cluster_image_faces(1, b).unwrap();

        let clusters = store.clusters_for_owner(1).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].member_count, 2);
        let expected = running_mean(&[1.0, 0.0, 0.0], 1, &similar);
        for (got, want) in clusters[0].centroid.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn test_dissimilar_face_starts_new_cluster() {
        let (store, clusterer) = setup();
        let a = add_image(&store, "c1");
        add_face(&store, a, &[1.0, 0.0, 0.0]);
        clusterer.cluster_image_faces(1, a).unwrap();

        let b = add_image(&store, "c2");
        add_face(&store, b, &[0.0, 1.0, 0.0]);
        clusterer.cluster_image_faces(1, b).unwrap();

        let clusters = store.clusters_for_owner(1).unwrap();
        assert_eq!(clusters.len(), 2);
        assert!(clusters.iter().all(|c| c.member_count == 1));
    }

    #[test]
    fn test_order_invariance_with_clear_margins() {
        // Two tight groups, similarities either well above or well below the
        // threshold: any processing order must produce two clusters.
        let group_a = vec![vec![1.0, 0.0, 0.0], vec![0.98, 0.199, 0.0]];
        let group_b = vec![vec![0.0, 1.0, 0.0], vec![0.0, 0.98, 0.199]];

        let mut orders: Vec<Vec<Vec<f32>>> = Vec::new();
        orders.push(
            group_a.iter().chain(group_b.iter()).cloned().collect(),
        );
        orders.push(
            group_b.iter().chain(group_a.iter()).cloned().collect(),
        );
        orders.push(vec![
            group_a[0].clone(),
            group_b[0].clone(),
            group_a[1].clone(),
            group_b[1].clone(),
        ]);

        for order in orders {
            let (store, clusterer) = setup();
            for (i, embedding) in order.iter().enumerate() {
                let image = add_image(&store, &format!("c{}", i));
                add_face(&store, image, embedding);
                clusterer.cluster_image_faces(1, image).unwrap();
            }
            let clusters = store.clusters_for_owner(1).unwrap();
            assert_eq!(clusters.len(), 2, "order {:?}", order);
            assert_eq!(
                clusters.iter().map(|c| c.member_count).sum::<i64>(),
                4
            );
        }
    }

    #[test]
    fn test_tie_prefers_larger_cluster() {
        let (store, clusterer) = setup();

        // Cluster 1 with two identical members, centroid [1,0,0]
        for checksum in ["c1", "c2"] {
            let image = add_image(&store, checksum);
            add_face(&store, image, &[1.0, 0.0, 0.0]);
            clusterer.cluster_image_faces(1, image).unwrap();
        }
        // Cluster 2, singleton at [0,1,0]
        let image = add_image(&store, "c3");
        add_face(&store, image, &[0.0, 1.0, 0.0]);
        clusterer.cluster_image_faces(1, image).unwrap();

        let clusters = store.clusters_for_owner(1).unwrap();
        assert_eq!(clusters.len(), 2);
        let big = clusters.iter().find(|c| c.member_count == 2).unwrap().id;

        // Equidistant from both centroids; the larger cluster wins the tie
        let s = std::f32::consts::FRAC_1_SQRT_2;
        let image = add_image(&store, "c4");
        add_face(&store, image, &[s, s, 0.0]);
        let assigned = clusterer.cluster_image_faces(1, image).unwrap();
        assert_eq!(assigned, vec![big]);
    }

    #[test]
    fn test_centroid_dimension_mismatch_is_clustering_error() {
        let (store, clusterer) = setup();
        store.create_cluster(1, "Person 1", &[1.0, 0.0]).unwrap();

        let image = add_image(&store, "c1");
        add_face(&store, image, &[1.0, 0.0, 0.0]);

        let err = clusterer.cluster_image_faces(1, image).unwrap_err();
        assert!(matches!(err, PipelineError::Clustering(_)));
    }

    #[test]
    fn test_zero_faces_is_not_an_error() {
        let (store, clusterer) = setup();
        let image = add_image(&store, "c1");
        let assigned = clusterer.cluster_image_faces(1, image).unwrap();
        assert!(assigned.is_empty());
        assert!(store.clusters_for_owner(1).unwrap().is_empty());
    }
}
