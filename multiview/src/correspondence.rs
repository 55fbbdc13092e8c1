//! Verified correspondences attached to views, and their persistence.

use std::path::{Path, PathBuf};

use glam::DVec3;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PersistError;
use crate::pairwise::PairwiseMatch;
use crate::view::ViewId;

/// One side of a verified correspondence, stored with the view of `detection_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorrespondingInterestPoint {
    pub detection_id: usize,
    pub local: DVec3,
    pub corresponding_view: ViewId,
    pub corresponding_label: String,
    pub corresponding_detection_id: usize,
    pub corresponding_local: DVec3,
}

/// Serialized form of the entries of one `(view, label)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewCorrespondences {
    pub view_id: ViewId,
    pub label: String,
    pub correspondences: Vec<CorrespondingInterestPoint>,
}

/// Receives the correspondences of one `(view, label)` when a subset is saved.
pub trait CorrespondencePersistence: Send + Sync {
    fn save(
        &self,
        view_id: ViewId,
        label: &str,
        correspondences: &[CorrespondingInterestPoint],
    ) -> Result<(), PersistError>;
}

/// Correspondences per `(view, label)`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(from = "Vec<ViewCorrespondences>", into = "Vec<ViewCorrespondences>")]
pub struct CorrespondenceStore {
    entries: HashMap<(ViewId, String), Vec<CorrespondingInterestPoint>>,
}

impl CorrespondenceStore {
    /// Drops the stored correspondences of `views` under the label each view is processed with.
    pub fn clear_existing_correspondences(
        &mut self,
        views: &[ViewId],
        label_of: &dyn Fn(ViewId) -> Option<String>,
    ) {
        for &view_id in views {
            if let Some(label) = label_of(view_id) {
                self.entries.remove(&(view_id, label));
            }
        }
    }

    /// Adds every inlier of `pairs` to both of its views.
    pub fn add_correspondences(
        &mut self,
        pairs: &[PairwiseMatch],
        label_of: &dyn Fn(ViewId) -> Option<String>,
    ) -> usize {
        let mut added = 0;

        for pair in pairs {
            for m in pair.inliers() {
                let (Some(label_a), Some(label_b)) = (label_of(m.a.view_id), label_of(m.b.view_id))
                else {
                    continue;
                };

                self.entries
                    .entry((m.a.view_id, label_a.clone()))
                    .or_default()
                    .push(CorrespondingInterestPoint {
                        detection_id: m.a.id,
                        local: m.a.local,
                        corresponding_view: m.b.view_id,
                        corresponding_label: label_b.clone(),
                        corresponding_detection_id: m.b.id,
                        corresponding_local: m.b.local,
                    });

                self.entries
                    .entry((m.b.view_id, label_b))
                    .or_default()
                    .push(CorrespondingInterestPoint {
                        detection_id: m.b.id,
                        local: m.b.local,
                        corresponding_view: m.a.view_id,
                        corresponding_label: label_a,
                        corresponding_detection_id: m.a.id,
                        corresponding_local: m.a.local,
                    });

                added += 1;
            }
        }

        added
    }

    /// Hands the entries of `views` to `persistence`. Returns the number of failed writes.
    pub fn save_correspondences(
        &self,
        views: &[ViewId],
        label_of: &dyn Fn(ViewId) -> Option<String>,
        persistence: &dyn CorrespondencePersistence,
    ) -> usize {
        let mut failures = 0;

        for &view_id in views {
            let Some(label) = label_of(view_id) else {
                continue;
            };
            let correspondences = self.correspondences(view_id, &label);

            if let Err(err) = persistence.save(view_id, &label, correspondences) {
                warn!("Could not save correspondences of {view_id} ({label}): {err:#}");
                failures += 1;
            }
        }

        failures
    }

    pub fn correspondences(&self, view_id: ViewId, label: &str) -> &[CorrespondingInterestPoint] {
        self.entries
            .get(&(view_id, label.to_string()))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Total number of stored entries over all views.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(Vec::is_empty)
    }
}

impl From<Vec<ViewCorrespondences>> for CorrespondenceStore {
    fn from(lists: Vec<ViewCorrespondences>) -> Self {
        let entries = lists
            .into_iter()
            .map(|list| ((list.view_id, list.label), list.correspondences))
            .collect();
        Self { entries }
    }
}

impl From<CorrespondenceStore> for Vec<ViewCorrespondences> {
    fn from(store: CorrespondenceStore) -> Self {
        let mut lists: Vec<ViewCorrespondences> = store
            .entries
            .into_iter()
            .map(|((view_id, label), correspondences)| ViewCorrespondences {
                view_id,
                label,
                correspondences,
            })
            .collect();
        lists.sort_by(|a, b| (a.view_id, &a.label).cmp(&(b.view_id, &b.label)));
        lists
    }
}

/// Writes one pretty-printed JSON file per `(view, label)` into a directory.
#[derive(Debug, Clone)]
pub struct JsonCorrespondenceWriter {
    directory: PathBuf,
}

impl JsonCorrespondenceWriter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn file_path(&self, view_id: ViewId, label: &str) -> PathBuf {
        self.directory.join(format!(
            "tpId_{}_viewSetupId_{}.{}.corr.json",
            view_id.timepoint, view_id.setup, label
        ))
    }
}

impl CorrespondencePersistence for JsonCorrespondenceWriter {
    fn save(
        &self,
        view_id: ViewId,
        label: &str,
        correspondences: &[CorrespondingInterestPoint],
    ) -> Result<(), PersistError> {
        let path = self.file_path(view_id, label);

        let text = serde_json::to_string_pretty(correspondences)
            .map_err(|source| PersistError::Serialize { view_id, source })?;

        std::fs::create_dir_all(&self.directory).map_err(|source| PersistError::Io {
            path: self.directory.clone(),
            source,
        })?;
        std::fs::write(&path, text).map_err(|source| PersistError::Io {
            path: path.clone(),
            source,
        })?;

        debug!(
            "Saved {} correspondences to {}",
            correspondences.len(),
            path.display()
        );
        Ok(())
    }
}
