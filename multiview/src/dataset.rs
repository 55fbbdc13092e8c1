//! The acquisition dataset a registration works on.

use std::path::Path;

use anyhow::Context;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::correspondence::CorrespondenceStore;
use crate::interest_points::InterestPointStore;
use crate::transform::Transform;
use crate::view::{SequenceDescription, ViewId};

/// The transform of one view from its local frame into world coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewRegistration {
    pub view_id: ViewId,
    pub transform: Transform,
}

/// Per-view transform store. Views without an entry sit at the identity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<ViewRegistration>", into = "Vec<ViewRegistration>")]
pub struct ViewRegistrations {
    transforms: HashMap<ViewId, Transform>,
}

impl ViewRegistrations {
    pub fn get(&self, view_id: ViewId) -> Transform {
        self.transforms
            .get(&view_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn set(&mut self, view_id: ViewId, transform: Transform) {
        self.transforms.insert(view_id, transform);
    }

    /// Replaces the transform of `view_id` with `correction ∘ current`.
    pub fn pre_concatenate(&mut self, view_id: ViewId, correction: &Transform) {
        let updated = correction.compose(&self.get(view_id));
        self.set(view_id, updated);
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

impl From<Vec<ViewRegistration>> for ViewRegistrations {
    fn from(list: Vec<ViewRegistration>) -> Self {
        Self {
            transforms: list.into_iter().map(|r| (r.view_id, r.transform)).collect(),
        }
    }
}

impl From<ViewRegistrations> for Vec<ViewRegistration> {
    fn from(registrations: ViewRegistrations) -> Self {
        let mut list: Vec<ViewRegistration> = registrations
            .transforms
            .into_iter()
            .map(|(view_id, transform)| ViewRegistration { view_id, transform })
            .collect();
        list.sort_by_key(|r| r.view_id);
        list
    }
}

/// Views, their transforms, interest points and stored correspondences.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Dataset {
    pub sequence: SequenceDescription,
    #[serde(default)]
    pub registrations: ViewRegistrations,
    #[serde(default)]
    pub interest_points: InterestPointStore,
    #[serde(default)]
    pub correspondences: CorrespondenceStore,
}

impl Dataset {
    pub fn new(sequence: SequenceDescription) -> Self {
        Self {
            sequence,
            ..Default::default()
        }
    }

    /// Loads a dataset from a `.yaml`/`.yml` or `.json` file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        common::load_file(path).with_context(|| format!("Failed to load dataset {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        common::save_file(path, self).with_context(|| format!("Failed to save dataset {}", path.display()))
    }

    /// World position of every interest point of `view_id` under `label`.
    pub fn world_points(&self, view_id: ViewId, label: &str) -> Vec<glam::DVec3> {
        let transform = self.registrations.get(view_id);
        self.interest_points
            .points(view_id, label)
            .unwrap_or_default()
            .iter()
            .map(|p| transform.apply(p.pos))
            .collect()
    }
}
