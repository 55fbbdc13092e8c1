//! View identifiers and the metadata registry describing each acquisition.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one acquisition: a view setup (angle, channel, illumination)
/// recorded at one timepoint.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct ViewId {
    pub timepoint: i32,
    pub setup: i32,
}

impl ViewId {
    pub const fn new(timepoint: i32, setup: i32) -> Self {
        Self { timepoint, setup }
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tpId={} setupId={}", self.timepoint, self.setup)
    }
}

/// A named attribute value (timepoint, angle, channel or illumination).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: i32,
    pub name: String,
}

impl Entity {
    pub fn new(id: i32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewSetup {
    pub id: i32,
    pub angle: Entity,
    pub channel: Entity,
    pub illumination: Entity,
}

/// A [`ViewId`] with its metadata resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewDescription {
    pub view_id: ViewId,
    pub timepoint: Entity,
    pub setup: ViewSetup,
}

impl ViewDescription {
    pub fn angle(&self) -> &Entity {
        &self.setup.angle
    }

    pub fn channel(&self) -> &Entity {
        &self.setup.channel
    }

    pub fn illumination(&self) -> &Entity {
        &self.setup.illumination
    }

    /// Human readable label used in log lines and pair descriptions.
    pub fn label(&self) -> String {
        format!(
            "TP={} angle={}, ch={}, illum={}",
            self.timepoint.name,
            self.setup.angle.name,
            self.setup.channel.name,
            self.setup.illumination.name
        )
    }
}

/// Resolves view ids to their metadata.
pub trait ViewRegistry: Sync {
    fn view_description(&self, view_id: ViewId) -> Option<ViewDescription>;
}

/// In-memory registry of the timepoints and view setups of one acquisition.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SequenceDescription {
    pub timepoints: Vec<Entity>,
    pub setups: Vec<ViewSetup>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_views: Vec<ViewId>,
}

impl SequenceDescription {
    pub fn add_timepoint(&mut self, timepoint: Entity) {
        match self.timepoints.iter().position(|t| t.id == timepoint.id) {
            Some(index) => self.timepoints[index] = timepoint,
            None => self.timepoints.push(timepoint),
        }
    }

    pub fn add_setup(&mut self, setup: ViewSetup) {
        match self.setups.iter().position(|s| s.id == setup.id) {
            Some(index) => self.setups[index] = setup,
            None => self.setups.push(setup),
        }
    }

    pub fn mark_missing(&mut self, view_id: ViewId) {
        if !self.missing_views.contains(&view_id) {
            self.missing_views.push(view_id);
        }
    }

    pub fn is_missing(&self, view_id: ViewId) -> bool {
        self.missing_views.contains(&view_id)
    }

    pub fn timepoint(&self, id: i32) -> Option<&Entity> {
        self.timepoints.iter().find(|t| t.id == id)
    }

    pub fn setup(&self, id: i32) -> Option<&ViewSetup> {
        self.setups.iter().find(|s| s.id == id)
    }

    /// All present views, sorted.
    pub fn view_ids(&self) -> Vec<ViewId> {
        let mut view_ids: Vec<ViewId> = self
            .timepoints
            .iter()
            .flat_map(|t| self.setups.iter().map(move |s| ViewId::new(t.id, s.id)))
            .filter(|view_id| !self.is_missing(*view_id))
            .collect();
        view_ids.sort();
        view_ids
    }
}

impl ViewRegistry for SequenceDescription {
    fn view_description(&self, view_id: ViewId) -> Option<ViewDescription> {
        if self.is_missing(view_id) {
            return None;
        }

        Some(ViewDescription {
            view_id,
            timepoint: self.timepoint(view_id.timepoint)?.clone(),
            setup: self.setup(view_id.setup)?.clone(),
        })
    }
}
