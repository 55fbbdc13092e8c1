//! Bringing a free solve back into the frame of a reference view.

use glam::DVec3;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::transform::{Transform, TransformModel, estimate_transform};

/// Model of the map-back transform.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum MapBackModel {
    #[default]
    Translation,
    Rigid,
}

impl From<MapBackModel> for TransformModel {
    fn from(model: MapBackModel) -> Self {
        match model {
            MapBackModel::Translation => TransformModel::Translation,
            MapBackModel::Rigid => TransformModel::Rigid,
        }
    }
}

const UNIT_CUBE: [DVec3; 8] = [
    DVec3::new(0.0, 0.0, 0.0),
    DVec3::new(1.0, 0.0, 0.0),
    DVec3::new(0.0, 1.0, 0.0),
    DVec3::new(1.0, 1.0, 0.0),
    DVec3::new(0.0, 0.0, 1.0),
    DVec3::new(1.0, 0.0, 1.0),
    DVec3::new(0.0, 1.0, 1.0),
    DVec3::new(1.0, 1.0, 1.0),
];

/// Points whose motion defines the map-back: the reference's world interest
/// points, or the unit cube when there are too few of them.
pub fn map_back_samples(world_points: &[DVec3], model: MapBackModel) -> Vec<DVec3> {
    // A rigid fit needs a non-degenerate spread, so demand one point more.
    let required = TransformModel::from(model).min_points() + 1;
    if world_points.len() >= required {
        world_points.to_vec()
    } else {
        UNIT_CUBE.to_vec()
    }
}

/// Pre-applies the transform that takes the reference's corrected samples back
/// to where they were, so the reference ends up (nearly) unchanged.
///
/// Returns the applied transform, or `None` if it cannot be fitted.
pub fn apply_map_back(
    corrections: &mut [Transform],
    reference: usize,
    samples: &[DVec3],
    model: MapBackModel,
) -> Option<Transform> {
    let moved: Vec<DVec3> = samples
        .iter()
        .map(|p| corrections[reference].apply(*p))
        .collect();
    let mapping = estimate_transform(&moved, samples, model.into())?;

    for correction in corrections.iter_mut() {
        *correction = mapping.compose(correction);
    }

    Some(mapping)
}
