//! 3D transformation models used for pairwise fits and global corrections.

mod estimate;

#[cfg(test)]
mod tests;

use glam::{DAffine3, DQuat, DVec3};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

pub use estimate::{estimate_transform, estimate_transform_weighted, mean_residual};

/// Supported transformation models with increasing degrees of freedom.
///
/// Variants are ordered by complexity (used by `compose()` to pick the
/// more complex model).
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
pub enum TransformModel {
    /// Translation only (3 DOF)
    Translation,
    /// Translation + rotation (6 DOF)
    #[default]
    Rigid,
    /// Full affine (12 DOF)
    Affine,
}

impl TransformModel {
    /// Minimum number of point correspondences required to estimate this model.
    pub fn min_points(&self) -> usize {
        match self {
            TransformModel::Translation => 1,
            TransformModel::Rigid => 3,
            TransformModel::Affine => 4,
        }
    }

    pub fn degrees_of_freedom(&self) -> usize {
        match self {
            TransformModel::Translation => 3,
            TransformModel::Rigid => 6,
            TransformModel::Affine => 12,
        }
    }
}

/// Affine 3D transform tagged with the model it was estimated as.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub affine: DAffine3,
    pub model: TransformModel,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::fmt::Display for Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let t = self.translation_components();
        match self.model {
            TransformModel::Translation => {
                write!(f, "Translation(t=[{:.3}, {:.3}, {:.3}])", t.x, t.y, t.z)
            }
            TransformModel::Rigid => write!(
                f,
                "Rigid(t=[{:.3}, {:.3}, {:.3}], rot={:.3}°)",
                t.x,
                t.y,
                t.z,
                self.rotation_angle().to_degrees()
            ),
            TransformModel::Affine => {
                let m = self.affine.matrix3;
                write!(
                    f,
                    "Affine([{:.4}, {:.4}, {:.4}, {:.3}], [{:.4}, {:.4}, {:.4}, {:.3}], [{:.4}, {:.4}, {:.4}, {:.3}])",
                    m.x_axis.x, m.y_axis.x, m.z_axis.x, t.x,
                    m.x_axis.y, m.y_axis.y, m.z_axis.y, t.y,
                    m.x_axis.z, m.y_axis.z, m.z_axis.z, t.z,
                )
            }
        }
    }
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            affine: DAffine3::IDENTITY,
            model: TransformModel::Translation,
        }
    }

    pub fn translation(t: DVec3) -> Self {
        Self {
            affine: DAffine3::from_translation(t),
            model: TransformModel::Translation,
        }
    }

    pub fn rigid(rotation: DQuat, t: DVec3) -> Self {
        Self {
            affine: DAffine3::from_rotation_translation(rotation, t),
            model: TransformModel::Rigid,
        }
    }

    pub fn affine(affine: DAffine3) -> Self {
        Self {
            affine,
            model: TransformModel::Affine,
        }
    }

    pub fn from_affine(affine: DAffine3, model: TransformModel) -> Self {
        Self { affine, model }
    }

    /// Maps a point from the source frame into the destination frame.
    pub fn apply(&self, p: DVec3) -> DVec3 {
        self.affine.transform_point3(p)
    }

    /// Inverse transform, or `None` if the linear part is singular.
    pub fn inverse(&self) -> Option<Self> {
        if !self.is_valid() {
            return None;
        }
        Some(Self {
            affine: self.affine.inverse(),
            model: self.model,
        })
    }

    /// Compose two transforms: self * other (apply other first, then self).
    pub fn compose(&self, other: &Self) -> Self {
        let model = if self.model as u8 > other.model as u8 {
            self.model
        } else {
            other.model
        };

        Self {
            affine: self.affine * other.affine,
            model,
        }
    }

    pub fn translation_components(&self) -> DVec3 {
        self.affine.translation
    }

    /// Rotation angle in radians (meaningful for rigid transforms).
    pub fn rotation_angle(&self) -> f64 {
        let m = self.affine.matrix3;
        let trace = m.x_axis.x + m.y_axis.y + m.z_axis.z;
        ((trace - 1.0) / 2.0).clamp(-1.0, 1.0).acos()
    }

    /// Finite and non-degenerate.
    pub fn is_valid(&self) -> bool {
        let det = self.affine.matrix3.determinant();
        self.affine.is_finite() && det.is_finite() && det.abs() > 1e-12
    }

    pub fn abs_diff_eq(&self, other: &Self, max_abs_diff: f64) -> bool {
        self.affine.abs_diff_eq(other.affine, max_abs_diff)
    }
}
