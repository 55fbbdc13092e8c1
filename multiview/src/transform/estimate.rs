//! Least-squares estimation of transforms from point correspondences.

use glam::{DAffine3, DMat3, DVec3};
use nalgebra::{Matrix3, Vector3};

use crate::transform::{Transform, TransformModel};

/// Relative eigenvalue floor below which a point cloud counts as flat/collinear.
const DEGENERACY_RATIO: f64 = 1e-9;

/// Estimate the transform mapping `src` onto `dst` with uniform weights.
pub fn estimate_transform(src: &[DVec3], dst: &[DVec3], model: TransformModel) -> Option<Transform> {
    let weights = vec![1.0; src.len()];
    estimate_transform_weighted(src, dst, &weights, model)
}

/// Estimate the transform mapping `src` onto `dst`, minimizing the weighted
/// sum of squared residuals. Returns `None` for too few or degenerate points.
pub fn estimate_transform_weighted(
    src: &[DVec3],
    dst: &[DVec3],
    weights: &[f64],
    model: TransformModel,
) -> Option<Transform> {
    assert_eq!(src.len(), dst.len(), "point lists must have equal length");
    assert_eq!(src.len(), weights.len(), "one weight per point pair");

    if src.len() < model.min_points() {
        return None;
    }

    let transform = match model {
        TransformModel::Translation => estimate_translation(src, dst, weights),
        TransformModel::Rigid => estimate_rigid(src, dst, weights),
        TransformModel::Affine => estimate_affine(src, dst, weights),
    }?;

    transform.is_valid().then_some(transform)
}

/// Mean Euclidean distance between `transform(src)` and `dst`.
pub fn mean_residual(transform: &Transform, src: &[DVec3], dst: &[DVec3]) -> f64 {
    if src.is_empty() {
        return 0.0;
    }
    let sum: f64 = src
        .iter()
        .zip(dst)
        .map(|(s, d)| transform.apply(*s).distance(*d))
        .sum();
    sum / src.len() as f64
}

fn weighted_centroid(points: &[DVec3], weights: &[f64], total: f64) -> DVec3 {
    points
        .iter()
        .zip(weights)
        .fold(DVec3::ZERO, |acc, (p, w)| acc + *p * *w)
        / total
}

fn total_weight(weights: &[f64]) -> Option<f64> {
    let total: f64 = weights.iter().sum();
    (total > 0.0 && total.is_finite()).then_some(total)
}

fn to_nalgebra(v: DVec3) -> Vector3<f64> {
    Vector3::new(v.x, v.y, v.z)
}

fn to_glam(m: &Matrix3<f64>) -> DMat3 {
    // Both libraries store matrices column-major.
    DMat3::from_cols_slice(m.as_slice())
}

fn estimate_translation(src: &[DVec3], dst: &[DVec3], weights: &[f64]) -> Option<Transform> {
    let total = total_weight(weights)?;
    let shift = src
        .iter()
        .zip(dst)
        .zip(weights)
        .fold(DVec3::ZERO, |acc, ((s, d), w)| acc + (*d - *s) * *w)
        / total;

    Some(Transform::translation(shift))
}

/// Weighted Kabsch: optimal rotation from the SVD of the cross-covariance,
/// with the reflection case folded into the smallest singular direction.
fn estimate_rigid(src: &[DVec3], dst: &[DVec3], weights: &[f64]) -> Option<Transform> {
    let total = total_weight(weights)?;
    let src_centroid = weighted_centroid(src, weights, total);
    let dst_centroid = weighted_centroid(dst, weights, total);

    let mut cross = Matrix3::<f64>::zeros();
    for ((s, d), w) in src.iter().zip(dst).zip(weights) {
        let sc = to_nalgebra(*s - src_centroid);
        let dc = to_nalgebra(*d - dst_centroid);
        cross += sc * dc.transpose() * *w;
    }

    let svd = cross.svd(true, true);
    let u = svd.u?;
    let v = svd.v_t?.transpose();
    let singular = svd.singular_values;

    let max_sv = singular.max();
    let mut sorted = [singular[0], singular[1], singular[2]];
    sorted.sort_by(|a, b| b.total_cmp(a));
    // Collinear points leave the rotation about their line undetermined.
    if max_sv <= 0.0 || sorted[1] < DEGENERACY_RATIO * max_sv {
        return None;
    }

    let min_idx = singular.imin();
    let mut correction = Vector3::new(1.0, 1.0, 1.0);
    if (v * u.transpose()).determinant() < 0.0 {
        correction[min_idx] = -1.0;
    }
    let rotation = v * Matrix3::from_diagonal(&correction) * u.transpose();

    let rotation = to_glam(&rotation);
    let translation = dst_centroid - rotation * src_centroid;

    Some(Transform::from_affine(
        DAffine3::from_mat3_translation(rotation, translation),
        TransformModel::Rigid,
    ))
}

/// Weighted affine least squares on centered coordinates:
/// `A = C_ds * C_ss^-1`, `t = c_d - A * c_s`.
fn estimate_affine(src: &[DVec3], dst: &[DVec3], weights: &[f64]) -> Option<Transform> {
    let total = total_weight(weights)?;
    let src_centroid = weighted_centroid(src, weights, total);
    let dst_centroid = weighted_centroid(dst, weights, total);

    let mut c_ss = Matrix3::<f64>::zeros();
    let mut c_ds = Matrix3::<f64>::zeros();
    for ((s, d), w) in src.iter().zip(dst).zip(weights) {
        let sc = to_nalgebra(*s - src_centroid);
        let dc = to_nalgebra(*d - dst_centroid);
        c_ss += sc * sc.transpose() * *w;
        c_ds += dc * sc.transpose() * *w;
    }

    // Coplanar sources cannot constrain the out-of-plane column.
    let eigen = c_ss.symmetric_eigen();
    let max_ev = eigen.eigenvalues.max();
    let min_ev = eigen.eigenvalues.min();
    if max_ev <= 0.0 || min_ev < DEGENERACY_RATIO * max_ev {
        return None;
    }

    let linear = c_ds * c_ss.try_inverse()?;
    let linear = to_glam(&linear);
    let translation = dst_centroid - linear * src_centroid;

    Some(Transform::affine(DAffine3::from_mat3_translation(
        linear,
        translation,
    )))
}
