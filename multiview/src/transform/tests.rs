//! Tests for transform models and estimation.

use super::*;
use glam::DMat3;
use std::f64::consts::PI;

const EPSILON: f64 = 1e-9;

fn cloud() -> Vec<DVec3> {
    vec![
        DVec3::new(0.0, 0.0, 0.0),
        DVec3::new(10.0, 0.0, 0.0),
        DVec3::new(0.0, 12.0, 0.0),
        DVec3::new(0.0, 0.0, 8.0),
        DVec3::new(5.0, 7.0, 3.0),
        DVec3::new(-4.0, 2.0, 9.0),
    ]
}

fn apply_all(t: &Transform, points: &[DVec3]) -> Vec<DVec3> {
    points.iter().map(|p| t.apply(*p)).collect()
}

#[test]
fn test_identity_and_default() {
    let t = Transform::default();
    let p = DVec3::new(1.0, -2.0, 3.0);
    assert_eq!(t.apply(p), p);
    assert_eq!(t.model, TransformModel::Translation);
    assert!(t.is_valid());
}

#[test]
fn test_compose_applies_right_first() {
    let shift = Transform::translation(DVec3::new(1.0, 0.0, 0.0));
    let rot = Transform::rigid(DQuat::from_rotation_z(PI / 2.0), DVec3::ZERO);

    let composed = rot.compose(&shift);
    let p = composed.apply(DVec3::ZERO);
    assert!((p - DVec3::new(0.0, 1.0, 0.0)).length() < EPSILON);
    assert_eq!(composed.model, TransformModel::Rigid);
}

#[test]
fn test_inverse_roundtrip() {
    let t = Transform::rigid(
        DQuat::from_euler(glam::EulerRot::XYZ, 0.1, -0.2, 0.3),
        DVec3::new(4.0, 5.0, -6.0),
    );
    let inv = t.inverse().unwrap();
    let p = DVec3::new(7.0, 8.0, 9.0);
    assert!((inv.apply(t.apply(p)) - p).length() < 1e-9);
}

#[test]
fn test_singular_has_no_inverse() {
    let flat = Transform::affine(DAffine3::from_mat3(DMat3::from_diagonal(DVec3::new(
        1.0, 1.0, 0.0,
    ))));
    assert!(!flat.is_valid());
    assert!(flat.inverse().is_none());
}

#[test]
fn test_estimate_translation() {
    let src = cloud();
    let dst: Vec<DVec3> = src.iter().map(|p| *p + DVec3::new(5.0, -3.0, 2.0)).collect();

    let t = estimate_transform(&src, &dst, TransformModel::Translation).unwrap();
    assert!((t.translation_components() - DVec3::new(5.0, -3.0, 2.0)).length() < EPSILON);
}

#[test]
fn test_estimate_translation_weighted() {
    let src = vec![DVec3::ZERO, DVec3::ZERO];
    let dst = vec![DVec3::new(1.0, 0.0, 0.0), DVec3::new(3.0, 0.0, 0.0)];

    let t = estimate_transform_weighted(&src, &dst, &[3.0, 1.0], TransformModel::Translation)
        .unwrap();
    assert!((t.translation_components().x - 1.5).abs() < EPSILON);
}

#[test]
fn test_estimate_rigid_recovers_known_transform() {
    let known = Transform::rigid(
        DQuat::from_euler(glam::EulerRot::ZYX, 0.7, -0.3, 0.2),
        DVec3::new(20.0, -10.0, 4.0),
    );
    let src = cloud();
    let dst = apply_all(&known, &src);

    let estimated = estimate_transform(&src, &dst, TransformModel::Rigid).unwrap();
    assert_eq!(estimated.model, TransformModel::Rigid);
    assert!(estimated.abs_diff_eq(&known, 1e-8));
    assert!(mean_residual(&estimated, &src, &dst) < 1e-8);
}

#[test]
fn test_estimate_rigid_coplanar_points() {
    let known = Transform::rigid(DQuat::from_rotation_x(0.4), DVec3::new(1.0, 2.0, 3.0));
    let src = vec![
        DVec3::new(0.0, 0.0, 0.0),
        DVec3::new(10.0, 0.0, 0.0),
        DVec3::new(0.0, 10.0, 0.0),
        DVec3::new(7.0, 3.0, 0.0),
    ];
    let dst = apply_all(&known, &src);

    let estimated = estimate_transform(&src, &dst, TransformModel::Rigid).unwrap();
    assert!(estimated.abs_diff_eq(&known, 1e-8));
    assert!(estimated.affine.matrix3.determinant() > 0.0);
}

#[test]
fn test_estimate_rigid_rejects_collinear() {
    let src = vec![
        DVec3::new(0.0, 0.0, 0.0),
        DVec3::new(1.0, 1.0, 1.0),
        DVec3::new(2.0, 2.0, 2.0),
    ];
    let dst: Vec<DVec3> = src.iter().map(|p| *p + DVec3::ONE).collect();
    assert!(estimate_transform(&src, &dst, TransformModel::Rigid).is_none());
}

#[test]
fn test_estimate_affine_recovers_shear() {
    let linear = DMat3::from_cols(
        DVec3::new(1.2, 0.1, -0.05),
        DVec3::new(0.3, 0.9, 0.02),
        DVec3::new(0.0, -0.1, 1.1),
    );
    let known = Transform::affine(DAffine3::from_mat3_translation(
        linear,
        DVec3::new(5.0, -3.0, 1.0),
    ));
    let src = cloud();
    let dst = apply_all(&known, &src);

    let estimated = estimate_transform(&src, &dst, TransformModel::Affine).unwrap();
    assert!(estimated.abs_diff_eq(&known, 1e-8));
}

#[test]
fn test_estimate_affine_rejects_coplanar() {
    let src = vec![
        DVec3::new(0.0, 0.0, 0.0),
        DVec3::new(10.0, 0.0, 0.0),
        DVec3::new(0.0, 10.0, 0.0),
        DVec3::new(5.0, 5.0, 0.0),
    ];
    let dst = src.clone();
    assert!(estimate_transform(&src, &dst, TransformModel::Affine).is_none());
}

#[test]
fn test_too_few_points() {
    let src = vec![DVec3::ZERO, DVec3::X];
    assert!(estimate_transform(&src, &src, TransformModel::Rigid).is_none());
    assert!(estimate_transform(&[], &[], TransformModel::Translation).is_none());
}

#[test]
fn test_model_parse_and_display() {
    assert_eq!("Rigid".parse::<TransformModel>().unwrap(), TransformModel::Rigid);
    assert_eq!(TransformModel::Affine.to_string(), "affine");
    assert_eq!(TransformModel::Translation.min_points(), 1);
    assert_eq!(TransformModel::Affine.degrees_of_freedom(), 12);

    let t = Transform::translation(DVec3::new(1.0, 2.0, 3.0));
    assert_eq!(t.to_string(), "Translation(t=[1.000, 2.000, 3.000])");
}
