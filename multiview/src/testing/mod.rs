//! Testing utilities for multiview.

#![allow(dead_code)]

use glam::{DQuat, DVec3};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::dataset::Dataset;
use crate::interest_points::InterestPoint;
use crate::registration::ChannelProcess;
use crate::transform::Transform;
use crate::view::{Entity, SequenceDescription, ViewId, ViewSetup};

pub const LABEL: &str = "beads";

/// Initialize tracing subscriber for tests.
/// Safe to call multiple times - will only initialize once.
/// Respects RUST_LOG env var, defaults to "info".
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// `n` uniformly distributed beads in a `extent`³ volume.
pub fn bead_cloud(n: usize, extent: f64, seed: u64) -> Vec<DVec3> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            DVec3::new(
                rng.random_range(0.0..extent),
                rng.random_range(0.0..extent),
                rng.random_range(0.0..extent),
            )
        })
        .collect()
}

/// `timepoints` × `setups` views, one angle per setup, single channel and illumination.
pub fn sequence(timepoints: i32, setups: i32) -> SequenceDescription {
    let mut sequence = SequenceDescription::default();
    for t in 0..timepoints {
        sequence.add_timepoint(Entity::new(t, t.to_string()));
    }
    for s in 0..setups {
        sequence.add_setup(ViewSetup {
            id: s,
            angle: Entity::new(s, format!("{}", s * 45)),
            channel: Entity::new(0, "488"),
            illumination: Entity::new(0, "0"),
        });
    }
    sequence
}

/// A small rigid displacement, different for every seed.
pub fn misregistration(seed: u64) -> Transform {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let axis = DVec3::new(
        rng.random_range(-1.0..1.0),
        rng.random_range(-1.0..1.0),
        rng.random_range(-1.0..1.0),
    )
    .try_normalize()
    .unwrap_or(DVec3::Z);
    let angle = rng.random_range(-0.05..0.05);
    let shift = DVec3::new(
        rng.random_range(-3.0..3.0),
        rng.random_range(-3.0..3.0),
        rng.random_range(-3.0..3.0),
    );
    Transform::rigid(DQuat::from_axis_angle(axis, angle), shift)
}

/// Every view sees the same `beads` in its local frame, so the correct
/// registration is identical for all views. Each view starts out at
/// `initial(view)`.
pub fn synthetic_dataset(
    timepoints: i32,
    setups: i32,
    beads: &[DVec3],
    initial: impl Fn(ViewId) -> Transform,
) -> Dataset {
    let mut dataset = Dataset::new(sequence(timepoints, setups));
    let points: Vec<InterestPoint> = beads
        .iter()
        .enumerate()
        .map(|(id, &pos)| InterestPoint::new(id, pos))
        .collect();

    for view_id in dataset.sequence.view_ids() {
        dataset.interest_points.insert(view_id, LABEL, points.clone());
        dataset.registrations.set(view_id, initial(view_id));
    }
    dataset
}

pub fn channels() -> Vec<ChannelProcess> {
    vec![ChannelProcess::new(0, LABEL)]
}

/// Largest distance between the world positions of the same bead seen by `a` and `b`.
pub fn max_disagreement(dataset: &Dataset, a: ViewId, b: ViewId) -> f64 {
    let points_a = dataset.world_points(a, LABEL);
    let points_b = dataset.world_points(b, LABEL);
    assert_eq!(points_a.len(), points_b.len());

    points_a
        .iter()
        .zip(&points_b)
        .map(|(pa, pb)| pa.distance(*pb))
        .fold(0.0, f64::max)
}
