//! Interest points per view and label, and the read-only snapshots handed to matchers.

use glam::DVec3;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::transform::Transform;
use crate::view::{ViewId, ViewRegistry};

/// A detected point in view-local coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct InterestPoint {
    pub id: usize,
    pub pos: DVec3,
}

impl InterestPoint {
    pub fn new(id: usize, pos: DVec3) -> Self {
        Self { id, pos }
    }
}

/// The points of one view detected under one label.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewInterestPoints {
    pub view_id: ViewId,
    pub label: String,
    pub points: Vec<InterestPoint>,
}

/// All interest point lists of a dataset, keyed by `(view, label)`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(from = "Vec<ViewInterestPoints>", into = "Vec<ViewInterestPoints>")]
pub struct InterestPointStore {
    lists: HashMap<(ViewId, String), Vec<InterestPoint>>,
}

impl InterestPointStore {
    pub fn insert(&mut self, view_id: ViewId, label: impl Into<String>, points: Vec<InterestPoint>) {
        self.lists.insert((view_id, label.into()), points);
    }

    pub fn points(&self, view_id: ViewId, label: &str) -> Option<&[InterestPoint]> {
        self.lists
            .get(&(view_id, label.to_string()))
            .map(Vec::as_slice)
    }

    pub fn labels(&self, view_id: ViewId) -> Vec<&str> {
        let mut labels: Vec<&str> = self
            .lists
            .keys()
            .filter(|(id, _)| *id == view_id)
            .map(|(_, label)| label.as_str())
            .collect();
        labels.sort_unstable();
        labels
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}

impl From<Vec<ViewInterestPoints>> for InterestPointStore {
    fn from(lists: Vec<ViewInterestPoints>) -> Self {
        let mut store = Self::default();
        for list in lists {
            store.insert(list.view_id, list.label, list.points);
        }
        store
    }
}

impl From<InterestPointStore> for Vec<ViewInterestPoints> {
    fn from(store: InterestPointStore) -> Self {
        let mut lists: Vec<ViewInterestPoints> = store
            .lists
            .into_iter()
            .map(|((view_id, label), points)| ViewInterestPoints {
                view_id,
                label,
                points,
            })
            .collect();
        lists.sort_by(|a, b| (a.view_id, &a.label).cmp(&(b.view_id, &b.label)));
        lists
    }
}

/// A point tagged with the view it came from, in both local and world coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GroupedPoint {
    pub view_id: ViewId,
    pub id: usize,
    pub local: DVec3,
    pub world: DVec3,
}

/// How views of different channels are combined before matching.
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
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum InterestPointGrouping {
    /// Every view is matched on its own.
    #[default]
    DoNotGroup,
    /// Channels sharing timepoint, angle and illumination are merged.
    AddAll,
}

/// Views matched and solved as one unit. Members are sorted; the first is the representative.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ViewGroup {
    views: Vec<ViewId>,
}

impl ViewGroup {
    pub fn single(view_id: ViewId) -> Self {
        Self {
            views: vec![view_id],
        }
    }

    pub fn new(mut views: Vec<ViewId>) -> Self {
        assert!(!views.is_empty(), "a view group needs at least one view");
        views.sort();
        views.dedup();
        Self { views }
    }

    pub fn representative(&self) -> ViewId {
        self.views[0]
    }

    pub fn views(&self) -> &[ViewId] {
        &self.views
    }

    pub fn contains(&self, view_id: ViewId) -> bool {
        self.views.binary_search(&view_id).is_ok()
    }
}

/// Groups `views` according to `grouping`. Views the registry cannot
/// describe stay on their own. Output is sorted by representative.
pub fn group_views(
    views: &[ViewId],
    registry: &dyn ViewRegistry,
    grouping: InterestPointGrouping,
) -> Vec<ViewGroup> {
    let mut groups: Vec<ViewGroup> = match grouping {
        InterestPointGrouping::DoNotGroup => views.iter().copied().map(ViewGroup::single).collect(),
        InterestPointGrouping::AddAll => {
            let mut buckets: HashMap<(i32, i32, i32), Vec<ViewId>> = HashMap::new();
            let mut singles = Vec::new();

            for &view_id in views {
                match registry.view_description(view_id) {
                    Some(description) => buckets
                        .entry((
                            view_id.timepoint,
                            description.angle().id,
                            description.illumination().id,
                        ))
                        .or_default()
                        .push(view_id),
                    None => singles.push(ViewGroup::single(view_id)),
                }
            }

            buckets
                .into_values()
                .map(ViewGroup::new)
                .chain(singles)
                .collect()
        }
    };

    groups.sort_by_key(ViewGroup::representative);
    groups.dedup();
    groups
}

/// Collects the points of every view in `group` under the label chosen for
/// that view, with world positions from `transform_of`.
pub fn snapshot_group<L, T>(
    group: &ViewGroup,
    store: &InterestPointStore,
    label_of: L,
    transform_of: T,
) -> Vec<GroupedPoint>
where
    L: Fn(ViewId) -> Option<String>,
    T: Fn(ViewId) -> Transform,
{
    let mut snapshot = Vec::new();

    for &view_id in group.views() {
        let Some(label) = label_of(view_id) else {
            continue;
        };
        let Some(points) = store.points(view_id, &label) else {
            continue;
        };

        let transform = transform_of(view_id);
        snapshot.extend(points.iter().map(|p| GroupedPoint {
            view_id,
            id: p.id,
            local: p.pos,
            world: transform.apply(p.pos),
        }));
    }

    snapshot
}
