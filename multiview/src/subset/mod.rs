//! Splitting the requested views into independently solvable subsets.
//!
//! Views are first combined into [`ViewGroup`]s, then a [`PairingPolicy`]
//! decides which groups are compared. Groups connected through eligible
//! pairs end up in the same [`GlobalOptimizationSubset`].


use std::fmt;

use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::interest_points::{InterestPointGrouping, ViewGroup, group_views};
use crate::optimizer::FixMapBackParameters;
use crate::pairwise::PairwiseMatch;
use crate::view::{ViewId, ViewRegistry};

/// Decides which pairs of views are compared.
pub trait PairingPolicy: Send + Sync {
    /// Called with `a < b`.
    fn is_eligible(&self, a: ViewId, b: ViewId) -> bool;

    fn describe(&self) -> String;

    /// Timepoint every other timepoint is registered against, if any.
    /// Subsets containing it are anchored on its first view.
    fn reference_timepoint(&self) -> Option<i32> {
        None
    }
}

/// Built-in pairing policies across timepoints.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(tag = "type", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum RegistrationType {
    /// Only views of the same timepoint are compared.
    #[default]
    TimepointsIndividually,
    /// Views of the reference timepoint among themselves, and every view against them.
    ToReferenceTimepoint { reference: i32 },
    /// Every view against every other.
    AllToAll,
    /// Views whose timepoints differ by at most `range`.
    AllToAllWithRange { range: i32 },
}

impl PairingPolicy for RegistrationType {
    fn is_eligible(&self, a: ViewId, b: ViewId) -> bool {
        match *self {
            RegistrationType::TimepointsIndividually => a.timepoint == b.timepoint,
            RegistrationType::ToReferenceTimepoint { reference } => {
                a.timepoint == reference || b.timepoint == reference
            }
            RegistrationType::AllToAll => true,
            RegistrationType::AllToAllWithRange { range } => {
                u32::try_from(range).is_ok_and(|range| a.timepoint.abs_diff(b.timepoint) <= range)
            }
        }
    }

    fn reference_timepoint(&self) -> Option<i32> {
        match *self {
            RegistrationType::ToReferenceTimepoint { reference } => Some(reference),
            _ => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            RegistrationType::TimepointsIndividually => "timepoints individually".to_string(),
            RegistrationType::ToReferenceTimepoint { reference } => {
                format!("to reference timepoint {reference}")
            }
            RegistrationType::AllToAll => "all-to-all".to_string(),
            RegistrationType::AllToAllWithRange { range } => {
                format!("all-to-all within {range} timepoints")
            }
        }
    }
}

/// A caller-supplied set of eligible unordered pairs.
#[derive(Debug, Clone, Default)]
pub struct ExplicitPairs {
    pairs: HashSet<(ViewId, ViewId)>,
}

impl ExplicitPairs {
    pub fn new(pairs: impl IntoIterator<Item = (ViewId, ViewId)>) -> Self {
        let mut explicit = Self::default();
        for (a, b) in pairs {
            explicit.insert(a, b);
        }
        explicit
    }

    pub fn insert(&mut self, a: ViewId, b: ViewId) {
        if a != b {
            self.pairs.insert((a.min(b), a.max(b)));
        }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl PairingPolicy for ExplicitPairs {
    fn is_eligible(&self, a: ViewId, b: ViewId) -> bool {
        self.pairs.contains(&(a.min(b), a.max(b)))
    }

    fn describe(&self) -> String {
        format!("{} explicit pairs", self.pairs.len())
    }
}

/// Views that are solved together, with the pairs compared between their groups.
#[derive(Debug, Clone)]
pub struct GlobalOptimizationSubset {
    views: Vec<ViewId>,
    groups: Vec<ViewGroup>,
    pairs: Vec<PairwiseMatch>,
    anchor: ViewId,
}

impl GlobalOptimizationSubset {
    /// `groups` must be sorted and non-empty, and every pair must connect two of them.
    fn new(groups: Vec<ViewGroup>, pairs: Vec<PairwiseMatch>, reference_timepoint: Option<i32>) -> Self {
        let mut views: Vec<ViewId> = groups.iter().flat_map(|g| g.views().iter().copied()).collect();
        views.sort();

        let anchor = reference_timepoint
            .and_then(|reference| views.iter().copied().find(|v| v.timepoint == reference))
            .unwrap_or(views[0]);

        debug_assert!(pairs.iter().all(|p| {
            groups.iter().any(|g| g.representative() == p.view_a())
                && groups.iter().any(|g| g.representative() == p.view_b())
        }));

        Self {
            views,
            groups,
            pairs,
            anchor,
        }
    }

    pub fn views(&self) -> &[ViewId] {
        &self.views
    }

    pub fn groups(&self) -> &[ViewGroup] {
        &self.groups
    }

    pub fn pairs(&self) -> &[PairwiseMatch] {
        &self.pairs
    }

    pub fn pairs_mut(&mut self) -> &mut [PairwiseMatch] {
        &mut self.pairs
    }

    pub fn contains(&self, view_id: ViewId) -> bool {
        self.views.binary_search(&view_id).is_ok()
    }

    /// The group a member view belongs to.
    pub fn group_of(&self, view_id: ViewId) -> Option<&ViewGroup> {
        self.groups.iter().find(|g| g.contains(view_id))
    }

    pub fn first_view(&self) -> ViewId {
        self.views[0]
    }

    /// The view kept in place by default: the first view of the reference
    /// timepoint when the subset contains one, the first view otherwise.
    pub fn anchor_view(&self) -> ViewId {
        self.anchor
    }
}

impl fmt::Display for GlobalOptimizationSubset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "subset of {} views ({} groups, {} pairs) starting at {}",
            self.views.len(),
            self.groups.len(),
            self.pairs.len(),
            self.first_view()
        )
    }
}

/// Path-compressing union-find over group indices.
#[derive(Debug)]
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, index: usize) -> usize {
        let mut root = index;
        while self.parent[root] != root {
            root = self.parent[root];
        }

        let mut current = index;
        while current != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }

        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        // Smaller index wins so roots stay at the first group of a component.
        if root_a < root_b {
            self.parent[root_b] = root_a;
        } else if root_b < root_a {
            self.parent[root_a] = root_b;
        }
    }
}

/// Partitions `groups` into connected components of eligible pairs.
///
/// Output subsets are ordered by their smallest view, pairs within a subset
/// by `(a, b)` with `a < b`. Groups without any eligible partner form
/// subsets of their own.
pub fn partition(mut groups: Vec<ViewGroup>, policy: &dyn PairingPolicy) -> Vec<GlobalOptimizationSubset> {
    groups.sort_by_key(ViewGroup::representative);
    let reference_timepoint = policy.reference_timepoint();

    let mut union_find = UnionFind::new(groups.len());
    let mut eligible: Vec<(usize, usize)> = Vec::new();

    for i in 0..groups.len() {
        for j in (i + 1)..groups.len() {
            if policy.is_eligible(groups[i].representative(), groups[j].representative()) {
                eligible.push((i, j));
                union_find.union(i, j);
            }
        }
    }

    let mut components: HashMap<usize, (Vec<usize>, Vec<(usize, usize)>)> = HashMap::new();
    for index in 0..groups.len() {
        let root = union_find.find(index);
        components.entry(root).or_default().0.push(index);
    }
    for (i, j) in eligible {
        let root = union_find.find(i);
        if let Some(component) = components.get_mut(&root) {
            component.1.push((i, j));
        }
    }

    let mut roots: Vec<usize> = components.keys().copied().collect();
    roots.sort_unstable();

    roots
        .into_iter()
        .filter_map(|root| components.remove(&root))
        .map(|(members, pairs)| {
            let pairs = pairs
                .into_iter()
                .map(|(i, j)| PairwiseMatch::new(groups[i].representative(), groups[j].representative()))
                .collect();
            let members = members.into_iter().map(|i| groups[i].clone()).collect();
            GlobalOptimizationSubset::new(members, pairs, reference_timepoint)
        })
        .collect()
}

/// Subset construction together with the anchoring of each subset's solve.
pub struct GlobalOptimizationType {
    policy: Box<dyn PairingPolicy>,
    parameters: FixMapBackParameters,
}

impl GlobalOptimizationType {
    pub fn new(policy: impl PairingPolicy + 'static, parameters: FixMapBackParameters) -> Self {
        Self {
            policy: Box::new(policy),
            parameters,
        }
    }

    pub fn parameters(&self) -> &FixMapBackParameters {
        &self.parameters
    }

    pub fn grouping(&self) -> InterestPointGrouping {
        self.parameters.grouping
    }

    pub fn describe(&self) -> String {
        self.policy.describe()
    }

    /// Subsets of `views`. Views the registry does not know (missing views) are dropped.
    pub fn subsets(&self, views: &[ViewId], registry: &dyn ViewRegistry) -> Vec<GlobalOptimizationSubset> {
        let mut present: Vec<ViewId> = views
            .iter()
            .copied()
            .filter(|&view_id| registry.view_description(view_id).is_some())
            .collect();
        present.sort();
        present.dedup();

        let groups = group_views(&present, registry, self.parameters.grouping);
        partition(groups, self.policy.as_ref())
    }
}
