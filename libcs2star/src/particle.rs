use fxhash::FxHashMap;
use std::path::PathBuf;

use super::constants::{MEDIUM_GROUP_LIMIT, SMALL_GROUP_LIMIT};

/// Everything the exporter needs to know about one particle.
///
/// Angles are in degrees, defocus in Å, origin shifts in pixels of the particle image.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleRecord {
    pub row: usize,
    pub source_path: PathBuf,
    pub source_frame: usize,
    pub defocus_u: f64,
    pub defocus_v: f64,
    pub defocus_angle: f64,
    pub voltage: f64,
    pub spherical_aberration: f64,
    pub amplitude_contrast: f64,
    pub phase_shift: f64,
    pub origin_x: f64,
    pub origin_y: f64,
}

/// The particles bound for one output stack, in frame order
#[derive(Debug, Clone, PartialEq)]
pub struct MicrographGroup {
    name: String,
    particles: Box<[ParticleRecord]>,
}

impl MicrographGroup {
    /// Output stack file name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn particles(&self) -> &[ParticleRecord] {
        &self.particles
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }
}

/// Growable, insertion-ordered collection of groups used while aggregating
#[derive(Debug, Default)]
pub struct GroupBuilder {
    groups: Vec<(String, Vec<ParticleRecord>)>,
    index: FxHashMap<String, usize>,
}

impl GroupBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a particle to its group, creating the group on first sight
    pub fn push(&mut self, key: String, particle: ParticleRecord) {
        match self.index.get(&key) {
            Some(idx) => self.groups[*idx].1.push(particle),
            None => {
                self.index.insert(key.clone(), self.groups.len());
                self.groups.push((key, vec![particle]));
            }
        }
    }

    pub fn n_groups(&self) -> usize {
        self.groups.len()
    }

    /// Fix the order of groups and of particles within each group
    pub fn freeze(self) -> FrozenGroups {
        FrozenGroups {
            groups: self
                .groups
                .into_iter()
                .map(|(name, particles)| MicrographGroup {
                    name,
                    particles: particles.into_boxed_slice(),
                })
                .collect(),
        }
    }
}

/// The immutable result of aggregation. Group order, and particle order within each
/// group, decide frame numbers and table rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrozenGroups {
    groups: Box<[MicrographGroup]>,
}

impl FrozenGroups {
    pub fn groups(&self) -> &[MicrographGroup] {
        &self.groups
    }

    pub fn get(&self, idx: usize) -> Option<&MicrographGroup> {
        self.groups.get(idx)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn n_particles(&self) -> usize {
        self.groups.iter().map(MicrographGroup::len).sum()
    }

    /// The first particle of the first group
    pub fn first_particle(&self) -> Option<&ParticleRecord> {
        self.groups.first().and_then(|g| g.particles.first())
    }

    /// A copy holding only the groups whose index passes `keep`, order preserved
    pub fn select<F: Fn(usize) -> bool>(&self, keep: F) -> Self {
        Self {
            groups: self
                .groups
                .iter()
                .enumerate()
                .filter(|(idx, _)| keep(*idx))
                .map(|(_, group)| group.clone())
                .collect(),
        }
    }

    pub fn size_buckets(&self) -> GroupSizeBuckets {
        GroupSizeBuckets::from_sizes(self.groups.iter().map(MicrographGroup::len))
    }
}

/// Counts of small groups. The buckets overlap: a group of one is also under five.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupSizeBuckets {
    pub exactly_one: usize,
    pub under_five: usize,
    pub under_ten: usize,
}

impl GroupSizeBuckets {
    pub fn from_sizes<I: IntoIterator<Item = usize>>(sizes: I) -> Self {
        let mut buckets = Self::default();
        for size in sizes {
            if size == 1 {
                buckets.exactly_one += 1;
            }
            if size < SMALL_GROUP_LIMIT {
                buckets.under_five += 1;
            }
            if size < MEDIUM_GROUP_LIMIT {
                buckets.under_ten += 1;
            }
        }
        buckets
    }
}
