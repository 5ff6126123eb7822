use fxhash::FxHashMap;
use std::path::Path;

use super::constants::{LEGACY_PARTICLES_TABLE, PARTICLES_TABLE};
use super::error::StarError;
use super::particle::GroupSizeBuckets;
use super::star_file::{get_field, require_field, ColumnSpec, StarFile};
use super::star_writer::{IMAGE_NAME_COLUMN, MICROGRAPH_NAME_COLUMN};

const IMAGE_NAME: ColumnSpec = ColumnSpec::new(IMAGE_NAME_COLUMN, &[]);
const MICROGRAPH_NAME: ColumnSpec = ColumnSpec::new(MICROGRAPH_NAME_COLUMN, &[]);

/// Particle counts of an existing particle STAR file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarSummary {
    /// Title of the table the particles were read from
    pub table: String,
    pub n_particles: usize,
    /// Particles per micrograph, in order of first appearance
    pub micrographs: Vec<(String, usize)>,
    pub buckets: GroupSizeBuckets,
}

/// The stack part of an image reference (`index@stack`)
fn stack_of(image_name: &str) -> &str {
    image_name
        .split_once('@')
        .map(|(_, stack)| stack)
        .unwrap_or(image_name)
}

impl StarSummary {
    /// Count the particles of a STAR file already in memory
    pub fn from_star(star: &StarFile) -> Result<Self, StarError> {
        let table = star.locate_first_table(&[PARTICLES_TABLE, LEGACY_PARTICLES_TABLE])?;
        let image = star.resolve_column(&table, &IMAGE_NAME)?;
        let micrograph = star.resolve_optional_column(&table, &MICROGRAPH_NAME)?;

        let mut micrographs: Vec<(String, usize)> = vec![];
        let mut index = FxHashMap::<String, usize>::default();
        let mut n_particles = 0;
        for (number, line) in star.records(&table) {
            let image_name = require_field(line, number, &image)?;
            let key = micrograph
                .as_ref()
                .and_then(|column| get_field(line, column.index))
                .unwrap_or_else(|| stack_of(image_name));
            match index.get(key) {
                Some(idx) => micrographs[*idx].1 += 1,
                None => {
                    index.insert(key.to_string(), micrographs.len());
                    micrographs.push((key.to_string(), 1));
                }
            }
            n_particles += 1;
        }

        Ok(Self {
            table: table.title,
            n_particles,
            buckets: GroupSizeBuckets::from_sizes(micrographs.iter().map(|(_, n)| *n)),
            micrographs,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, StarError> {
        let summary = Self::from_star(&StarFile::open(path)?)?;
        spdlog::info!(
            "{} holds {} particles from {} micrographs",
            path.display(),
            summary.n_particles,
            summary.micrographs.len()
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CURRENT: &str = "# version 30001

data_optics

loop_
_rlnOpticsGroupName #1
_rlnOpticsGroup #2
optics_1\t1

# version 30001

data_particles

loop_
_rlnMicrographName #2
_rlnImageName #1
0@stacks/b.mrcs\t/p/1_b.mrc
0@stacks/a.mrcs\t/p/1_a.mrc
1@stacks/b.mrcs\t/p/1_b.mrc
";

    const LEGACY: &str = "
data_

loop_
_rlnImageName
_rlnDefocusU
1@x.mrcs 100.0
2@x.mrcs 100.0
1@y.mrcs 100.0
";

    #[test]
    fn test_current_layout() {
        let star = StarFile::from_contents(Path::new("p.star"), CURRENT);
        let summary = StarSummary::from_star(&star).unwrap();
        assert_eq!(summary.table, "data_particles");
        assert_eq!(summary.n_particles, 3);
        assert_eq!(
            summary.micrographs,
            vec![(String::from("/p/1_b.mrc"), 2), (String::from("/p/1_a.mrc"), 1)]
        );
        assert_eq!(summary.buckets.exactly_one, 1);
        assert_eq!(summary.buckets.under_five, 2);
    }

    #[test]
    fn test_legacy_layout_without_micrographs() {
        let star = StarFile::from_contents(Path::new("p.star"), LEGACY);
        let summary = StarSummary::from_star(&star).unwrap();
        assert_eq!(summary.table, "data_");
        assert_eq!(
            summary.micrographs,
            vec![(String::from("x.mrcs"), 2), (String::from("y.mrcs"), 1)]
        );
    }

    #[test]
    fn test_missing_image_column() {
        let star = StarFile::from_contents(
            Path::new("p.star"),
            "data_particles\nloop_\n_rlnDefocusU #1\n1.0\n",
        );
        assert!(matches!(
            StarSummary::from_star(&star),
            Err(StarError::MissingColumn(_, _))
        ));
    }
}
