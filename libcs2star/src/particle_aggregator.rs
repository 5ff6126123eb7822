use std::path::Path;

use super::config::Config;
use super::constants::{ALIGNMENT_PREFIXES, OUTPUT_STACK_EXTENSION, UID_PREFIX_SEPARATOR};
use super::error::SchemaError;
use super::particle::{FrozenGroups, GroupBuilder, ParticleRecord};
use super::schema_adapter::SchemaAdapter;

pub const BLOB_PATH: &str = "blob/path";
pub const BLOB_INDEX: &str = "blob/idx";
pub const BLOB_SHAPE: &str = "blob/shape";
pub const BLOB_PIXEL_SIZE: &str = "blob/psize_A";
pub const CTF_DEFOCUS_U: &str = "ctf/df1_A";
pub const CTF_DEFOCUS_V: &str = "ctf/df2_A";
pub const CTF_DEFOCUS_ANGLE: &str = "ctf/df_angle_rad";
pub const CTF_VOLTAGE: &str = "ctf/accel_kv";
pub const CTF_SPHERICAL_ABERRATION: &str = "ctf/cs_mm";
pub const CTF_AMPLITUDE_CONTRAST: &str = "ctf/amp_contrast";
pub const CTF_PHASE_SHIFT: &str = "ctf/phase_shift_rad";

const REQUIRED_FIELDS: [&str; 9] = [
    BLOB_PATH,
    BLOB_INDEX,
    BLOB_PIXEL_SIZE,
    CTF_DEFOCUS_U,
    CTF_DEFOCUS_V,
    CTF_DEFOCUS_ANGLE,
    CTF_VOLTAGE,
    CTF_SPHERICAL_ABERRATION,
    CTF_AMPLITUDE_CONTRAST,
];

/// The shift and pixel size fields of one alignment job
#[derive(Debug, Clone, PartialEq, Eq)]
struct AlignmentFields {
    shift: String,
    pixel_size: String,
}

/// Name of the output stack for a source stack.
///
/// Extracted stacks are named `<job uid>_<micrograph>.mrc`; the uid is dropped and the
/// extension replaced, so every particle from one micrograph lands in one stack.
pub fn output_group_name(source: &Path) -> String {
    let base = source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = match base.split_once(UID_PREFIX_SEPARATOR) {
        Some((_, rest)) if !rest.is_empty() => rest,
        _ => base.as_str(),
    };
    Path::new(stem)
        .with_extension(OUTPUT_STACK_EXTENSION)
        .to_string_lossy()
        .into_owned()
}

/// ParticleAggregator reads every particle of a CS dataset and sorts them into groups
/// by output stack.
///
/// Which optional fields exist is decided once, when the aggregator is created.
#[derive(Debug)]
pub struct ParticleAggregator<'a> {
    adapter: &'a SchemaAdapter,
    config: &'a Config,
    alignment: Option<AlignmentFields>,
    phase_shift: Option<&'static str>,
}

impl<'a> ParticleAggregator<'a> {
    /// Create an aggregator, failing if any required field is missing
    pub fn new(adapter: &'a SchemaAdapter, config: &'a Config) -> Result<Self, SchemaError> {
        adapter.require_fields(&REQUIRED_FIELDS)?;

        let alignment = ALIGNMENT_PREFIXES.iter().find_map(|prefix| {
            let fields = AlignmentFields {
                shift: format!("{prefix}/shift"),
                pixel_size: format!("{prefix}/psize_A"),
            };
            (adapter.has_field(&fields.shift) && adapter.has_field(&fields.pixel_size))
                .then_some(fields)
        });
        match &alignment {
            Some(fields) => spdlog::info!("Using particle shifts from {}", fields.shift),
            None => spdlog::warn!("No alignment shifts found; all particle origins will be zero"),
        }
        let phase_shift = adapter.first_present(&[CTF_PHASE_SHIFT]);

        Ok(Self {
            adapter,
            config,
            alignment,
            phase_shift,
        })
    }

    /// Read one particle
    pub fn read_particle(&self, row: usize) -> Result<ParticleRecord, SchemaError> {
        let adapter = self.adapter;
        let source_path = adapter.path(BLOB_PATH, row, &self.config.project_path)?;
        let native_pixel_size = adapter.scalar(BLOB_PIXEL_SIZE, row)?;

        let (origin_x, origin_y) = match &self.alignment {
            Some(fields) => {
                let align_pixel_size = adapter.scalar(&fields.pixel_size, row)?;
                // A zero native pixel size would make the ratio meaningless; keep the raw shift
                let ratio = if native_pixel_size > 0.0 {
                    align_pixel_size / native_pixel_size
                } else {
                    1.0
                };
                (
                    adapter.component(&fields.shift, row, 0)? * ratio,
                    adapter.component(&fields.shift, row, 1)? * ratio,
                )
            }
            None => (0.0, 0.0),
        };

        Ok(ParticleRecord {
            row,
            source_path,
            source_frame: adapter.scalar(BLOB_INDEX, row)? as usize,
            defocus_u: adapter.scalar(CTF_DEFOCUS_U, row)?,
            defocus_v: adapter.scalar(CTF_DEFOCUS_V, row)?,
            defocus_angle: adapter.scalar(CTF_DEFOCUS_ANGLE, row)?.to_degrees(),
            voltage: adapter.scalar(CTF_VOLTAGE, row)?,
            spherical_aberration: adapter.scalar(CTF_SPHERICAL_ABERRATION, row)?,
            amplitude_contrast: adapter.scalar(CTF_AMPLITUDE_CONTRAST, row)?,
            phase_shift: adapter
                .component_or_zero(self.phase_shift, row, 0)?
                .to_degrees(),
            origin_x,
            origin_y,
        })
    }

    /// Read every particle in dataset order and group them by output stack
    pub fn aggregate(&self) -> Result<FrozenGroups, SchemaError> {
        let mut builder = GroupBuilder::new();
        for row in 0..self.adapter.len() {
            let particle = self.read_particle(row)?;
            builder.push(output_group_name(&particle.source_path), particle);
        }
        let groups = builder.freeze();
        spdlog::info!(
            "Aggregated {} particles into {} micrograph groups",
            groups.n_particles(),
            groups.len()
        );
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cs_file::CsDataset;
    use crate::testing::{
        particle_fixture, FIXTURE_ALIGN_PIXEL_SIZE, FIXTURE_PIXEL_SIZE,
    };
    use std::path::PathBuf;

    const PARTICLES: [(&str, u32); 5] = [
        (">J2/extract/101_micA_particles.mrc", 0),
        (">J2/extract/101_micB_particles.mrc", 0),
        (">J2/extract/101_micA_particles.mrc", 1),
        (">J2/extract/101_micC_particles.mrc", 0),
        (">J2/extract/101_micB_particles.mrc", 1),
    ];

    fn adapter(with_alignments: bool) -> SchemaAdapter {
        let bytes = particle_fixture(&PARTICLES, with_alignments).to_bytes();
        SchemaAdapter::new(CsDataset::from_bytes(Path::new("p.cs"), bytes).unwrap())
    }

    fn config() -> Config {
        Config {
            project_path: PathBuf::from("/project"),
            ..Default::default()
        }
    }

    #[test]
    fn test_group_names() {
        assert_eq!(
            output_group_name(Path::new("/p/J2/extract/0123456789_FoilHole_12_Data_3.mrc")),
            "FoilHole_12_Data_3.mrcs"
        );
        assert_eq!(output_group_name(Path::new("plain.mrc")), "plain.mrcs");
        assert_eq!(output_group_name(Path::new("trailing_")), "trailing_.mrcs");
    }

    #[test]
    fn test_aggregation_order_is_deterministic() {
        let adapter = adapter(true);
        let config = config();
        let aggregator = ParticleAggregator::new(&adapter, &config).unwrap();
        let first = aggregator.aggregate().unwrap();
        let second = aggregator.aggregate().unwrap();
        assert_eq!(first, second);

        let names: Vec<&str> = first.groups().iter().map(|g| g.name()).collect();
        assert_eq!(
            names,
            vec!["micA_particles.mrcs", "micB_particles.mrcs", "micC_particles.mrcs"]
        );
        let rows: Vec<Vec<usize>> = first
            .groups()
            .iter()
            .map(|g| g.particles().iter().map(|p| p.row).collect())
            .collect();
        assert_eq!(rows, vec![vec![0, 2], vec![1, 4], vec![3]]);

        let particle = &first.groups()[1].particles()[1];
        assert_eq!(particle.source_frame, 1);
        assert_eq!(
            particle.source_path,
            PathBuf::from("/project/J2/extract/101_micB_particles.mrc")
        );
        assert_eq!(particle.defocus_u, 10_004.0);
        assert_eq!(particle.defocus_v, 9_004.0);
        assert!((particle.defocus_angle - 90.0).abs() < 1e-4);
    }

    #[test]
    fn test_shift_is_rescaled_to_native_pixels() {
        let adapter = adapter(true);
        let config = config();
        let aggregator = ParticleAggregator::new(&adapter, &config).unwrap();
        let particle = aggregator.read_particle(0).unwrap();
        let ratio = (FIXTURE_ALIGN_PIXEL_SIZE / FIXTURE_PIXEL_SIZE) as f64;
        assert_eq!(particle.origin_x, 2.0 * ratio);
        assert_eq!(particle.origin_y, -4.0 * ratio);
    }

    #[test]
    fn test_missing_alignment_defaults_to_zero() {
        let adapter = adapter(false);
        let config = config();
        let groups = ParticleAggregator::new(&adapter, &config)
            .unwrap()
            .aggregate()
            .unwrap();
        assert_eq!(groups.n_particles(), PARTICLES.len());
        for group in groups.groups() {
            for particle in group.particles() {
                assert_eq!(particle.origin_x, 0.0);
                assert_eq!(particle.origin_y, 0.0);
            }
        }
    }

    #[test]
    fn test_missing_required_field() {
        let bytes = crate::testing::CsFixture::new()
            .column(
                "blob/path",
                crate::testing::FixtureColumn::Text(8, vec![String::from("a.mrc")]),
            )
            .to_bytes();
        let adapter =
            SchemaAdapter::new(CsDataset::from_bytes(Path::new("p.cs"), bytes).unwrap());
        let config = config();
        assert!(matches!(
            ParticleAggregator::new(&adapter, &config),
            Err(SchemaError::MissingField(_))
        ));
    }
}
