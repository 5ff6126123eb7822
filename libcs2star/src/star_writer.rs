use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::config::Config;
use super::constants::{OPTICS_TABLE, PARTICLES_TABLE, STAR_VERSION_MARKER};
use super::error::StarWriterError;
use super::optics::{OpticsRecord, StarValue};
use super::particle::{FrozenGroups, ParticleRecord};

pub const IMAGE_NAME_COLUMN: &str = "_rlnImageName";
pub const MICROGRAPH_NAME_COLUMN: &str = "_rlnMicrographName";

const PARTICLE_COLUMNS: [&str; 9] = [
    IMAGE_NAME_COLUMN,
    MICROGRAPH_NAME_COLUMN,
    "_rlnDefocusU",
    "_rlnDefocusV",
    "_rlnDefocusAngle",
    "_rlnPhaseShift",
    "_rlnOriginXAngst",
    "_rlnOriginYAngst",
    "_rlnOpticsGroup",
];

/// Reference to frame `index` (0-based) of a stack, as written in the image name column
pub fn image_reference(index: usize, stack: &str) -> String {
    format!("{index}@{stack}")
}

fn particle_row(
    particle: &ParticleRecord,
    image_name: String,
    optics: &OpticsRecord,
) -> [StarValue; 9] {
    let pixel_size = optics.pixel_size();
    [
        StarValue::Text(image_name),
        StarValue::Text(particle.source_path.to_string_lossy().into_owned()),
        StarValue::Float(particle.defocus_u),
        StarValue::Float(particle.defocus_v),
        StarValue::Float(particle.defocus_angle),
        StarValue::Float(particle.phase_shift),
        StarValue::Float(particle.origin_x * pixel_size),
        StarValue::Float(particle.origin_y * pixel_size),
        StarValue::Integer(optics.group_id()),
    ]
}

/// Write one `loop_` table followed by a blank line
fn write_table<'a, W, C, R, V>(
    writer: &mut W,
    title: &str,
    columns: C,
    rows: R,
) -> Result<(), StarWriterError>
where
    W: Write,
    C: IntoIterator<Item = &'a str>,
    R: IntoIterator<Item = V>,
    V: IntoIterator,
    V::Item: std::fmt::Display,
{
    writeln!(writer, "{STAR_VERSION_MARKER}")?;
    writeln!(writer)?;
    writeln!(writer, "{title}")?;
    writeln!(writer)?;
    writeln!(writer, "loop_")?;
    for (idx, column) in columns.into_iter().enumerate() {
        writeln!(writer, "{column} #{}", idx + 1)?;
    }
    for row in rows {
        let line = row
            .into_iter()
            .map(|value| value.to_string())
            .collect::<Vec<String>>()
            .join("\t");
        writeln!(writer, "{line}")?;
    }
    writeln!(writer)?;
    Ok(())
}

/// StarWriter writes the merged particle STAR file: a one row optics table and one
/// particle row per exported particle, in group order.
#[derive(Debug)]
pub struct StarWriter {
    path: PathBuf,
}

impl StarWriter {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(
        &self,
        optics: &OpticsRecord,
        groups: &FrozenGroups,
        config: &Config,
    ) -> Result<(), StarWriterError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(&self.path)?);

        write_table(
            &mut writer,
            OPTICS_TABLE,
            optics.columns(),
            std::iter::once(optics.values()),
        )?;

        let rows = groups.groups().iter().flat_map(move |group| {
            let stack = config.get_stack_reference(group.name());
            group
                .particles()
                .iter()
                .enumerate()
                .map(move |(idx, particle)| {
                    particle_row(particle, image_reference(idx, &stack), optics)
                })
        });
        write_table(&mut writer, PARTICLES_TABLE, PARTICLE_COLUMNS, rows)?;

        writer.flush()?;
        spdlog::info!(
            "Wrote {} particles to {}",
            groups.n_particles(),
            self.path.display()
        );
        Ok(())
    }
}
