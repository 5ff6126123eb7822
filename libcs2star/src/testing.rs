//! Synthetic CS datasets and MRC stacks for the unit tests
use byteorder::{LittleEndian, WriteBytesExt};
use ndarray::Array2;
use std::path::Path;

use crate::mrc::{MrcHeader, MrcMode, MrcStackWriter};

pub enum FixtureColumn {
    F32(Vec<f32>),
    F32x2(Vec<[f32; 2]>),
    U32(Vec<u32>),
    U32x2(Vec<[u32; 2]>),
    U64(Vec<u64>),
    Text(usize, Vec<String>),
}

impl FixtureColumn {
    fn len(&self) -> usize {
        match self {
            Self::F32(v) => v.len(),
            Self::F32x2(v) => v.len(),
            Self::U32(v) => v.len(),
            Self::U32x2(v) => v.len(),
            Self::U64(v) => v.len(),
            Self::Text(_, v) => v.len(),
        }
    }

    fn descr(&self, name: &str) -> String {
        match self {
            Self::F32(_) => format!("('{name}', '<f4')"),
            Self::F32x2(_) => format!("('{name}', '<f4', (2,))"),
            Self::U32(_) => format!("('{name}', '<u4')"),
            Self::U32x2(_) => format!("('{name}', '<u4', (2,))"),
            Self::U64(_) => format!("('{name}', '<u8')"),
            Self::Text(size, _) => format!("('{name}', '|S{size}')"),
        }
    }

    fn write_row(&self, row: usize, out: &mut Vec<u8>) {
        match self {
            Self::F32(v) => out.write_f32::<LittleEndian>(v[row]).unwrap(),
            Self::F32x2(v) => {
                out.write_f32::<LittleEndian>(v[row][0]).unwrap();
                out.write_f32::<LittleEndian>(v[row][1]).unwrap();
            }
            Self::U32(v) => out.write_u32::<LittleEndian>(v[row]).unwrap(),
            Self::U32x2(v) => {
                out.write_u32::<LittleEndian>(v[row][0]).unwrap();
                out.write_u32::<LittleEndian>(v[row][1]).unwrap();
            }
            Self::U64(v) => out.write_u64::<LittleEndian>(v[row]).unwrap(),
            Self::Text(size, v) => {
                let mut bytes = v[row].as_bytes().to_vec();
                bytes.resize(*size, 0);
                out.extend_from_slice(&bytes);
            }
        }
    }
}

/// Builds the bytes of a `.cs` file column by column
#[derive(Default)]
pub struct CsFixture {
    columns: Vec<(String, FixtureColumn)>,
}

impl CsFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, name: &str, column: FixtureColumn) -> Self {
        self.columns.push((name.to_string(), column));
        self
    }

    /// Magic, version and padded header for a descr literal and row count
    pub fn npy_prefix(descr: &str, n_rows: usize) -> Vec<u8> {
        let mut header =
            format!("{{'descr': {descr}, 'fortran_order': False, 'shape': ({n_rows},), }}");
        while (10 + header.len() + 1) % 64 != 0 {
            header.push(' ');
        }
        header.push('\n');
        let mut bytes = b"\x93NUMPY\x01\x00".to_vec();
        bytes.write_u16::<LittleEndian>(header.len() as u16).unwrap();
        bytes.extend_from_slice(header.as_bytes());
        bytes
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let n_rows = self.columns.first().map(|(_, c)| c.len()).unwrap_or(0);
        let descr = self
            .columns
            .iter()
            .map(|(name, column)| column.descr(name))
            .collect::<Vec<String>>()
            .join(", ");
        let mut bytes = Self::npy_prefix(&format!("[{descr}]"), n_rows);
        for row in 0..n_rows {
            for (_, column) in self.columns.iter() {
                column.write_row(row, &mut bytes);
            }
        }
        bytes
    }

    pub fn write(&self, path: &Path) {
        std::fs::write(path, self.to_bytes()).unwrap();
    }
}

pub const FIXTURE_BOX: u32 = 8;
pub const FIXTURE_PIXEL_SIZE: f32 = 1.5;
pub const FIXTURE_ALIGN_PIXEL_SIZE: f32 = 3.0;

/// A particle dataset with one row per (blob path, frame index).
///
/// Defocus values encode the row number so rows can be told apart downstream. With
/// alignments, every particle has a shift of (2, -4) pixels at the alignment pixel size.
pub fn particle_fixture(particles: &[(&str, u32)], with_alignments: bool) -> CsFixture {
    let n = particles.len();
    let mut fixture = CsFixture::new()
        .column(
            "uid",
            FixtureColumn::U64((0..n as u64).map(|i| 9_000_000_000_000_000_000 + i).collect()),
        )
        .column(
            "blob/path",
            FixtureColumn::Text(
                96,
                particles.iter().map(|(path, _)| path.to_string()).collect(),
            ),
        )
        .column(
            "blob/idx",
            FixtureColumn::U32(particles.iter().map(|(_, idx)| *idx).collect()),
        )
        .column(
            "blob/shape",
            FixtureColumn::U32x2(vec![[FIXTURE_BOX, FIXTURE_BOX]; n]),
        )
        .column("blob/psize_A", FixtureColumn::F32(vec![FIXTURE_PIXEL_SIZE; n]))
        .column("ctf/accel_kv", FixtureColumn::F32(vec![300.0; n]))
        .column("ctf/cs_mm", FixtureColumn::F32(vec![2.7; n]))
        .column("ctf/amp_contrast", FixtureColumn::F32(vec![0.1; n]))
        .column(
            "ctf/df1_A",
            FixtureColumn::F32((0..n).map(|i| 10_000.0 + i as f32).collect()),
        )
        .column(
            "ctf/df2_A",
            FixtureColumn::F32((0..n).map(|i| 9_000.0 + i as f32).collect()),
        )
        .column(
            "ctf/df_angle_rad",
            FixtureColumn::F32(vec![std::f32::consts::FRAC_PI_2; n]),
        )
        .column("ctf/phase_shift_rad", FixtureColumn::F32(vec![0.0; n]));
    if with_alignments {
        fixture = fixture
            .column("alignments2D/shift", FixtureColumn::F32x2(vec![[2.0, -4.0]; n]))
            .column(
                "alignments2D/psize_A",
                FixtureColumn::F32(vec![FIXTURE_ALIGN_PIXEL_SIZE; n]),
            );
    }
    fixture
}

/// Known voxel value of a synthetic source stack
pub fn source_value(seed: usize, frame: usize, y: usize, x: usize) -> f32 {
    (seed * 10_000 + frame * 100 + y * FIXTURE_BOX as usize + x) as f32
}

pub fn source_frame(seed: usize, frame: usize) -> Array2<f32> {
    let size = FIXTURE_BOX as usize;
    Array2::from_shape_fn((size, size), |(y, x)| source_value(seed, frame, y, x))
}

/// Write a float32 source stack whose voxels follow [`source_value`]
pub fn write_source_stack(path: &Path, n_frames: usize, seed: usize) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let header = MrcHeader::new_stack(
        n_frames,
        FIXTURE_BOX as usize,
        MrcMode::Float32,
        FIXTURE_PIXEL_SIZE,
    );
    let mut writer = MrcStackWriter::create(path, header).unwrap();
    for frame in 0..n_frames {
        writer.write_frame(frame, &source_frame(seed, frame)).unwrap();
    }
    writer.close().unwrap();
}
