//! Reading and writing of MRC/MRCS image stacks.
//!
//! Only the subset needed to move particle images around is supported: little-endian
//! files, stacks of rank ≤ 3, and the voxel encodings listed in [`MrcMode`].
//!
//! ```text
//! offset  field
//! 0       nx, ny, nz (i32)
//! 12      mode (i32)
//! 16      nxstart, nystart, nzstart (i32)
//! 28      mx, my, mz (i32)
//! 40      cell lengths x, y, z (f32, Å)
//! 52      cell angles (f32)
//! 64      mapc, mapr, maps (i32)
//! 76      dmin, dmax, dmean (f32)
//! 88      ispg (i32), nsymbt (i32)
//! 104     exttyp, nversion
//! 196     origin x, y, z (f32)
//! 208     "MAP ", machine stamp
//! 216     rms (f32), nlabl (i32)
//! 224     10 labels of 80 characters
//! 1024    extended header (nsymbt bytes), then voxel data
//! ```
use byteorder::{ByteOrder, LittleEndian};
use half::f16;
use ndarray::Array2;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::constants::{IMAGE_STACK_SPACE_GROUP, MRC_HEADER_SIZE, MRC_LABEL_SIZE, MRC_MAX_LABELS};
use super::error::MrcError;

const MAP_TAG: &[u8; 4] = b"MAP ";
const LITTLE_ENDIAN_STAMP: [u8; 4] = [0x44, 0x44, 0x00, 0x00];
const BIG_ENDIAN_STAMP_BYTE: u8 = 0x11;
const MRC_FORMAT_VERSION: i32 = 20140;

/// Voxel encodings, keyed by the MRC mode code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MrcMode {
    Int8,
    Int16,
    Float32,
    Complex64,
    UInt16,
    Float16,
}

impl MrcMode {
    pub fn from_code(code: i32) -> Result<Self, MrcError> {
        match code {
            0 => Ok(Self::Int8),
            1 => Ok(Self::Int16),
            2 => Ok(Self::Float32),
            4 => Ok(Self::Complex64),
            6 => Ok(Self::UInt16),
            12 => Ok(Self::Float16),
            _ => Err(MrcError::UnsupportedMode(code)),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Int8 => 0,
            Self::Int16 => 1,
            Self::Float32 => 2,
            Self::Complex64 => 4,
            Self::UInt16 => 6,
            Self::Float16 => 12,
        }
    }

    pub fn bytes_per_voxel(&self) -> usize {
        match self {
            Self::Int8 => 1,
            Self::Int16 | Self::UInt16 | Self::Float16 => 2,
            Self::Float32 => 4,
            Self::Complex64 => 8,
        }
    }

    /// Decode one voxel. Complex voxels decode to their magnitude.
    fn decode(&self, bytes: &[u8]) -> f32 {
        match self {
            Self::Int8 => bytes[0] as i8 as f32,
            Self::Int16 => LittleEndian::read_i16(bytes) as f32,
            Self::Float32 => LittleEndian::read_f32(bytes),
            Self::Complex64 => {
                let re = LittleEndian::read_f32(&bytes[..4]);
                let im = LittleEndian::read_f32(&bytes[4..8]);
                re.hypot(im)
            }
            Self::UInt16 => LittleEndian::read_u16(bytes) as f32,
            Self::Float16 => f16::from_bits(LittleEndian::read_u16(bytes)).to_f32(),
        }
    }

    /// Encode one voxel; integer modes round and saturate
    fn encode(&self, value: f32, bytes: &mut [u8]) {
        match self {
            Self::Int8 => {
                bytes[0] = value.round().clamp(i8::MIN as f32, i8::MAX as f32) as i8 as u8
            }
            Self::Int16 => LittleEndian::write_i16(
                bytes,
                value.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16,
            ),
            Self::Float32 => LittleEndian::write_f32(bytes, value),
            Self::Complex64 => {
                LittleEndian::write_f32(&mut bytes[..4], value);
                LittleEndian::write_f32(&mut bytes[4..8], 0.0);
            }
            Self::UInt16 => {
                LittleEndian::write_u16(bytes, value.round().clamp(0.0, u16::MAX as f32) as u16)
            }
            Self::Float16 => LittleEndian::write_u16(bytes, f16::from_f32(value).to_bits()),
        }
    }
}

/// The parts of an MRC header this crate reads or writes
#[derive(Debug, Clone, PartialEq)]
pub struct MrcHeader {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    pub mode: MrcMode,
    pub sampling: [i32; 3],
    pub cell: [f32; 3],
    pub ispg: i32,
    pub nsymbt: usize,
    pub dmin: f32,
    pub dmax: f32,
    pub dmean: f32,
    pub rms: f32,
    pub labels: Vec<String>,
}

impl MrcHeader {
    /// Header for a new stack of `n_frames` square frames
    pub fn new_stack(n_frames: usize, box_size: usize, mode: MrcMode, pixel_size: f32) -> Self {
        Self {
            nx: box_size,
            ny: box_size,
            nz: n_frames,
            mode,
            sampling: [box_size as i32, box_size as i32, 1],
            cell: [pixel_size * box_size as f32, pixel_size * box_size as f32, pixel_size],
            ispg: IMAGE_STACK_SPACE_GROUP,
            nsymbt: 0,
            dmin: 0.0,
            dmax: -1.0,
            dmean: -2.0,
            rms: -1.0,
            labels: vec![],
        }
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<Self, MrcError> {
        let mut buffer = [0u8; MRC_HEADER_SIZE];
        reader.read_exact(&mut buffer)?;
        if buffer[212] == BIG_ENDIAN_STAMP_BYTE {
            return Err(MrcError::BadHeader(String::from(
                "big-endian files are not supported",
            )));
        }
        let int = |offset: usize| LittleEndian::read_i32(&buffer[offset..offset + 4]);
        let float = |offset: usize| LittleEndian::read_f32(&buffer[offset..offset + 4]);
        let dim = |offset: usize| -> Result<usize, MrcError> {
            usize::try_from(int(offset)).map_err(|_| {
                MrcError::BadHeader(format!("negative dimension at offset {offset}"))
            })
        };

        let mode = MrcMode::from_code(int(12))?;
        let n_labels = (int(220).max(0) as usize).min(MRC_MAX_LABELS);
        let labels = (0..n_labels)
            .map(|idx| {
                let start = 224 + idx * MRC_LABEL_SIZE;
                String::from_utf8_lossy(&buffer[start..start + MRC_LABEL_SIZE])
                    .trim_end_matches(['\0', ' '])
                    .to_string()
            })
            .collect();

        let header = Self {
            nx: dim(0)?,
            ny: dim(4)?,
            nz: dim(8)?,
            mode,
            sampling: [int(28), int(32), int(36)],
            cell: [float(40), float(44), float(48)],
            ispg: int(88),
            nsymbt: dim(92)?,
            dmin: float(76),
            dmax: float(80),
            dmean: float(84),
            rms: float(216),
            labels,
        };
        header.check_size()?;
        Ok(header)
    }

    /// Fails if the data block described by the dimensions does not fit in memory offsets
    fn check_size(&self) -> Result<(), MrcError> {
        self.nx
            .checked_mul(self.ny)
            .and_then(|n| n.checked_mul(self.mode.bytes_per_voxel()))
            .and_then(|frame| frame.checked_mul(self.nz.max(1)))
            .and_then(|data| data.checked_add(MRC_HEADER_SIZE + self.nsymbt))
            .and_then(|end| u64::try_from(end).ok())
            .map(|_| ())
            .ok_or_else(|| {
                MrcError::BadHeader(format!(
                    "dimensions {}x{}x{} overflow the file size",
                    self.nx, self.ny, self.nz
                ))
            })
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<(), MrcError> {
        let mut buffer = [0u8; MRC_HEADER_SIZE];
        {
            let mut int = |offset: usize, value: i32| {
                LittleEndian::write_i32(&mut buffer[offset..offset + 4], value)
            };
            int(0, self.nx as i32);
            int(4, self.ny as i32);
            int(8, self.nz as i32);
            int(12, self.mode.code());
            int(28, self.sampling[0]);
            int(32, self.sampling[1]);
            int(36, self.sampling[2]);
            int(64, 1);
            int(68, 2);
            int(72, 3);
            int(88, self.ispg);
            int(92, self.nsymbt as i32);
            int(108, MRC_FORMAT_VERSION);
            int(220, self.labels.len().min(MRC_MAX_LABELS) as i32);
        }
        {
            let mut float = |offset: usize, value: f32| {
                LittleEndian::write_f32(&mut buffer[offset..offset + 4], value)
            };
            float(40, self.cell[0]);
            float(44, self.cell[1]);
            float(48, self.cell[2]);
            float(52, 90.0);
            float(56, 90.0);
            float(60, 90.0);
            float(76, self.dmin);
            float(80, self.dmax);
            float(84, self.dmean);
            float(216, self.rms);
        }
        buffer[208..212].copy_from_slice(MAP_TAG);
        buffer[212..216].copy_from_slice(&LITTLE_ENDIAN_STAMP);
        for (idx, label) in self.labels.iter().take(MRC_MAX_LABELS).enumerate() {
            let start = 224 + idx * MRC_LABEL_SIZE;
            let bytes = label.as_bytes();
            let len = bytes.len().min(MRC_LABEL_SIZE);
            buffer[start..start + len].copy_from_slice(&bytes[..len]);
        }
        writer.write_all(&buffer)?;
        Ok(())
    }

    /// Pixel size in Å along x, y, z (0 where the sampling is unset)
    pub fn pixel_size(&self) -> [f32; 3] {
        let mut size = [0.0; 3];
        for (axis, value) in size.iter_mut().enumerate() {
            if self.sampling[axis] > 0 {
                *value = self.cell[axis] / self.sampling[axis] as f32;
            }
        }
        size
    }

    pub fn is_image_stack(&self) -> bool {
        self.ispg == IMAGE_STACK_SPACE_GROUP
    }

    pub fn frame_bytes(&self) -> usize {
        self.nx * self.ny * self.mode.bytes_per_voxel()
    }

    pub fn data_offset(&self) -> u64 {
        (MRC_HEADER_SIZE + self.nsymbt) as u64
    }

    pub fn data_bytes(&self) -> u64 {
        (self.frame_bytes() * self.nz) as u64
    }

    fn frame_offset(&self, index: usize) -> u64 {
        self.data_offset() + (index * self.frame_bytes()) as u64
    }
}

fn decode_frame(header: &MrcHeader, bytes: &[u8]) -> Array2<f32> {
    let width = header.mode.bytes_per_voxel();
    Array2::from_shape_fn((header.ny, header.nx), |(y, x)| {
        let start = (y * header.nx + x) * width;
        header.mode.decode(&bytes[start..start + width])
    })
}

/// An MRC stack opened read-only
#[derive(Debug)]
pub struct MrcStack {
    path: PathBuf,
    file: File,
    header: MrcHeader,
}

impl MrcStack {
    pub fn open(path: &Path) -> Result<Self, MrcError> {
        if !path.exists() {
            return Err(MrcError::SourceNotFound(path.to_path_buf()));
        }
        let mut file = File::open(path)?;
        let header = MrcHeader::read(&mut file)?;
        let expected = header.data_offset() + header.data_bytes();
        let found = file.metadata()?.len();
        if found < expected {
            return Err(MrcError::Truncated(expected, found));
        }
        Ok(Self {
            path: path.to_path_buf(),
            file,
            header,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &MrcHeader {
        &self.header
    }

    /// Number of 2D frames; a single image counts as one frame
    pub fn n_frames(&self) -> usize {
        self.header.nz.max(1)
    }

    /// Read the undecoded bytes of one frame
    pub fn read_frame_bytes(&mut self, index: usize) -> Result<Vec<u8>, MrcError> {
        if index >= self.n_frames() {
            return Err(MrcError::FrameOutOfRange(index, self.n_frames()));
        }
        let mut buffer = vec![0u8; self.header.frame_bytes()];
        self.file
            .seek(SeekFrom::Start(self.header.frame_offset(index)))?;
        self.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Read and decode one frame as (y, x)
    pub fn read_frame(&mut self, index: usize) -> Result<Array2<f32>, MrcError> {
        let bytes = self.read_frame_bytes(index)?;
        Ok(decode_frame(&self.header, &bytes))
    }
}

/// Running min/max/mean/rms over decoded voxels
#[derive(Debug, Clone)]
pub struct StackStatistics {
    pub min: f64,
    pub max: f64,
    sum: f64,
    sum_sq: f64,
    count: usize,
}

impl Default for StackStatistics {
    fn default() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
            sum_sq: 0.0,
            count: 0,
        }
    }
}

impl StackStatistics {
    pub fn add_frame(&mut self, frame: &Array2<f32>) {
        for value in frame.iter().map(|v| *v as f64) {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
            self.sum += value;
            self.sum_sq += value * value;
        }
        self.count += frame.len();
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Standard deviation from the mean, as MRC stores it
    pub fn rms(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mean = self.mean();
        (self.sum_sq / self.count as f64 - mean * mean).max(0.0).sqrt()
    }
}

/// A new MRC stack being written. The file is allocated up front (zero filled) so
/// frames can be written in any order.
#[derive(Debug)]
pub struct MrcStackWriter {
    path: PathBuf,
    file: File,
    header: MrcHeader,
}

impl MrcStackWriter {
    pub fn create(path: &Path, header: MrcHeader) -> Result<Self, MrcError> {
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        header.check_size()?;
        header.write(&mut file)?;
        file.set_len(header.data_offset() + header.data_bytes())?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            header,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &MrcHeader {
        &self.header
    }

    /// Write the undecoded bytes of one frame
    pub fn write_frame_bytes(&mut self, index: usize, bytes: &[u8]) -> Result<(), MrcError> {
        if index >= self.header.nz {
            return Err(MrcError::FrameOutOfRange(index, self.header.nz));
        }
        if bytes.len() != self.header.frame_bytes() {
            return Err(MrcError::Truncated(
                self.header.frame_bytes() as u64,
                bytes.len() as u64,
            ));
        }
        self.file
            .seek(SeekFrom::Start(self.header.frame_offset(index)))?;
        self.file.write_all(bytes)?;
        Ok(())
    }

    /// Encode and write one (y, x) frame in the stack's mode
    pub fn write_frame(&mut self, index: usize, frame: &Array2<f32>) -> Result<(), MrcError> {
        if frame.dim() != (self.header.ny, self.header.nx) {
            return Err(MrcError::ShapeMismatch(
                frame.ncols(),
                frame.nrows(),
                self.header.nx,
            ));
        }
        let width = self.header.mode.bytes_per_voxel();
        let mut bytes = vec![0u8; self.header.frame_bytes()];
        for (value, chunk) in frame.iter().zip(bytes.chunks_exact_mut(width)) {
            self.header.mode.encode(*value, chunk);
        }
        self.write_frame_bytes(index, &bytes)
    }

    /// Recompute statistics over every frame, store them in the header, and close the file
    pub fn close(mut self) -> Result<MrcHeader, MrcError> {
        let mut stats = StackStatistics::default();
        let mut buffer = vec![0u8; self.header.frame_bytes()];
        self.file.seek(SeekFrom::Start(self.header.data_offset()))?;
        for _ in 0..self.header.nz {
            self.file.read_exact(&mut buffer)?;
            stats.add_frame(&decode_frame(&self.header, &buffer));
        }
        if stats.count > 0 {
            self.header.dmin = stats.min as f32;
            self.header.dmax = stats.max as f32;
        }
        self.header.dmean = stats.mean() as f32;
        self.header.rms = stats.rms() as f32;

        self.file.seek(SeekFrom::Start(0))?;
        self.header.write(&mut self.file)?;
        self.file.sync_all()?;
        Ok(self.header)
    }
}
