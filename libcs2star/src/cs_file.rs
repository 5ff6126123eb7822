use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::path::{Path, PathBuf};

use super::error::CsFileError;
use super::npy_header::{NpyHeader, PyLiteral};

const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Float,
    Int,
    UInt,
    Bool,
    Bytes,
    Void,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// One named field of the structured record, with its location inside a row
#[derive(Debug, Clone, PartialEq)]
pub struct CsField {
    pub name: String,
    pub kind: FieldKind,
    pub endian: Endian,
    pub item_size: usize,
    pub shape: Vec<usize>,
    pub offset: usize,
}

impl CsField {
    /// Number of items per row (1 for scalars)
    pub fn n_components(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn byte_size(&self) -> usize {
        self.item_size * self.n_components()
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self.kind,
            FieldKind::Float | FieldKind::Int | FieldKind::UInt | FieldKind::Bool
        )
    }

    /// Build a field from one `('name', 'dtype'[, shape])` entry of the descr list
    fn from_descr(entry: &PyLiteral, offset: usize) -> Result<Self, CsFileError> {
        let items = entry.as_sequence().ok_or(CsFileError::NotStructured)?;
        let name = items
            .first()
            .and_then(PyLiteral::as_str)
            .ok_or(CsFileError::NotStructured)?
            .to_string();
        let dtype = items
            .get(1)
            .and_then(PyLiteral::as_str)
            .ok_or_else(|| CsFileError::UnsupportedDtype(name.clone(), String::from("?")))?;
        let shape = match items.get(2) {
            Some(PyLiteral::Int(n)) => vec![usize::try_from(*n).unwrap_or(0)],
            Some(PyLiteral::Tuple(dims)) => dims
                .iter()
                .map(|d| d.as_int().and_then(|d| usize::try_from(d).ok()))
                .collect::<Option<Vec<usize>>>()
                .ok_or_else(|| CsFileError::UnsupportedDtype(name.clone(), dtype.to_string()))?,
            Some(_) => {
                return Err(CsFileError::UnsupportedDtype(name, dtype.to_string()));
            }
            None => vec![],
        };
        let (kind, endian, item_size) = parse_dtype(dtype)
            .ok_or_else(|| CsFileError::UnsupportedDtype(name.clone(), dtype.to_string()))?;
        shape
            .iter()
            .try_fold(1usize, |acc, dim| acc.checked_mul(*dim))
            .and_then(|n| n.checked_mul(item_size))
            .ok_or_else(|| CsFileError::BadHeader(format!("field {name} overflows its size")))?;

        Ok(Self {
            name,
            kind,
            endian,
            item_size,
            shape,
            offset,
        })
    }
}

/// Split a dtype string such as `<f4` or `|S64` into kind, byte order and item size
fn parse_dtype(dtype: &str) -> Option<(FieldKind, Endian, usize)> {
    let (endian, rest) = match dtype.chars().next()? {
        '<' | '|' | '=' => (Endian::Little, &dtype[1..]),
        '>' => (Endian::Big, &dtype[1..]),
        _ => (Endian::Little, dtype),
    };
    let mut chars = rest.chars();
    let kind = match chars.next()? {
        'f' => FieldKind::Float,
        'i' => FieldKind::Int,
        'u' => FieldKind::UInt,
        'b' => FieldKind::Bool,
        'S' => FieldKind::Bytes,
        'V' => FieldKind::Void,
        _ => return None,
    };
    let size: usize = chars.as_str().parse().ok()?;
    let valid = match kind {
        FieldKind::Float => matches!(size, 4 | 8),
        FieldKind::Int | FieldKind::UInt => matches!(size, 1 | 2 | 4 | 8),
        FieldKind::Bool => size == 1,
        FieldKind::Bytes | FieldKind::Void => true,
    };
    valid.then_some((kind, endian, size))
}

fn decode_number<B: ByteOrder>(kind: FieldKind, bytes: &[u8]) -> Option<f64> {
    let value = match (kind, bytes.len()) {
        (FieldKind::Float, 4) => B::read_f32(bytes) as f64,
        (FieldKind::Float, 8) => B::read_f64(bytes),
        (FieldKind::Int, 1) => bytes[0] as i8 as f64,
        (FieldKind::Int, 2) => B::read_i16(bytes) as f64,
        (FieldKind::Int, 4) => B::read_i32(bytes) as f64,
        (FieldKind::Int, 8) => B::read_i64(bytes) as f64,
        (FieldKind::UInt, 1) => bytes[0] as f64,
        (FieldKind::UInt, 2) => B::read_u16(bytes) as f64,
        (FieldKind::UInt, 4) => B::read_u32(bytes) as f64,
        (FieldKind::UInt, 8) => B::read_u64(bytes) as f64,
        (FieldKind::Bool, 1) => {
            if bytes[0] != 0 {
                1.0
            } else {
                0.0
            }
        }
        _ => return None,
    };
    Some(value)
}

/// A CS dataset: a one dimensional NumPy structured array, held in memory.
///
/// The dataset is read once and never modified. Values are decoded on access.
#[derive(Debug, Clone)]
pub struct CsDataset {
    path: PathBuf,
    fields: Vec<CsField>,
    n_rows: usize,
    row_size: usize,
    data: Vec<u8>,
}

impl CsDataset {
    /// Read a CS dataset from disk
    pub fn open(path: &Path) -> Result<Self, CsFileError> {
        if !path.exists() {
            return Err(CsFileError::BadFilePath(path.to_path_buf()));
        }
        let bytes = std::fs::read(path)?;
        let dataset = Self::from_bytes(path, bytes)?;
        spdlog::info!(
            "Read {} records with {} fields ({}) from {}",
            dataset.len(),
            dataset.fields.len(),
            human_bytes::human_bytes((dataset.len() * dataset.row_size) as f64),
            path.display()
        );
        Ok(dataset)
    }

    /// Parse the full contents of a `.cs` file
    pub fn from_bytes(path: &Path, mut bytes: Vec<u8>) -> Result<Self, CsFileError> {
        if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
            return Err(CsFileError::BadMagic);
        }
        let (major, minor) = (bytes[6], bytes[7]);
        let (header_len, prefix_len) = match major {
            1 => (LittleEndian::read_u16(&bytes[8..10]) as usize, 10),
            2 | 3 => {
                if bytes.len() < 12 {
                    return Err(CsFileError::Truncated(12, bytes.len()));
                }
                (LittleEndian::read_u32(&bytes[8..12]) as usize, 12)
            }
            _ => return Err(CsFileError::UnsupportedVersion(major, minor)),
        };
        let data_offset = prefix_len + header_len;
        if bytes.len() < data_offset {
            return Err(CsFileError::Truncated(data_offset, bytes.len()));
        }
        let header_text = String::from_utf8_lossy(&bytes[prefix_len..data_offset]).into_owned();
        let header = NpyHeader::parse(&header_text)?;
        if header.fortran_order {
            return Err(CsFileError::FortranOrder);
        }
        let n_rows = match header.shape.as_slice() {
            [n] => *n,
            _ => return Err(CsFileError::NotStructured),
        };

        let entries = match &header.descr {
            PyLiteral::List(entries) => entries,
            _ => return Err(CsFileError::NotStructured),
        };
        let mut fields = Vec::with_capacity(entries.len());
        let mut row_size = 0;
        for entry in entries.iter() {
            let field = CsField::from_descr(entry, row_size)?;
            row_size = row_size
                .checked_add(field.byte_size())
                .ok_or_else(|| CsFileError::BadHeader(String::from("record size overflows")))?;
            fields.push(field);
        }

        let expected = n_rows
            .checked_mul(row_size)
            .ok_or_else(|| CsFileError::BadHeader(String::from("dataset size overflows")))?;
        let available = bytes.len() - data_offset;
        if available < expected {
            return Err(CsFileError::Truncated(expected, available));
        }
        bytes.drain(..data_offset);
        bytes.truncate(expected);

        Ok(Self {
            path: path.to_path_buf(),
            fields,
            n_rows,
            row_size,
            data: bytes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fields(&self) -> &[CsField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.n_rows
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    pub fn row_size(&self) -> usize {
        self.row_size
    }

    /// The raw bytes of one field in one row
    pub fn raw(&self, field: usize, row: usize) -> &[u8] {
        let field = &self.fields[field];
        let start = row * self.row_size + field.offset;
        &self.data[start..start + field.byte_size()]
    }

    /// Decode one component of a numeric field as f64.
    ///
    /// Returns None if the field is not numeric or the component does not exist.
    pub fn numeric(&self, field: usize, row: usize, component: usize) -> Option<f64> {
        let desc = &self.fields[field];
        if !desc.is_numeric() || component >= desc.n_components() {
            return None;
        }
        let raw = self.raw(field, row);
        let bytes = &raw[component * desc.item_size..(component + 1) * desc.item_size];
        match desc.endian {
            Endian::Little => decode_number::<LittleEndian>(desc.kind, bytes),
            Endian::Big => decode_number::<BigEndian>(desc.kind, bytes),
        }
    }

    /// Decode an unsigned integer field exactly (used for uids, which do not fit in an f64)
    pub fn unsigned(&self, field: usize, row: usize) -> Option<u64> {
        let desc = &self.fields[field];
        if desc.kind != FieldKind::UInt || desc.n_components() != 1 {
            return None;
        }
        let bytes = self.raw(field, row);
        let value = match (desc.endian, desc.item_size) {
            (_, 1) => bytes[0] as u64,
            (Endian::Little, 2) => LittleEndian::read_u16(bytes) as u64,
            (Endian::Little, 4) => LittleEndian::read_u32(bytes) as u64,
            (Endian::Little, _) => LittleEndian::read_u64(bytes),
            (Endian::Big, 2) => BigEndian::read_u16(bytes) as u64,
            (Endian::Big, 4) => BigEndian::read_u32(bytes) as u64,
            (Endian::Big, _) => BigEndian::read_u64(bytes),
        };
        Some(value)
    }
}
