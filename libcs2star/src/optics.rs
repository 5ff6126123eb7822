use std::fmt::Display;

use super::error::SchemaError;
use super::particle::FrozenGroups;
use super::particle_aggregator::{
    BLOB_PIXEL_SIZE, BLOB_SHAPE, CTF_AMPLITUDE_CONTRAST, CTF_SPHERICAL_ABERRATION, CTF_VOLTAGE,
};
use super::schema_adapter::SchemaAdapter;

pub const OPTICS_GROUP_NAME: &str = "optics_1";
pub const OPTICS_GROUP_ID: i64 = 1;
pub const IMAGE_DIMENSIONALITY: i64 = 2;

pub const IMAGE_SIZE_COLUMN: &str = "_rlnImageSize";
pub const PIXEL_SIZE_COLUMN: &str = "_rlnImagePixelSize";

/// Where the value of an optics column comes from
#[derive(Debug, Clone, Copy, PartialEq)]
enum OpticsSource {
    /// A component of a numeric CS field
    Field(&'static str, usize),
    /// A component of a numeric CS field, written as an integer
    IntegerField(&'static str, usize),
    Text(&'static str),
    Integer(i64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct OpticsEntry {
    column: &'static str,
    source: OpticsSource,
}

const fn entry(column: &'static str, source: OpticsSource) -> OpticsEntry {
    OpticsEntry { column, source }
}

/// Output columns of the optics table, in order
const OPTICS_MAP: [OpticsEntry; 8] = [
    entry("_rlnOpticsGroupName", OpticsSource::Text(OPTICS_GROUP_NAME)),
    entry("_rlnOpticsGroup", OpticsSource::Integer(OPTICS_GROUP_ID)),
    entry("_rlnVoltage", OpticsSource::Field(CTF_VOLTAGE, 0)),
    entry(
        "_rlnSphericalAberration",
        OpticsSource::Field(CTF_SPHERICAL_ABERRATION, 0),
    ),
    entry(
        "_rlnAmplitudeContrast",
        OpticsSource::Field(CTF_AMPLITUDE_CONTRAST, 0),
    ),
    entry(PIXEL_SIZE_COLUMN, OpticsSource::Field(BLOB_PIXEL_SIZE, 0)),
    entry(IMAGE_SIZE_COLUMN, OpticsSource::IntegerField(BLOB_SHAPE, 0)),
    entry(
        "_rlnImageDimensionality",
        OpticsSource::Integer(IMAGE_DIMENSIONALITY),
    ),
];

/// A single cell of a STAR table
#[derive(Debug, Clone, PartialEq)]
pub enum StarValue {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl Display for StarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value:.6}"),
        }
    }
}

/// The single row of the optics table
#[derive(Debug, Clone, PartialEq)]
pub struct OpticsRecord {
    entries: Vec<(&'static str, StarValue)>,
}

impl OpticsRecord {
    /// Fill every optics column from one dataset row
    pub fn from_row(adapter: &SchemaAdapter, row: usize) -> Result<Self, SchemaError> {
        let entries = OPTICS_MAP
            .iter()
            .map(|entry| -> Result<(&'static str, StarValue), SchemaError> {
                let value = match entry.source {
                    OpticsSource::Field(name, component) => {
                        StarValue::Float(adapter.component(name, row, component)?)
                    }
                    OpticsSource::IntegerField(name, component) => {
                        StarValue::Integer(adapter.component(name, row, component)? as i64)
                    }
                    OpticsSource::Text(value) => StarValue::Text(value.to_string()),
                    OpticsSource::Integer(value) => StarValue::Integer(value),
                };
                Ok((entry.column, value))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    /// Build the optics record from the first particle of the first group
    pub fn from_groups(
        adapter: &SchemaAdapter,
        groups: &FrozenGroups,
    ) -> Result<Self, SchemaError> {
        let first = groups.first_particle().ok_or(SchemaError::EmptyDataset)?;
        Self::from_row(adapter, first.row)
    }

    pub fn columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(column, _)| *column)
    }

    pub fn values(&self) -> impl Iterator<Item = &StarValue> + '_ {
        self.entries.iter().map(|(_, value)| value)
    }

    pub fn get(&self, column: &str) -> Option<&StarValue> {
        self.entries
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, value)| value)
    }

    /// Edge length of a particle image in pixels
    pub fn box_size(&self) -> usize {
        match self.get(IMAGE_SIZE_COLUMN) {
            Some(StarValue::Integer(size)) => (*size).max(0) as usize,
            _ => 0,
        }
    }

    /// Pixel size of the particle images in Å
    pub fn pixel_size(&self) -> f64 {
        match self.get(PIXEL_SIZE_COLUMN) {
            Some(StarValue::Float(size)) => *size,
            _ => 0.0,
        }
    }

    pub fn group_id(&self) -> i64 {
        OPTICS_GROUP_ID
    }
}
