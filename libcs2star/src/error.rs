use std::path::PathBuf;
use thiserror::Error;

use super::worker_status::WorkerStatus;

#[derive(Debug, Error)]
pub enum StarError {
    #[error("STAR file failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Could not open STAR file because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Could not find a table titled {0:?} followed by a loop_ in the STAR file")]
    MissingTable(Vec<String>),
    #[error("Could not find any of the columns {0:?} in the header of table {1}")]
    MissingColumn(Vec<String>, String),
    #[error("Header line {0} carries a column number that could not be parsed")]
    BadColumnNumber(usize),
    #[error("Record on line {line} has no value for column {column} (index {index})")]
    MalformedRecord {
        line: usize,
        column: String,
        index: usize,
    },
}

#[derive(Debug, Error)]
pub enum CsFileError {
    #[error("CsFile failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Could not open CsFile because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("CsFile does not start with the NPY magic string")]
    BadMagic,
    #[error("CsFile has unsupported NPY format version {0}.{1}")]
    UnsupportedVersion(u8, u8),
    #[error("CsFile header could not be parsed: {0}")]
    BadHeader(String),
    #[error("CsFile field {0} has unsupported dtype {1}")]
    UnsupportedDtype(String, String),
    #[error("CsFile is not a one dimensional structured array")]
    NotStructured,
    #[error("CsFile is stored in Fortran order, which is not supported")]
    FortranOrder,
    #[error("CsFile payload is truncated -- expected {0} bytes, found {1}")]
    Truncated(usize, usize),
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("SchemaAdapter failed due to CsFile error: {0}")]
    CsFileError(#[from] CsFileError),
    #[error("None of the fields {0:?} exist in the CS dataset")]
    MissingField(Vec<String>),
    #[error("Field {0} is not numeric")]
    NotNumeric(String),
    #[error("Field {0} is not a byte string")]
    NotText(String),
    #[error("Field {0} has no component {1}")]
    ComponentOutOfRange(String, usize),
    #[error("Passthrough datasets require a uid field, but {0:?} has none")]
    MissingUid(PathBuf),
    #[error("Particle uid {0} has no matching row in passthrough dataset {1}")]
    MissingPassthroughRow(u64, usize),
    #[error("The CS dataset contains no particles")]
    EmptyDataset,
}

#[derive(Debug, Error)]
pub enum MrcError {
    #[error("MrcStack failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Source stack {0:?} does not exist")]
    SourceNotFound(PathBuf),
    #[error("Unsupported MRC mode {0}")]
    UnsupportedMode(i32),
    #[error("MRC header is invalid: {0}")]
    BadHeader(String),
    #[error("Frame index {0} is out of range for a stack of {1} frames")]
    FrameOutOfRange(usize, usize),
    #[error("Frame shape {0}x{1} does not match the output box size {2}")]
    ShapeMismatch(usize, usize, usize),
    #[error("Source mode {0} does not match output stack mode {1}")]
    ModeMismatch(i32, i32),
    #[error("MRC data is truncated -- expected {0} bytes, found {1}")]
    Truncated(u64, u64),
}

#[derive(Debug, Error)]
pub enum StackWriterError {
    #[error("StackWriter failed due to MRC error: {0}")]
    MrcError(#[from] MrcError),
    #[error("StackWriter failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("No source stack of group {0} could be opened")]
    NoReadableSource(String),
    #[error("StackWriter was cancelled while writing group {0}")]
    Cancelled(String),
}

#[derive(Debug, Error)]
pub enum StarWriterError {
    #[error("StarWriter failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config requested {0} workers; at least one is required")]
    BadThreadCount(i32),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to Schema error: {0}")]
    SchemaError(#[from] SchemaError),
    #[error("Processor failed due to StarWriter error: {0}")]
    StarWriterError(#[from] StarWriterError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Processor failed because worker {0} panicked")]
    WorkerPanic(usize),
    #[error("Processor failed because the error log writer panicked")]
    ErrorLogPanic,
    #[error("Processor was cancelled")]
    Cancelled,
}
