use fxhash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;

use super::error::{MrcError, StackWriterError};
use super::error_log::ErrorRecord;
use super::mrc::{MrcHeader, MrcMode, MrcStack, MrcStackWriter};
use super::particle::{MicrographGroup, ParticleRecord};

/// How a group ended up once its stack was written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupOutcome {
    Complete,
    /// Some particles could not be copied; their frames are left zero filled
    Partial { failed: usize },
}

impl GroupOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

/// The currently open source stack plus the sources which failed to open
#[derive(Debug, Default)]
struct SourceCache {
    current: Option<MrcStack>,
    failed: FxHashMap<PathBuf, String>,
}

impl SourceCache {
    /// The open stack for `path`, reopening only when the path changes
    fn get(&mut self, path: &Path) -> Result<&mut MrcStack, String> {
        if let Some(message) = self.failed.get(path) {
            return Err(message.clone());
        }
        let reuse = self
            .current
            .as_ref()
            .is_some_and(|stack| stack.path() == path);
        if !reuse {
            self.current = None;
            match MrcStack::open(path) {
                Ok(stack) => self.current = Some(stack),
                Err(e) => {
                    let message = e.to_string();
                    self.failed.insert(path.to_path_buf(), message.clone());
                    return Err(message);
                }
            }
        }
        self.current
            .as_mut()
            .ok_or_else(|| String::from("source stack is not open"))
    }
}

/// StackWriter copies the frames of one group's particles into a new MRCS stack.
///
/// Frame i of the output is the image of the i-th particle of the group. Per-particle
/// failures are sent to the error log and leave the frame zero filled.
#[derive(Debug)]
pub struct StackWriter {
    box_size: usize,
    pixel_size: f32,
    worker_id: usize,
    errors: Sender<ErrorRecord>,
}

impl StackWriter {
    pub fn new(
        box_size: usize,
        pixel_size: f32,
        worker_id: usize,
        errors: Sender<ErrorRecord>,
    ) -> Self {
        Self {
            box_size,
            pixel_size,
            worker_id,
            errors,
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Send a record to the error log
    pub fn report(&self, record: ErrorRecord) {
        if self.errors.send(record).is_err() {
            spdlog::error!("Error log is closed; a particle error was not recorded");
        }
    }

    /// Open the first readable source of the group to learn the output mode
    fn find_output_mode(
        &self,
        group: &MicrographGroup,
        sources: &mut SourceCache,
    ) -> Result<MrcMode, StackWriterError> {
        for particle in group.particles() {
            match MrcStack::open(&particle.source_path) {
                Ok(stack) => {
                    let mode = stack.header().mode;
                    sources.current = Some(stack);
                    return Ok(mode);
                }
                Err(MrcError::UnsupportedMode(code)) => {
                    return Err(StackWriterError::MrcError(MrcError::UnsupportedMode(code)))
                }
                Err(e) => {
                    sources
                        .failed
                        .insert(particle.source_path.clone(), e.to_string());
                }
            }
        }
        Err(StackWriterError::NoReadableSource(group.name().to_string()))
    }

    fn copy_particle(
        &self,
        particle: &ParticleRecord,
        slot: usize,
        sources: &mut SourceCache,
        output: &mut MrcStackWriter,
    ) -> Result<(), String> {
        let source = sources.get(&particle.source_path)?;
        let header = source.header();
        if header.mode != output.header().mode {
            return Err(MrcError::ModeMismatch(header.mode.code(), output.header().mode.code())
                .to_string());
        }
        if header.nx != self.box_size || header.ny != self.box_size {
            return Err(MrcError::ShapeMismatch(header.nx, header.ny, self.box_size).to_string());
        }
        let bytes = source
            .read_frame_bytes(particle.source_frame)
            .map_err(|e| e.to_string())?;
        output
            .write_frame_bytes(slot, &bytes)
            .map_err(|e| e.to_string())
    }

    /// Write the stack of one group to `path`.
    ///
    /// When `cancel` is given it is checked before every particle; a cancelled stack is
    /// deleted.
    pub fn write_group(
        &self,
        group: &MicrographGroup,
        path: &Path,
        cancel: Option<&AtomicBool>,
    ) -> Result<GroupOutcome, StackWriterError> {
        let mut sources = SourceCache::default();
        let mode = self.find_output_mode(group, &mut sources)?;
        let header = MrcHeader::new_stack(group.len(), self.box_size, mode, self.pixel_size);
        let mut output = MrcStackWriter::create(path, header)?;

        let mut failed = 0;
        for (slot, particle) in group.particles().iter().enumerate() {
            if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                drop(output);
                std::fs::remove_file(path)?;
                return Err(StackWriterError::Cancelled(group.name().to_string()));
            }
            if let Err(message) = self.copy_particle(particle, slot, &mut sources, &mut output) {
                failed += 1;
                self.report(ErrorRecord::particle(
                    self.worker_id,
                    group.name(),
                    slot,
                    format!(
                        "{} frame {}: {message}",
                        particle.source_path.display(),
                        particle.source_frame
                    ),
                ));
            }
        }

        let header = output.close()?;
        spdlog::info!(
            "Wrote {} ({} frames, {})",
            path.display(),
            header.nz,
            human_bytes::human_bytes((header.data_offset() + header.data_bytes()) as f64)
        );
        if failed == 0 {
            Ok(GroupOutcome::Complete)
        } else {
            Ok(GroupOutcome::Partial { failed })
        }
    }
}
