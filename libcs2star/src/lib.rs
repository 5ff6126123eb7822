//! # cs2star
//!
//! cs2star exports particle picks from a cryo-EM processing project, stored as `.cs`
//! datasets (NumPy structured arrays), into the STAR + MRCS layout read by RELION style
//! refinement suites. Particles are grouped by the micrograph they were extracted from;
//! every group is written to its own `.mrcs` image stack and a single STAR file lists
//! the optics and every particle.
//!
//! ## Installation
//!
//! The only method of install is from source. If you have not used Rust before, see the
//! [Rust docs](https://www.rust-lang.org/tools/install) for installing the tool chain.
//!
//! To build and install the CLI use `cargo install --path ./cs2star_cli` from the top
//! level repository.
//!
//! ## Configuration
//!
//! Exports are described by a YAML file. A template can be generated with
//! `cs2star_cli new -p config.yml`.
//!
//! ```yml
//! cs_path: /data/P3/J42/J42_passthrough_particles.cs
//! passthrough_paths: []
//! project_path: /data/P3
//! output_path: /data/relion/export
//! star_name: particles.star
//! stack_directory: stacks
//! error_log_name: export_errors.log
//! n_threads: 1
//! dry_run: false
//! ```
//!
//! - `cs_path`: the particle dataset
//! - `passthrough_paths`: extra datasets holding more fields of the same particles,
//!   joined on the particle `uid`
//! - `project_path`: directory that the `blob/path` fields are relative to
//! - `output_path`: directory receiving the STAR file, the stack directory and the
//!   error log
//! - `n_threads`: number of worker threads writing stacks. With one worker, stacks are
//!   written in a single pass.
//! - `dry_run`: only aggregate the particles and report group sizes; nothing is written
//!
//! ## Output
//!
//! ```text
//! output_path
//! |---- particles.star
//! |---- export_errors.log (only when particles failed)
//! |---- stacks
//! |    |---- <micrograph>.mrcs
//! ```
//!
//! Stack names drop the job prefix of the source stack (`<uid>_<micrograph>.mrc`). The
//! particles of a stack are referenced from the STAR file as `<frame>@stacks/<name>`,
//! with frames counted from zero.
//!
//! A particle whose image can not be copied keeps a zero filled frame and an entry in
//! the error log; the rest of its stack is unaffected. A stack whose sources can not be
//! read at all is skipped and left out of the STAR file.
pub mod config;
pub mod constants;
pub mod cs_file;
pub mod error;
pub mod error_log;
pub mod inspect;
pub mod mrc;
pub mod npy_header;
pub mod optics;
pub mod particle;
pub mod particle_aggregator;
pub mod process;
pub mod schema_adapter;
pub mod stack_writer;
pub mod star_file;
pub mod star_writer;
pub mod worker_status;

#[cfg(test)]
mod testing;
