// STAR layout
/// First line of every STAR file written for the downstream suite
pub const STAR_VERSION_MARKER: &str = "# version 30001";
pub const OPTICS_TABLE: &str = "data_optics";
pub const PARTICLES_TABLE: &str = "data_particles";
/// Pre-optics STAR files keep their particles in an unnamed data block
pub const LEGACY_PARTICLES_TABLE: &str = "data_";
pub const LOOP_TOKEN: &str = "loop_";
pub const COLUMN_PREFIX: char = '_';
pub const COLUMN_NUMBER_PREFIX: char = '#';

// CS layout
/// Leading marker on CS path fields meaning "relative to the project directory"
pub const PROJECT_RELATIVE_MARKER: char = '>';
/// Separator between the per-job unique id and the micrograph name in extracted stack names
pub const UID_PREFIX_SEPARATOR: char = '_';
/// Alignment field prefixes, most refined first
pub const ALIGNMENT_PREFIXES: [&str; 2] = ["alignments3D", "alignments2D"];
pub const UID_FIELD: &str = "uid";

// MRC layout
pub const MRC_HEADER_SIZE: usize = 1024;
pub const MRC_LABEL_SIZE: usize = 80;
pub const MRC_MAX_LABELS: usize = 10;
/// Space group 0 marks an image stack rather than a volume
pub const IMAGE_STACK_SPACE_GROUP: i32 = 0;
pub const OUTPUT_STACK_EXTENSION: &str = "mrcs";

// Dry-run bucket edges (groups with exactly one, fewer than five, fewer than ten particles)
pub const SMALL_GROUP_LIMIT: usize = 5;
pub const MEDIUM_GROUP_LIMIT: usize = 10;
