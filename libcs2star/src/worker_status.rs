#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BarColor {
    #[default]
    CYAN,
    MAGENTA,
    RED,
    GREEN,
}

/// Progress of one worker through its shard of groups.
///
/// CYAN while writing stacks and RED once a group of the shard had errors. A finished
/// shard turns GREEN; one stopped by cancellation turns MAGENTA.
#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub progress: f32,
    pub groups_done: usize,
    pub worker_id: usize,
    pub color: BarColor,
}

impl WorkerStatus {
    pub fn new(progress: f32, groups_done: usize, worker_id: usize, color: BarColor) -> Self {
        Self {
            progress,
            groups_done,
            worker_id,
            color,
        }
    }
}
