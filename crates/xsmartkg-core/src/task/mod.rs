//! Task model: statuses, partial updates and the merge rule.

mod state;
mod status;
mod update;

pub use state::{Applied, FileProgress, TaskState};
pub use status::{FileStatus, TaskStatus};
pub use update::{parse_frame, FileUpdate, Frame, FrameError, ProgressScale, ProgressUpdate};
