//! Side-effecting actions.
//!
//! Only [`copy`] lives here: it is the one stage allowed to touch the
//! filesystem outside the cache, and it only ever writes under the target.

pub mod copy;

pub use copy::{
    copy_file, execute_plan, BatchCopyResult, CopyConfig, CopyError, CopyOutcome, CopyStatus,
    FileSnapshot,
};
