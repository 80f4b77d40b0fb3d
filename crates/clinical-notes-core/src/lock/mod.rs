//! Note locking: the weekly sweep, manual locks and the unlock workflow.

mod scheduler;
mod unlock;

pub use scheduler::*;
pub use unlock::*;
