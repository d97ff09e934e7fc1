//! Cross-runtime call machinery: marshalling, callback trampolines, and
//! concurrency gating.

mod concurrency;
mod marshal;
mod trampoline;

pub use concurrency::{DelayedDestroyQueue, LoopThread, ReentrancyGuard};
pub use marshal::Marshal;
pub use trampoline::Trampoline;
