pub mod policy;
pub mod scheduler;

pub use policy::{RetentionManager, StorageStats};
pub use scheduler::RetentionScheduler;
