//! Settings persistence: process-wide memory and durable per-app files.

pub mod file;
pub mod memory;
pub mod traits;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use traits::{Scope, SettingsStore, load, save, settings_keys};
