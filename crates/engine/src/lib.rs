mod coordinator;
mod error;
mod pending;
mod settings;

pub use coordinator::ThreadSync;
pub use error::{SyncError, SyncResult};
pub use pending::PendingBuffer;
pub use settings::SyncSettings;
