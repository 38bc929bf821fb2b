mod drivers;
mod traits;

pub use drivers::memory::{Knobs, MemoryBackend, Op};
pub use drivers::rest::{RestBackend, RestConfig};
pub use traits::{Ack, CommentBackend, CreateReply, NewComment, UpdateReply};

use domain::Viewer;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub enum BackendConfig {
    Memory,
    Rest(RestConfig),
}

pub fn connect(config: BackendConfig, viewer: &Viewer) -> anyhow::Result<Arc<dyn CommentBackend>> {
    let backend: Arc<dyn CommentBackend> = match config {
        BackendConfig::Memory => {
            info!("Initializing backend in MEMORY mode...");
            Arc::new(MemoryBackend::new(viewer.clone()))
        }
        BackendConfig::Rest(rest) => {
            info!("Initializing backend in REST mode against {}...", rest.base_url);
            Arc::new(RestBackend::new(&rest)?)
        }
    };
    Ok(backend)
}
