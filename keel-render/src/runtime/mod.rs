pub mod cubemap;
pub mod material;
pub mod mesh;
pub mod skybox;
pub mod texture;

pub use cubemap::{CubemapAsset, CubemapSignature};
pub use material::{MaterialAsset, MaterialSignature};
pub use mesh::{MeshAsset, MeshSignature};
pub use skybox::{SkyboxAsset, SkyboxSignature};
pub use texture::{TextureAsset, TextureSignature};

use std::sync::{Arc, Mutex};

type Listener = Arc<dyn Fn() + Send + Sync>;

/// Handle to a connected listener; pass back to [`Signal::disconnect`] to
/// detach it.
#[derive(Debug)]
pub struct Connection(usize);

/// Broadcast notification fired when an asset finishes loading or is
/// edited, so dependents react without polling.
pub struct Signal {
    listeners: Mutex<Vec<Option<Listener>>>,
}

impl Signal {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn connect(&self, listener: impl Fn() + Send + Sync + 'static) -> Connection {
        let mut listeners = self.listeners.lock().unwrap();
        listeners.push(Some(Arc::new(listener)));
        Connection(listeners.len() - 1)
    }

    pub fn disconnect(&self, connection: Connection) {
        self.listeners.lock().unwrap()[connection.0] = None;
    }

    /// Listeners run outside the lock, so they are free to connect to this
    /// or other signals.
    pub fn emit(&self) {
        let snapshot: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .cloned()
            .collect();
        for listener in snapshot {
            listener();
        }
    }
}
