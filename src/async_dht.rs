//! AsyncDht node.

use std::net::SocketAddr;
use std::thread;

use crate::{
    common::{Id, Node},
    dht::Dht,
    rpc::{FindResult, Info},
};

impl Dht {
    /// Return an async version of the Dht client.
    pub fn as_async(self) -> AsyncDht {
        AsyncDht(self)
    }
}

#[derive(Debug, Clone)]
/// Async version of the Dht node.
///
/// Lookups run on their own thread, the returned futures resolve once they are done.
pub struct AsyncDht(Dht);

#[derive(thiserror::Error, Debug)]
pub enum AsyncDhtError {
    #[error("Dht was shutdown")]
    WasShutdown,

    #[error("Failed to spawn lookup thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Lookup thread exited without a result")]
    Dropped,
}

impl AsyncDht {
    // === Getters ===

    /// This node's [Id]
    pub fn id(&self) -> &Id {
        self.0.id()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.0.local_addr()
    }

    /// Information and statistics about this [Dht] node.
    pub fn info(&self) -> Info {
        self.0.info()
    }

    /// Returns a reference to the blocking [Dht] node.
    pub fn as_sync(&self) -> &Dht {
        &self.0
    }

    // === Public Methods ===

    /// Shutdown the node, see [Dht::shutdown].
    pub async fn shutdown(&self) {
        self.0.shutdown();
    }

    pub async fn ping(&self, address: SocketAddr) -> Result<Option<Node>, AsyncDhtError> {
        self.spawn(move |dht| dht.ping(address)).await
    }

    pub async fn find_node(&self, target: Id) -> Result<Vec<Node>, AsyncDhtError> {
        self.spawn(move |dht| dht.find_node(target)).await
    }

    pub async fn find_value(&self, content_id: Id) -> Result<FindResult, AsyncDhtError> {
        self.spawn(move |dht| dht.find_value(content_id)).await
    }

    pub async fn announce(&self, content_id: Id) -> Result<(), AsyncDhtError> {
        self.spawn(move |dht| dht.announce(content_id)).await
    }

    async fn spawn<T, F>(&self, task: F) -> Result<T, AsyncDhtError>
    where
        T: Send + 'static,
        F: FnOnce(Dht) -> T + Send + 'static,
    {
        if self.0.is_shutdown() {
            return Err(AsyncDhtError::WasShutdown);
        }

        let (sender, receiver) = flume::bounded::<T>(1);
        let dht = self.0.clone();

        thread::Builder::new()
            .name("reflector-async".to_string())
            .spawn(move || {
                let _ = sender.send(task(dht));
            })?;

        receiver
            .recv_async()
            .await
            .map_err(|_| AsyncDhtError::Dropped)
    }
}
