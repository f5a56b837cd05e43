//! Provider-side bookkeeping of open connections.

use crate::error::TransportError;
use crate::sync::{read, write};
use inquest_types::Asset;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

/// Capabilities every provider connection exposes, whatever it connects to.
pub trait ProviderConnection: Send + Sync {
    fn id(&self) -> u32;
    fn name(&self) -> &str;
    fn asset(&self) -> &Asset;
}

/// Open connections of one provider, keyed by connection id.
#[derive(Debug)]
pub struct ConnectionTable<C> {
    next_id: AtomicU32,
    connections: RwLock<HashMap<u32, Arc<C>>>,
}

impl<C> Default for ConnectionTable<C> {
    fn default() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            connections: RwLock::new(HashMap::new()),
        }
    }
}

impl<C: ProviderConnection> ConnectionTable<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the id for the next connection. Ids start at 1.
    pub fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn insert(&self, connection: C) -> Arc<C> {
        let connection = Arc::new(connection);
        write(&self.connections).insert(connection.id(), connection.clone());
        connection
    }

    pub fn get(&self, id: u32) -> Result<Arc<C>, TransportError> {
        read(&self.connections)
            .get(&id)
            .cloned()
            .ok_or_else(|| TransportError::remote(format!("connection {id} not found")))
    }

    pub fn remove(&self, id: u32) -> Option<Arc<C>> {
        write(&self.connections).remove(&id)
    }

    pub fn len(&self) -> usize {
        read(&self.connections).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
