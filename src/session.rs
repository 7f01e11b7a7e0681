//! Per-session state
//!
//! A [`Session`] owns its object registry, its crypto operations and its
//! open storage files. Nothing in here is shared with other sessions.

use crate::crypto::{CryptoEngine, CryptoOperation};
use crate::error::{TeeError, TeeResult};
use crate::identity::Identity;
use crate::object::{ObjectEntry, ObjectHandle, ObjectRegistry};
use crate::secmem::{PhysAddr, SecureMemoryMapper, VirtAddr};
use crate::service::{CryptCommand, OpenFiles, ServiceId, StorageBackend};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Opaque session identifier handed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u32);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub service: ServiceId,
    pub identity: Identity,
    pub opened_at: DateTime<Utc>,
    pub registry: ObjectRegistry,
    /// One operation per crypto command
    pub operations: HashMap<CryptCommand, CryptoOperation>,
    /// Handles that name open storage files
    pub files: HashSet<ObjectHandle>,
    /// Set once a handler fails fatally
    poisoned: Option<TeeError>,
}

impl Session {
    pub fn new(
        id: SessionId,
        service: ServiceId,
        identity: Identity,
        max_objects: usize,
        max_name_len: usize,
    ) -> Self {
        Self {
            id,
            service,
            identity,
            opened_at: Utc::now(),
            registry: ObjectRegistry::new(id.0, max_objects).with_name_limit(max_name_len),
            operations: HashMap::new(),
            files: HashSet::new(),
            poisoned: None,
        }
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    pub fn poison(&mut self, cause: TeeError) {
        log::warn!("session {} poisoned by fatal error: {}", self.id, cause);
        self.poisoned = Some(cause);
    }

    /// Close one object, detaching it from any operation still holding it
    /// and dropping its storage open count if it was a file
    pub fn close_object(
        &mut self,
        handle: ObjectHandle,
        open_files: &OpenFiles,
    ) -> TeeResult<ObjectEntry> {
        let entry = self.registry.close(handle)?;
        if self.files.remove(&handle) {
            open_files.release(&self.identity.uuid, &entry.name);
        }
        for op in self.operations.values_mut() {
            op.forget_key(handle);
        }
        Ok(entry)
    }

    /// Release everything the session owns. Returns the number of objects closed.
    pub fn teardown(&mut self, open_files: &OpenFiles) -> usize {
        self.operations.clear();
        for handle in self.files.drain() {
            if let Ok(entry) = self.registry.get(handle) {
                open_files.release(&self.identity.uuid, &entry.name);
            }
        }
        self.registry.close_all()
    }
}

/// Shared services a handler may use while it holds its session
pub(crate) struct Context<'a> {
    pub session: &'a mut Session,
    pub engine: &'a dyn CryptoEngine,
    pub storage: &'a dyn StorageBackend,
    pub open_files: &'a OpenFiles,
    pub mapper: &'a SecureMemoryMapper,
    /// Notification buffers registered through the global service
    pub notify: &'a Mutex<HashMap<PhysAddr, VirtAddr>>,
}
