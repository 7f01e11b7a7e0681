//! Session/command dispatcher
//!
//! Owns the session table and the shared collaborators (crypto engine,
//! storage backend, secure memory mapper, modem control) and routes each
//! `(session, command, params)` triple to its service handler. Sessions are
//! independent: each sits behind its own async mutex, so commands on one
//! session never wait on another.

use crate::config::{BusyPolicy, TeeConfig};
use crate::control::{ModemControl, ModemState, PowerOutcome, PowerRequest};
use crate::crypto::{CryptoEngine, SoftwareEngine};
use crate::error::{TeeError, TeeResult};
use crate::identity::{Identity, LoginMethod, TeeUuid};
use crate::object::{Attribute, ObjectHandle, ObjectInfo, ObjectType};
use crate::param::Params;
use crate::secmem::{PhysAddr, SecureMemory, SecureMemoryMapper, SimulatedSecureMemory, VirtAddr};
use crate::service::{self, Command, MemoryStorage, OpenFiles, ServiceId, StorageBackend};
use crate::session::{Context, Session, SessionId};
use futures::future::join_all;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

struct SessionSlot {
    service: ServiceId,
    session: Arc<Mutex<Session>>,
}

pub struct Dispatcher {
    pub config: TeeConfig,
    engine: Arc<dyn CryptoEngine>,
    storage: Arc<dyn StorageBackend>,
    open_files: OpenFiles,
    mapper: SecureMemoryMapper,
    notify: std::sync::Mutex<HashMap<PhysAddr, VirtAddr>>,
    modem: ModemControl,
    sessions: RwLock<HashMap<SessionId, SessionSlot>>,
    next_id: AtomicU32,
}

impl Dispatcher {
    pub fn new(
        config: TeeConfig,
        engine: Arc<dyn CryptoEngine>,
        storage: Arc<dyn StorageBackend>,
        secure_memory: Arc<dyn SecureMemory>,
    ) -> Self {
        let mapper = SecureMemoryMapper::new(
            secure_memory,
            config.secure_window_base,
            config.secure_window_size,
        );
        Self {
            config,
            engine,
            storage,
            open_files: OpenFiles::new(),
            mapper,
            notify: std::sync::Mutex::new(HashMap::new()),
            modem: ModemControl::new(),
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(1),
        }
    }

    /// Software engine, in-memory storage and an empty simulated secure
    /// memory (no region resolves until one is added by the caller)
    pub fn with_config(config: TeeConfig) -> Self {
        let storage = Arc::new(MemoryStorage::new(config.storage_capacity));
        Self::new(
            config,
            Arc::new(SoftwareEngine::new()),
            storage,
            Arc::new(SimulatedSecureMemory::new()),
        )
    }

    pub fn mapper(&self) -> &SecureMemoryMapper {
        &self.mapper
    }

    /// Open a session against the service named by `uuid`
    pub async fn open_session(&self, uuid: &TeeUuid, identity: Identity) -> TeeResult<SessionId> {
        let service = ServiceId::from_uuid(uuid).map_err(|e| {
            debug!("open_session: no service {}", uuid);
            e
        })?;
        if service == ServiceId::Storage
            && self.config.storage_requires_identify
            && identity.login != LoginMethod::Identify
        {
            warn!(
                "storage session refused for login {:?} of {}",
                identity.login, identity.uuid
            );
            return Err(TeeError::AccessDenied);
        }

        let mut sessions = self.sessions.write().await;
        let limit = self.config.session_limits.for_service(service);
        let open = sessions.values().filter(|s| s.service == service).count();
        if open >= limit {
            warn!("{} service at its session cap ({})", service, limit);
            return Err(TeeError::SessionMaximum);
        }

        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let session = Session::new(
            id,
            service,
            identity,
            self.config.max_objects_per_session,
            self.config.max_object_name_len,
        );
        sessions.insert(
            id,
            SessionSlot {
                service,
                session: Arc::new(Mutex::new(session)),
            },
        );
        info!(
            "opened {} session {} for {} ({:?})",
            service, id, identity.uuid, identity.login
        );
        Ok(id)
    }

    /// Take the session's lock according to the busy policy
    async fn acquire(&self, id: SessionId) -> TeeResult<OwnedMutexGuard<Session>> {
        let session = {
            let sessions = self.sessions.read().await;
            let slot = sessions.get(&id).ok_or(TeeError::SessionNotExist)?;
            Arc::clone(&slot.session)
        };
        match self.config.busy_policy {
            BusyPolicy::Block => Ok(session.lock_owned().await),
            BusyPolicy::FailFast => session.try_lock_owned().map_err(|_| {
                debug!("session {} busy", id);
                TeeError::Busy
            }),
        }
    }

    /// Run one command. On failure, outputs are only meaningful for the
    /// short-buffer case, where the output slot carries the required size.
    pub async fn invoke(
        &self,
        id: SessionId,
        cmd_id: u32,
        param_types: u32,
        params: &mut Params,
    ) -> TeeResult<()> {
        let mut session = self.acquire(id).await?;
        if session.is_poisoned() {
            return Err(TeeError::TargetDead);
        }

        let command = session.service.command(cmd_id)?;
        if let Some(shape) = command.shape() {
            params.check_shape(param_types, &shape)?;
        }

        let mut ctx = Context {
            session: &mut *session,
            engine: self.engine.as_ref(),
            storage: self.storage.as_ref(),
            open_files: &self.open_files,
            mapper: &self.mapper,
            notify: &self.notify,
        };
        let result = match command {
            Command::Global(cmd) => service::global::handle(&mut ctx, cmd, params),
            Command::Echo(cmd) => service::echo::handle(cmd, params),
            Command::Storage(cmd) => service::storage::handle(&mut ctx, cmd, params),
            Command::Crypt(cmd) => service::crypt::handle(&mut ctx, cmd, params),
        };

        match &result {
            Ok(()) => debug!("session {}: {:?} ok", id, command),
            Err(e) if e.is_fatal() => session.poison(e.clone()),
            Err(e) => debug!("session {}: {:?} failed: {}", id, command, e),
        }
        result
    }

    /// Close a session and every object it still holds
    pub async fn close_session(&self, id: SessionId) -> TeeResult<()> {
        let slot = self
            .sessions
            .write()
            .await
            .remove(&id)
            .ok_or(TeeError::SessionNotExist)?;
        let mut session = slot.session.lock().await;
        let closed = session.teardown(&self.open_files);
        info!(
            "closed {} session {} ({} objects released)",
            slot.service, id, closed
        );
        Ok(())
    }

    pub async fn session_count(&self, service: ServiceId) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.service == service)
            .count()
    }

    pub async fn create_object(
        &self,
        id: SessionId,
        name: &[u8],
        object_type: ObjectType,
        max_size: u32,
        usage: u32,
    ) -> TeeResult<ObjectHandle> {
        let mut session = self.acquire(id).await?;
        session.registry.create(name, object_type, max_size, usage)
    }

    pub async fn populate_object(
        &self,
        id: SessionId,
        handle: ObjectHandle,
        attributes: &[Attribute],
    ) -> TeeResult<()> {
        let mut session = self.acquire(id).await?;
        session.registry.populate(handle, attributes)
    }

    pub async fn reset_object(&self, id: SessionId, handle: ObjectHandle) -> TeeResult<()> {
        let mut session = self.acquire(id).await?;
        session.registry.reset(handle)
    }

    pub async fn object_info(&self, id: SessionId, handle: ObjectHandle) -> TeeResult<ObjectInfo> {
        let session = self.acquire(id).await?;
        session.registry.get_info(handle)
    }

    pub async fn close_object(&self, id: SessionId, handle: ObjectHandle) -> TeeResult<()> {
        let mut session = self.acquire(id).await?;
        session.close_object(handle, &self.open_files).map(|_| ())
    }

    /// Control-plane entry used by the modem driver
    pub fn modem_state_set(&self, raw: u32) -> TeeResult<ModemState> {
        self.modem.set_state(raw)
    }

    pub fn modem_state(&self) -> ModemState {
        self.modem.state()
    }

    pub fn modem_power(&self, request: PowerRequest) -> PowerOutcome {
        self.modem.request_power(request)
    }

    /// Close every session and release the notification buffers
    pub async fn shutdown(&self) {
        let slots: Vec<_> = self.sessions.write().await.drain().collect();
        let count = slots.len();
        let open_files = &self.open_files;
        join_all(slots.into_iter().map(|(_, slot)| async move {
            let mut session = slot.session.lock().await;
            session.teardown(open_files)
        }))
        .await;

        let held: Vec<_> = match self.notify.lock() {
            Ok(mut notify) => notify.drain().collect(),
            Err(_) => Vec::new(),
        };
        for (phys, virt) in held {
            if let Err(e) = self.mapper.unmap(virt) {
                warn!("notify memory {:#x} not released: {}", phys, e);
            }
        }
        info!("dispatcher shut down ({} sessions closed)", count);
    }
}
