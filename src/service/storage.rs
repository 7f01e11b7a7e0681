//! Trusted storage service and its backend
//!
//! An open file is a `Data` object in the session registry; its bytes live
//! in a [`StorageBackend`]. Files are namespaced by the client UUID of the session that owns them,
//! so two callers can use the same file name without seeing each other's
//! data.

use super::StorageCommand;
use crate::error::{TeeError, TeeResult};
use crate::identity::TeeUuid;
use crate::object::{handle_flags, ObjectHandle, ObjectType, HANDLE_WIRE_LEN};
use crate::param::Params;
use crate::session::Context;
use std::collections::HashMap;
use std::sync::Mutex;

/// Where storage service bytes live
pub trait StorageBackend: Send + Sync {
    fn exists(&self, owner: &TeeUuid, name: &[u8]) -> TeeResult<bool>;

    /// Create an empty file; `AccessConflict` if it exists
    fn create(&self, owner: &TeeUuid, name: &[u8]) -> TeeResult<()>;

    fn read(&self, owner: &TeeUuid, name: &[u8], offset: usize, len: usize) -> TeeResult<Vec<u8>>;

    /// Write at `offset`, growing the file (zero-filled) as needed
    fn write(&self, owner: &TeeUuid, name: &[u8], offset: usize, data: &[u8]) -> TeeResult<()>;

    fn truncate(&self, owner: &TeeUuid, name: &[u8], len: usize) -> TeeResult<()>;

    fn size(&self, owner: &TeeUuid, name: &[u8]) -> TeeResult<usize>;

    fn remove(&self, owner: &TeeUuid, name: &[u8]) -> TeeResult<()>;

    fn sync(&self, owner: &TeeUuid, name: &[u8]) -> TeeResult<()>;
}

/// Volatile storage with a total byte quota
pub struct MemoryStorage {
    capacity: usize,
    files: Mutex<HashMap<(TeeUuid, Vec<u8>), Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            files: Mutex::new(HashMap::new()),
        }
    }

    /// Bytes currently stored across all owners
    pub fn used(&self) -> usize {
        self.files
            .lock()
            .map(|f| f.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    fn with_files<T>(
        &self,
        f: impl FnOnce(&mut HashMap<(TeeUuid, Vec<u8>), Vec<u8>>) -> TeeResult<T>,
    ) -> TeeResult<T> {
        let mut files = self.files.lock().map_err(|_| TeeError::Generic)?;
        f(&mut files)
    }

    fn resize(
        &self,
        files: &mut HashMap<(TeeUuid, Vec<u8>), Vec<u8>>,
        key: &(TeeUuid, Vec<u8>),
        new_len: usize,
    ) -> TeeResult<()> {
        let used: usize = files.values().map(Vec::len).sum();
        let file = files.get_mut(key).ok_or(TeeError::ItemNotFound)?;
        if new_len > file.len() && used - file.len() + new_len > self.capacity {
            log::warn!(
                "storage quota exceeded: {} of {} bytes used, {} requested",
                used,
                self.capacity,
                new_len - file.len()
            );
            return Err(TeeError::StorageNoSpace);
        }
        file.resize(new_len, 0);
        Ok(())
    }
}

fn key(owner: &TeeUuid, name: &[u8]) -> (TeeUuid, Vec<u8>) {
    (*owner, name.to_vec())
}

impl StorageBackend for MemoryStorage {
    fn exists(&self, owner: &TeeUuid, name: &[u8]) -> TeeResult<bool> {
        self.with_files(|files| Ok(files.contains_key(&key(owner, name))))
    }

    fn create(&self, owner: &TeeUuid, name: &[u8]) -> TeeResult<()> {
        self.with_files(|files| {
            let k = key(owner, name);
            if files.contains_key(&k) {
                return Err(TeeError::AccessConflict);
            }
            files.insert(k, Vec::new());
            Ok(())
        })
    }

    fn read(&self, owner: &TeeUuid, name: &[u8], offset: usize, len: usize) -> TeeResult<Vec<u8>> {
        self.with_files(|files| {
            let file = files.get(&key(owner, name)).ok_or(TeeError::ItemNotFound)?;
            let start = offset.min(file.len());
            let end = offset.saturating_add(len).min(file.len());
            Ok(file[start..end].to_vec())
        })
    }

    fn write(&self, owner: &TeeUuid, name: &[u8], offset: usize, data: &[u8]) -> TeeResult<()> {
        let end = offset.checked_add(data.len()).ok_or(TeeError::Overflow)?;
        self.with_files(|files| {
            let k = key(owner, name);
            let current = files.get(&k).map(Vec::len).ok_or(TeeError::ItemNotFound)?;
            if end > current {
                self.resize(files, &k, end)?;
            }
            if let Some(file) = files.get_mut(&k) {
                file[offset..end].copy_from_slice(data);
            }
            Ok(())
        })
    }

    fn truncate(&self, owner: &TeeUuid, name: &[u8], len: usize) -> TeeResult<()> {
        self.with_files(|files| self.resize(files, &key(owner, name), len))
    }

    fn size(&self, owner: &TeeUuid, name: &[u8]) -> TeeResult<usize> {
        self.with_files(|files| {
            files
                .get(&key(owner, name))
                .map(Vec::len)
                .ok_or(TeeError::ItemNotFound)
        })
    }

    fn remove(&self, owner: &TeeUuid, name: &[u8]) -> TeeResult<()> {
        self.with_files(|files| {
            files
                .remove(&key(owner, name))
                .map(|_| ())
                .ok_or(TeeError::ItemNotFound)
        })
    }

    fn sync(&self, owner: &TeeUuid, name: &[u8]) -> TeeResult<()> {
        self.size(owner, name).map(|_| ())
    }
}

/// Open handles per `(owner, name)` across every session. A file stays
/// unremovable while any session still holds it open.
#[derive(Debug, Default)]
pub struct OpenFiles {
    counts: Mutex<HashMap<(TeeUuid, Vec<u8>), usize>>,
}

impl OpenFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, owner: &TeeUuid, name: &[u8]) -> TeeResult<()> {
        let mut counts = self.counts.lock().map_err(|_| TeeError::Generic)?;
        *counts.entry(key(owner, name)).or_insert(0) += 1;
        Ok(())
    }

    pub fn release(&self, owner: &TeeUuid, name: &[u8]) {
        let Ok(mut counts) = self.counts.lock() else {
            return;
        };
        let k = key(owner, name);
        if let Some(count) = counts.get_mut(&k) {
            *count -= 1;
            if *count == 0 {
                counts.remove(&k);
            }
        }
    }

    pub fn is_open(&self, owner: &TeeUuid, name: &[u8]) -> bool {
        self.counts
            .lock()
            .map(|c| c.contains_key(&key(owner, name)))
            .unwrap_or(true)
    }
}

/// Access flags given to the open command (value `a` of slot 1)
pub mod open_flags {
    pub const READ: u32 = 0x0000_0001;
    pub const WRITE: u32 = 0x0000_0002;
    pub const CREATE: u32 = 0x0000_0200;
    pub const EXCLUSIVE: u32 = 0x0000_0400;
}

/// Seek origins (value `b` of slot 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Whence {
    Set = 0,
    Cur = 1,
    End = 2,
}

impl TryFrom<u32> for Whence {
    type Error = TeeError;

    fn try_from(v: u32) -> TeeResult<Self> {
        match v {
            0 => Ok(Whence::Set),
            1 => Ok(Whence::Cur),
            2 => Ok(Whence::End),
            _ => Err(TeeError::BadParameters),
        }
    }
}

pub(crate) fn handle(ctx: &mut Context<'_>, cmd: StorageCommand, params: &mut Params) -> TeeResult<()> {
    let owner = ctx.session.identity.uuid;
    match cmd {
        StorageCommand::Open => open(ctx, params),
        StorageCommand::Close => {
            let handle = ObjectHandle::from_bytes(params[0].input_bytes()?)?;
            let entry = ctx.session.close_object(handle, ctx.open_files)?;
            log::debug!("closed file {:?}", String::from_utf8_lossy(&entry.name));
            Ok(())
        }
        StorageCommand::CloseAll => {
            let files: Vec<_> = ctx.session.files.iter().copied().collect();
            for handle in &files {
                ctx.session.close_object(*handle, ctx.open_files)?;
            }
            log::debug!("session {} closed {} files", ctx.session.id, files.len());
            Ok(())
        }
        StorageCommand::Read => {
            let (handle, name, pos) = file(ctx, params, open_flags::READ)?;
            let data = ctx
                .storage
                .read(&owner, &name, pos as usize, params[1].capacity())
                .map_err(|_| TeeError::ReadData)?;
            params[1].write_output(&data)?;
            set_position(ctx, handle, pos as u64 + data.len() as u64)
        }
        StorageCommand::Write => {
            let (handle, name, pos) = file(ctx, params, open_flags::WRITE)?;
            let data = params[1].input_bytes()?;
            ctx.storage
                .write(&owner, &name, pos as usize, data)
                .map_err(|e| match e {
                    TeeError::StorageNoSpace => e,
                    _ => TeeError::WriteData,
                })?;
            let end = pos as u64 + data.len() as u64;
            set_position(ctx, handle, end)?;
            refresh_size(ctx, handle, &name)
        }
        StorageCommand::Seek => {
            let (handle, name, pos) = file(ctx, params, 0)?;
            let (offset, whence) = params[1].value()?;
            let base = match Whence::try_from(whence)? {
                Whence::Set => 0,
                Whence::Cur => pos as i64,
                Whence::End => ctx.storage.size(&owner, &name)? as i64,
            };
            let target = base + offset as i32 as i64;
            if target < 0 {
                return Err(TeeError::SeekData);
            }
            set_position(ctx, handle, target as u64)
        }
        StorageCommand::Tell => {
            let (_, _, pos) = file(ctx, params, 0)?;
            params[1].set_value(pos, 0)
        }
        StorageCommand::Truncate => {
            let (handle, name, _) = file(ctx, params, open_flags::WRITE)?;
            let (len, _) = params[1].value()?;
            ctx.storage
                .truncate(&owner, &name, len as usize)
                .map_err(|e| match e {
                    TeeError::StorageNoSpace => e,
                    _ => TeeError::TruncateObject,
                })?;
            refresh_size(ctx, handle, &name)
        }
        StorageCommand::Remove => {
            let name = params[0].input_bytes()?;
            if ctx.open_files.is_open(&owner, name) {
                log::debug!("remove of open file {:?} refused", String::from_utf8_lossy(name));
                return Err(TeeError::AccessConflict);
            }
            ctx.storage.remove(&owner, name)?;
            log::info!("removed file {:?}", String::from_utf8_lossy(name));
            Ok(())
        }
        StorageCommand::Finfo => {
            let (_, name, pos) = file(ctx, params, 0)?;
            let size = ctx.storage.size(&owner, &name)?;
            params[1].set_value(size as u32, pos)
        }
        StorageCommand::Fsync => {
            let (_, name, _) = file(ctx, params, 0)?;
            ctx.storage
                .sync(&owner, &name)
                .map_err(|_| TeeError::SyncData)
        }
    }
}

fn open(ctx: &mut Context<'_>, params: &mut Params) -> TeeResult<()> {
    let name = params[0].input_bytes()?.to_vec();
    let (flags, _) = params[1].value()?;
    if params[2].capacity() < HANDLE_WIRE_LEN {
        params[2].set_required(HANDLE_WIRE_LEN);
        return Err(TeeError::ShortBuffer {
            required: HANDLE_WIRE_LEN,
        });
    }

    let owner = ctx.session.identity.uuid;
    let exists = ctx.storage.exists(&owner, &name)?;
    if exists && flags & open_flags::EXCLUSIVE != 0 {
        return Err(TeeError::AccessConflict);
    }
    if !exists && flags & open_flags::CREATE == 0 {
        return Err(TeeError::ItemNotFound);
    }

    let handle = ctx
        .session
        .registry
        .create(&name, ObjectType::Data, u32::MAX, flags)?;
    if !exists {
        if let Err(e) = ctx.storage.create(&owner, &name) {
            ctx.session.registry.close(handle)?;
            return Err(e);
        }
    }
    ctx.open_files.acquire(&owner, &name)?;
    ctx.session.files.insert(handle);

    let size = ctx.storage.size(&owner, &name)?;
    let entry = ctx.session.registry.get_mut(handle)?;
    entry.info.handle_flags =
        handle_flags::PERSISTENT | handle_flags::INITIALIZED | (flags & 0xFFFF);
    entry.info.data_size = size as u32;
    log::info!(
        "session {} opened file {:?} ({} bytes)",
        ctx.session.id,
        String::from_utf8_lossy(&name),
        size
    );
    params[2].write_output(&handle.to_bytes())
}

/// Resolve slot 0 to an open file, checking the access flag `need`
fn file(ctx: &Context<'_>, params: &Params, need: u32) -> TeeResult<(ObjectHandle, Vec<u8>, u32)> {
    let handle = ObjectHandle::from_bytes(params[0].input_bytes()?)?;
    let entry = ctx.session.registry.get(handle)?;
    if !ctx.session.files.contains(&handle) {
        return Err(TeeError::BadParameters);
    }
    if entry.info.handle_flags & need != need {
        return Err(TeeError::AccessDenied);
    }
    Ok((handle, entry.name.clone(), entry.info.data_position))
}

fn set_position(ctx: &mut Context<'_>, handle: ObjectHandle, pos: u64) -> TeeResult<()> {
    let pos = u32::try_from(pos).map_err(|_| TeeError::Overflow)?;
    ctx.session.registry.get_mut(handle)?.info.data_position = pos;
    Ok(())
}

fn refresh_size(ctx: &mut Context<'_>, handle: ObjectHandle, name: &[u8]) -> TeeResult<()> {
    let owner = ctx.session.identity.uuid;
    let size = ctx.storage.size(&owner, name)?;
    ctx.session.registry.get_mut(handle)?.info.data_size = size as u32;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read() {
        let store = MemoryStorage::new(1024);
        let me = TeeUuid::repeated(0xAA);
        store.create(&me, b"f").unwrap();
        store.write(&me, b"f", 4, b"data").unwrap();
        assert_eq!(store.size(&me, b"f").unwrap(), 8);
        assert_eq!(store.read(&me, b"f", 0, 100).unwrap(), b"\0\0\0\0data".to_vec());
        assert_eq!(store.read(&me, b"f", 20, 4).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_namespaced_by_owner() {
        let store = MemoryStorage::new(1024);
        let a = TeeUuid::repeated(1);
        let b = TeeUuid::repeated(2);
        store.create(&a, b"shared").unwrap();
        assert!(!store.exists(&b, b"shared").unwrap());
        store.create(&b, b"shared").unwrap();
        assert_eq!(store.create(&a, b"shared"), Err(TeeError::AccessConflict));
    }

    #[test]
    fn test_quota() {
        let store = MemoryStorage::new(10);
        let me = TeeUuid::repeated(3);
        store.create(&me, b"a").unwrap();
        store.write(&me, b"a", 0, &[1; 8]).unwrap();
        store.create(&me, b"b").unwrap();
        assert_eq!(store.write(&me, b"b", 0, &[1; 3]), Err(TeeError::StorageNoSpace));
        store.write(&me, b"b", 0, &[1; 2]).unwrap();
        assert_eq!(store.used(), 10);

        store.truncate(&me, b"a", 2).unwrap();
        store.write(&me, b"b", 2, &[1; 6]).unwrap();
        assert_eq!(store.used(), 10);
    }

    #[test]
    fn test_open_counts() {
        let open = OpenFiles::new();
        let me = TeeUuid::repeated(5);
        let other = TeeUuid::repeated(6);
        open.acquire(&me, b"f").unwrap();
        open.acquire(&me, b"f").unwrap();
        assert!(!open.is_open(&other, b"f"));
        open.release(&me, b"f");
        assert!(open.is_open(&me, b"f"));
        open.release(&me, b"f");
        assert!(!open.is_open(&me, b"f"));
        open.release(&me, b"f");
        assert!(!open.is_open(&me, b"f"));
    }

    #[test]
    fn test_remove() {
        let store = MemoryStorage::new(10);
        let me = TeeUuid::repeated(4);
        assert_eq!(store.remove(&me, b"x"), Err(TeeError::ItemNotFound));
        store.create(&me, b"x").unwrap();
        store.remove(&me, b"x").unwrap();
        assert_eq!(store.sync(&me, b"x"), Err(TeeError::ItemNotFound));
    }
}
