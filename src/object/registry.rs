//! Object Handle Registry: per-session arena of objects
//!
//! Slots are reused after close, but each reuse bumps the slot's
//! generation, so stale handles never reach the new occupant. Handles also
//! carry the owning session ID; a handle from another session resolves to
//! `ItemNotFound`.

use super::{
    handle_flags, Attribute, AttributeId, ObjectHandle, ObjectInfo, ObjectType,
    MAX_OBJECT_NAME_LEN,
};
use crate::error::{TeeError, TeeResult};
use std::collections::{HashMap, HashSet};

/// A live object owned by the registry
#[derive(Debug, Clone)]
pub struct ObjectEntry {
    pub name: Vec<u8>,
    pub info: ObjectInfo,
    attributes: Vec<(AttributeId, Attribute)>,
}

impl ObjectEntry {
    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter().map(|(_, a)| a)
    }

    pub fn attribute(&self, id: AttributeId) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|(aid, _)| *aid == id)
            .map(|(_, a)| a)
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_populated(&self) -> bool {
        self.info.handle_flags & handle_flags::INITIALIZED != 0
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    entry: Option<ObjectEntry>,
}

/// Registry of every object one session created
#[derive(Debug)]
pub struct ObjectRegistry {
    session: u32,
    slots: Vec<Slot>,
    free: Vec<usize>,
    names: HashMap<Vec<u8>, usize>,
    max_objects: usize,
    max_name_len: usize,
}

impl ObjectRegistry {
    pub fn new(session: u32, max_objects: usize) -> Self {
        Self {
            session,
            slots: Vec::new(),
            free: Vec::new(),
            names: HashMap::new(),
            max_objects,
            max_name_len: MAX_OBJECT_NAME_LEN,
        }
    }

    /// Lower the name length limit (it never exceeds [`MAX_OBJECT_NAME_LEN`])
    pub fn with_name_limit(mut self, max_name_len: usize) -> Self {
        self.max_name_len = max_name_len.min(MAX_OBJECT_NAME_LEN);
        self
    }

    /// Allocate a new object. Names are unique within this session only.
    pub fn create(
        &mut self,
        name: &[u8],
        object_type: ObjectType,
        max_size: u32,
        usage: u32,
    ) -> TeeResult<ObjectHandle> {
        if name.is_empty() || name.len() > self.max_name_len {
            return Err(TeeError::BadParameters);
        }
        if self.names.contains_key(name) {
            return Err(TeeError::AccessConflict);
        }
        if self.len() >= self.max_objects {
            log::warn!(
                "session {} object limit ({}) reached",
                self.session,
                self.max_objects
            );
            return Err(TeeError::OutOfMemory);
        }

        let entry = ObjectEntry {
            name: name.to_vec(),
            info: ObjectInfo {
                object_type,
                object_size: 0,
                max_object_size: max_size,
                object_usage: usage,
                data_size: 0,
                data_position: 0,
                handle_flags: 0,
            },
            attributes: Vec::new(),
        };

        let index = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.generation = slot.generation.wrapping_add(1);
                slot.entry = Some(entry);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                self.slots.len() - 1
            }
        };
        self.names.insert(name.to_vec(), index);

        let handle = ObjectHandle::new(self.session, index as u32, self.slots[index].generation);
        log::debug!(
            "session {} created object {:?} ({:?}, max {} bytes)",
            self.session,
            String::from_utf8_lossy(name),
            object_type,
            max_size
        );
        Ok(handle)
    }

    /// Attach attributes to an object
    pub fn populate(&mut self, handle: ObjectHandle, attributes: &[Attribute]) -> TeeResult<()> {
        let entry = self.entry_mut(handle)?;
        let object_type = entry.info.object_type;

        if entry.is_populated() && !object_type.permits_repopulate() {
            return Err(TeeError::BadState);
        }

        let permitted = object_type.permitted_attributes();
        let mut seen = HashSet::new();
        let mut checked = Vec::with_capacity(attributes.len());
        let mut key_size = 0usize;
        for attr in attributes {
            let id = attr.checked_id()?;
            if !permitted.contains(&id) || !seen.insert(id) {
                return Err(TeeError::BadParameters);
            }
            if attr.len() > entry.info.max_object_size as usize {
                return Err(TeeError::BadParameters);
            }
            if matches!(id, AttributeId::SecretValue | AttributeId::RsaModulus) {
                key_size = attr.len();
            }
            checked.push((id, attr.clone()));
        }

        entry.attributes = checked;
        entry.info.object_size = key_size as u32;
        entry.info.handle_flags |= handle_flags::INITIALIZED;
        Ok(())
    }

    /// Clear committed attributes so the object may be populated again
    pub fn reset(&mut self, handle: ObjectHandle) -> TeeResult<()> {
        let entry = self.entry_mut(handle)?;
        entry.attributes.clear();
        entry.info.object_size = 0;
        entry.info.handle_flags &= !handle_flags::INITIALIZED;
        Ok(())
    }

    pub fn get_info(&self, handle: ObjectHandle) -> TeeResult<ObjectInfo> {
        Ok(self.entry(handle)?.info)
    }

    pub fn get(&self, handle: ObjectHandle) -> TeeResult<&ObjectEntry> {
        self.entry(handle)
    }

    pub fn get_mut(&mut self, handle: ObjectHandle) -> TeeResult<&mut ObjectEntry> {
        self.entry_mut(handle)
    }

    /// Look up a live object by name
    pub fn find(&self, name: &[u8]) -> Option<ObjectHandle> {
        let index = *self.names.get(name)?;
        let slot = &self.slots[index];
        slot.entry
            .as_ref()
            .map(|_| ObjectHandle::new(self.session, index as u32, slot.generation))
    }

    /// Release an object. Closing a stale handle is `BadState`.
    pub fn close(&mut self, handle: ObjectHandle) -> TeeResult<ObjectEntry> {
        if handle.session() != self.session {
            return Err(TeeError::ItemNotFound);
        }
        let slot = self
            .slots
            .get_mut(handle.index())
            .ok_or(TeeError::ItemNotFound)?;
        if slot.generation != handle.generation() || slot.entry.is_none() {
            return Err(TeeError::BadState);
        }
        let entry = slot.entry.take().ok_or(TeeError::BadState)?;
        self.names.remove(&entry.name);
        self.free.push(handle.index());
        log::debug!(
            "session {} closed object {:?}",
            self.session,
            String::from_utf8_lossy(&entry.name)
        );
        Ok(entry)
    }

    /// Close every live object. Used at session teardown.
    pub fn close_all(&mut self) -> usize {
        let mut closed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.entry.take().is_some() {
                self.free.push(index);
                closed += 1;
            }
        }
        self.names.clear();
        closed
    }

    /// Handles of every live object
    pub fn handles(&self) -> Vec<ObjectHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.entry.is_some())
            .map(|(i, s)| ObjectHandle::new(self.session, i as u32, s.generation))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, handle: ObjectHandle) -> TeeResult<&ObjectEntry> {
        if handle.session() != self.session {
            return Err(TeeError::ItemNotFound);
        }
        self.slots
            .get(handle.index())
            .filter(|s| s.generation == handle.generation())
            .and_then(|s| s.entry.as_ref())
            .ok_or(TeeError::ItemNotFound)
    }

    fn entry_mut(&mut self, handle: ObjectHandle) -> TeeResult<&mut ObjectEntry> {
        if handle.session() != self.session {
            return Err(TeeError::ItemNotFound);
        }
        self.slots
            .get_mut(handle.index())
            .filter(|s| s.generation == handle.generation())
            .and_then(|s| s.entry.as_mut())
            .ok_or(TeeError::ItemNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::usage;

    fn aes_key(reg: &mut ObjectRegistry, name: &str) -> ObjectHandle {
        reg.create(name.as_bytes(), ObjectType::Aes, 16, usage::ALL)
            .unwrap()
    }

    #[test]
    fn test_create_and_info() {
        let mut reg = ObjectRegistry::new(1, 8);
        let h = aes_key(&mut reg, "k1");
        let info = reg.get_info(h).unwrap();
        assert_eq!(info.object_type, ObjectType::Aes);
        assert_eq!(info.max_object_size, 16);
        assert_eq!(info.object_size, 0);
        assert_eq!(reg.find(b"k1"), Some(h));
    }

    #[test]
    fn test_name_collision() {
        let mut reg = ObjectRegistry::new(1, 8);
        aes_key(&mut reg, "dup");
        let err = reg
            .create(b"dup", ObjectType::Des, 8, usage::ALL)
            .unwrap_err();
        assert_eq!(err, TeeError::AccessConflict);

        // Same name is fine in another session's namespace
        let mut other = ObjectRegistry::new(2, 8);
        assert!(other.create(b"dup", ObjectType::Aes, 16, usage::ALL).is_ok());
    }

    #[test]
    fn test_object_limit() {
        let mut reg = ObjectRegistry::new(1, 2);
        aes_key(&mut reg, "a");
        aes_key(&mut reg, "b");
        let err = reg.create(b"c", ObjectType::Aes, 16, usage::ALL).unwrap_err();
        assert_eq!(err, TeeError::OutOfMemory);
    }

    #[test]
    fn test_bad_names() {
        let mut reg = ObjectRegistry::new(1, 8);
        assert_eq!(
            reg.create(b"", ObjectType::Aes, 16, usage::ALL),
            Err(TeeError::BadParameters)
        );
        let long = vec![b'x'; MAX_OBJECT_NAME_LEN + 1];
        assert_eq!(
            reg.create(&long, ObjectType::Aes, 16, usage::ALL),
            Err(TeeError::BadParameters)
        );

        let mut short = ObjectRegistry::new(1, 8).with_name_limit(4);
        assert!(short.create(b"four", ObjectType::Aes, 16, usage::ALL).is_ok());
        assert_eq!(
            short.create(b"fives", ObjectType::Aes, 16, usage::ALL),
            Err(TeeError::BadParameters)
        );
    }

    #[test]
    fn test_populate() {
        let mut reg = ObjectRegistry::new(1, 8);
        let h = aes_key(&mut reg, "k");
        reg.populate(h, &[Attribute::reference(AttributeId::SecretValue, vec![7u8; 16])])
            .unwrap();
        let entry = reg.get(h).unwrap();
        assert_eq!(entry.attribute_count(), 1);
        assert_eq!(entry.info.object_size, 16);
        assert!(entry.is_populated());
        assert_eq!(
            entry.attribute(AttributeId::SecretValue).unwrap().bytes().unwrap(),
            &[7u8; 16]
        );
    }

    #[test]
    fn test_populate_rejects_bad_attributes() {
        let mut reg = ObjectRegistry::new(1, 8);
        let h = aes_key(&mut reg, "k");

        let unknown = Attribute {
            id: 0xC000_0999,
            content: crate::object::AttributeContent::Ref(vec![1]),
        };
        assert_eq!(reg.populate(h, &[unknown]), Err(TeeError::BadParameters));

        let dup = [
            Attribute::reference(AttributeId::SecretValue, vec![1u8; 16]),
            Attribute::reference(AttributeId::SecretValue, vec![2u8; 16]),
        ];
        assert_eq!(reg.populate(h, &dup), Err(TeeError::BadParameters));

        let foreign = [Attribute::reference(AttributeId::RsaModulus, vec![1u8; 16])];
        assert_eq!(reg.populate(h, &foreign), Err(TeeError::BadParameters));

        let too_big = [Attribute::reference(AttributeId::SecretValue, vec![1u8; 32])];
        assert_eq!(reg.populate(h, &too_big), Err(TeeError::BadParameters));

        // Nothing was committed by the failed attempts
        assert!(!reg.get(h).unwrap().is_populated());
    }

    #[test]
    fn test_repopulate_needs_reset() {
        let mut reg = ObjectRegistry::new(1, 8);
        let h = aes_key(&mut reg, "k");
        let attrs = [Attribute::reference(AttributeId::SecretValue, vec![1u8; 16])];
        reg.populate(h, &attrs).unwrap();
        assert_eq!(reg.populate(h, &attrs), Err(TeeError::BadState));

        reg.reset(h).unwrap();
        assert!(reg.populate(h, &attrs).is_ok());
    }

    #[test]
    fn test_double_close_is_bad_state() {
        let mut reg = ObjectRegistry::new(1, 8);
        let h = aes_key(&mut reg, "k");
        reg.close(h).unwrap();
        assert_eq!(reg.close(h).unwrap_err(), TeeError::BadState);
        assert_eq!(reg.get_info(h).unwrap_err(), TeeError::ItemNotFound);
    }

    #[test]
    fn test_stale_handle_after_slot_reuse() {
        let mut reg = ObjectRegistry::new(1, 8);
        let old = aes_key(&mut reg, "old");
        reg.close(old).unwrap();
        let new = aes_key(&mut reg, "new");
        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);

        // The stale handle must not reach (or release) the new occupant
        assert_eq!(reg.get_info(old).unwrap_err(), TeeError::ItemNotFound);
        assert_eq!(reg.close(old).unwrap_err(), TeeError::BadState);
        assert!(reg.get_info(new).is_ok());
    }

    #[test]
    fn test_foreign_session_handle() {
        let mut a = ObjectRegistry::new(1, 8);
        let mut b = ObjectRegistry::new(2, 8);
        let ha = aes_key(&mut a, "k");
        let _hb = aes_key(&mut b, "k");
        assert_eq!(b.get_info(ha).unwrap_err(), TeeError::ItemNotFound);
        assert_eq!(b.close(ha).unwrap_err(), TeeError::ItemNotFound);
    }

    #[test]
    fn test_close_all() {
        let mut reg = ObjectRegistry::new(1, 8);
        let handles: Vec<_> = ["a", "b", "c"].iter().map(|n| aes_key(&mut reg, n)).collect();
        assert_eq!(reg.handles().len(), 3);
        assert_eq!(reg.close_all(), 3);
        assert!(reg.is_empty());
        for h in handles {
            assert_eq!(reg.get_info(h).unwrap_err(), TeeError::ItemNotFound);
        }
    }
}
