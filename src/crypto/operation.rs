//! Crypto operation state machine
//!
//! Legal sequences:
//! - cipher / MAC / digest: `init → update_aad* → update* → do_final | compare_final`
//! - signature: `init → sign_digest | verify_digest`
//!
//! Every out-of-sequence call is `BadState` and leaves the operation as it
//! was. A call whose output would not fit reports `ShortBuffer` with the
//! exact size needed, also without moving the state. A final call the engine
//! rejects (a ragged last block, say) leaves the operation running too.

use super::engine::{CryptoEngine, OperationContext};
use super::{constant_time_eq, Algorithm, AlgorithmClass, KeyMaterial, OperationMode};
use crate::error::{TeeError, TeeResult};
use crate::object::ObjectHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// No init yet (or a key was just bound)
    Idle,
    /// Initialized, nothing processed
    Initialized,
    /// Additional authenticated data being absorbed
    Aad,
    /// Payload being processed
    Updating,
    /// A final call consumed the operation
    Finished,
}

pub struct CryptoOperation {
    algorithm: Algorithm,
    mode: Option<OperationMode>,
    state: OperationState,
    key: Option<(ObjectHandle, KeyMaterial)>,
    context: Option<Box<dyn OperationContext>>,
}

impl std::fmt::Debug for CryptoOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoOperation")
            .field("algorithm", &self.algorithm)
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("key", &self.key.as_ref().map(|(h, _)| *h))
            .finish()
    }
}

impl CryptoOperation {
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            mode: None,
            state: OperationState::Idle,
            key: None,
            context: None,
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn state(&self) -> OperationState {
        self.state
    }

    pub fn key_handle(&self) -> Option<ObjectHandle> {
        self.key.as_ref().map(|(h, _)| *h)
    }

    /// Attach key material. Refused while data is in flight.
    pub fn bind_key(&mut self, handle: ObjectHandle, material: KeyMaterial) -> TeeResult<()> {
        if matches!(self.state, OperationState::Aad | OperationState::Updating) {
            return Err(TeeError::BadState);
        }
        self.rekey(handle, material)
    }

    /// Replace the key snapshot and drop any progress, whatever the state.
    /// Used right before an init, which restarts the operation anyway.
    pub fn rekey(&mut self, handle: ObjectHandle, material: KeyMaterial) -> TeeResult<()> {
        if !self.algorithm.accepts_key(material.object_type) {
            return Err(TeeError::BadParameters);
        }
        self.key = Some((handle, material));
        self.context = None;
        self.state = OperationState::Idle;
        Ok(())
    }

    /// Drop the key if it came from `handle` (the object is going away)
    pub fn forget_key(&mut self, handle: ObjectHandle) {
        if self.key_handle() == Some(handle) {
            self.key = None;
            self.context = None;
            self.state = OperationState::Idle;
        }
    }

    /// (Re)start the operation. Any previous progress is discarded.
    pub fn init(&mut self, engine: &dyn CryptoEngine, direction: u32, iv: &[u8]) -> TeeResult<()> {
        let mode = OperationMode::for_algorithm(self.algorithm, direction)?;
        let key = match (&self.key, self.algorithm.requires_key()) {
            (Some((_, material)), true) => {
                if material.usage & mode.required_usage() == 0 {
                    log::warn!("{:?} key lacks usage for {:?}", self.algorithm, mode);
                    return Err(TeeError::AccessDenied);
                }
                Some(material)
            }
            (None, true) => return Err(TeeError::BadState),
            (_, false) => None,
        };

        let context = engine.start(self.algorithm, mode, key, iv)?;
        self.context = Some(context);
        self.mode = Some(mode);
        self.state = OperationState::Initialized;
        Ok(())
    }

    fn running(&mut self, states: &[OperationState]) -> TeeResult<&mut Box<dyn OperationContext>> {
        if !states.contains(&self.state) {
            return Err(TeeError::BadState);
        }
        self.context.as_mut().ok_or(TeeError::BadState)
    }

    pub fn update_aad(&mut self, aad: &[u8]) -> TeeResult<()> {
        if self.algorithm.class() != AlgorithmClass::AuthenticatedEncryption {
            return Err(TeeError::BadState);
        }
        let ctx = self.running(&[OperationState::Initialized, OperationState::Aad])?;
        ctx.update_aad(aad)?;
        self.state = OperationState::Aad;
        Ok(())
    }

    /// Feed payload; returns whatever output is ready
    pub fn update(&mut self, input: &[u8], capacity: usize) -> TeeResult<Vec<u8>> {
        if !self.streams() {
            return Err(TeeError::BadState);
        }
        let ctx = self.running(&[
            OperationState::Initialized,
            OperationState::Aad,
            OperationState::Updating,
        ])?;
        let required = ctx.update_len(input.len());
        if required > capacity {
            return Err(TeeError::ShortBuffer { required });
        }
        let out = ctx.update(input)?;
        self.state = OperationState::Updating;
        Ok(out)
    }

    /// Feed the last payload and produce the result
    pub fn do_final(&mut self, input: &[u8], capacity: usize) -> TeeResult<Vec<u8>> {
        if self.algorithm.class() == AlgorithmClass::Signature {
            return Err(TeeError::BadState);
        }
        let ctx = self.running(&[
            OperationState::Initialized,
            OperationState::Aad,
            OperationState::Updating,
        ])?;
        let required = ctx.final_len(input.len());
        if required > capacity {
            return Err(TeeError::ShortBuffer { required });
        }
        let out = ctx.finish(input)?;
        self.finish();
        Ok(out)
    }

    /// Finish a MAC and compare it against `expected` in constant time
    pub fn compare_final(&mut self, input: &[u8], expected: &[u8]) -> TeeResult<()> {
        if !matches!(
            self.algorithm.class(),
            AlgorithmClass::Mac | AlgorithmClass::AuthenticatedEncryption
        ) {
            return Err(TeeError::BadState);
        }
        let ctx = self.running(&[
            OperationState::Initialized,
            OperationState::Aad,
            OperationState::Updating,
        ])?;
        let computed = ctx.finish(input)?;
        self.finish();
        if constant_time_eq(&computed, expected) {
            Ok(())
        } else {
            Err(TeeError::MacInvalid)
        }
    }

    pub fn sign_digest(&mut self, digest: &[u8], capacity: usize) -> TeeResult<Vec<u8>> {
        self.expect_mode(OperationMode::Sign)?;
        let ctx = self.running(&[OperationState::Initialized])?;
        let required = ctx.signature_len();
        if required > capacity {
            return Err(TeeError::ShortBuffer { required });
        }
        let signature = ctx.sign_digest(digest)?;
        self.finish();
        Ok(signature)
    }

    pub fn verify_digest(&mut self, digest: &[u8], signature: &[u8]) -> TeeResult<()> {
        self.expect_mode(OperationMode::Verify)?;
        let ctx = self.running(&[OperationState::Initialized])?;
        let result = ctx.verify_digest(digest, signature);
        self.finish();
        result
    }

    fn streams(&self) -> bool {
        matches!(
            self.algorithm.class(),
            AlgorithmClass::Cipher
                | AlgorithmClass::AuthenticatedEncryption
                | AlgorithmClass::Mac
                | AlgorithmClass::Digest
        )
    }

    fn expect_mode(&self, mode: OperationMode) -> TeeResult<()> {
        if self.algorithm.class() != AlgorithmClass::Signature || self.mode != Some(mode) {
            return Err(TeeError::BadState);
        }
        Ok(())
    }

    fn finish(&mut self) {
        self.context = None;
        self.state = OperationState::Finished;
    }
}
