//! Modem control-plane client state
//!
//! The dispatcher owns one [`ModemControl`]; the control plane reports
//! readiness through [`ModemControl::set_state`] and asks for power changes
//! through [`ModemControl::request_power`].

use crate::error::{TeeError, TeeResult};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ModemState {
    NotReady = 0,
    Ready = 1,
}

impl TryFrom<u32> for ModemState {
    type Error = TeeError;

    fn try_from(v: u32) -> TeeResult<Self> {
        match v {
            0 => Ok(ModemState::NotReady),
            1 => Ok(ModemState::Ready),
            _ => Err(TeeError::BadParameters),
        }
    }
}

impl ModemState {
    pub fn label(&self) -> &'static str {
        match self {
            ModemState::NotReady => "MODEM_STATE_OFF",
            ModemState::Ready => "MODEM_STATE_READY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerRequest {
    On,
    Off,
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerOutcome {
    Applied,
    /// Power-off was already done once; repeated requests are dropped
    AlreadyOff,
}

#[derive(Debug)]
pub struct ModemControl {
    state: AtomicU32,
    powered_off: AtomicBool,
}

impl Default for ModemControl {
    fn default() -> Self {
        Self {
            state: AtomicU32::new(ModemState::NotReady as u32),
            powered_off: AtomicBool::new(false),
        }
    }
}

impl ModemControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a raw state value; anything past `Ready` is rejected
    pub fn set_state(&self, raw: u32) -> TeeResult<ModemState> {
        let state = ModemState::try_from(raw).map_err(|e| {
            log::warn!("modem: invalid state {:#x}", raw);
            e
        })?;
        self.state.store(state as u32, Ordering::SeqCst);
        Ok(state)
    }

    pub fn state(&self) -> ModemState {
        match self.state.load(Ordering::SeqCst) {
            1 => ModemState::Ready,
            _ => ModemState::NotReady,
        }
    }

    pub fn request_power(&self, request: PowerRequest) -> PowerOutcome {
        match request {
            PowerRequest::Off => {
                if self.powered_off.swap(true, Ordering::SeqCst) {
                    log::warn!("modem: power off already requested");
                    return PowerOutcome::AlreadyOff;
                }
                self.state.store(ModemState::NotReady as u32, Ordering::SeqCst);
                log::info!("modem: power off");
            }
            PowerRequest::On => log::info!("modem: power on"),
            PowerRequest::Reset => {
                self.state.store(ModemState::NotReady as u32, Ordering::SeqCst);
                log::info!("modem: reset");
            }
        }
        PowerOutcome::Applied
    }
}
