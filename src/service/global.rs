//! Global service: boot handshake, time and notification memory

use super::GlobalCommand;
use crate::error::{TeeError, TeeResult};
use crate::param::Params;
use crate::secmem::PhysAddr;
use crate::session::Context;
use chrono::{DateTime, Utc};

pub(crate) fn handle(ctx: &mut Context<'_>, cmd: GlobalCommand, params: &mut Params) -> TeeResult<()> {
    match cmd {
        GlobalCommand::BootAck => {
            log::info!("boot acknowledged by session {}", ctx.session.id);
            Ok(())
        }
        GlobalCommand::NeedLoadApp => params[0].set_value(0, 0),
        GlobalCommand::TeeTime => {
            let (seconds, millis) = tee_time(Utc::now())?;
            params[0].set_value(seconds, millis)
        }
        GlobalCommand::RegisterNotifyMemory => {
            let (phys, size) = params[0].value()?;
            let phys = phys as PhysAddr;
            let mut held = ctx.notify.lock().map_err(|_| TeeError::Generic)?;
            if held.contains_key(&phys) {
                return Err(TeeError::AccessConflict);
            }
            let virt = ctx.mapper.map(phys, size)?;
            held.insert(phys, virt);
            log::info!("notify memory {:#x} registered at {:#x}", phys, virt);
            params[1].set_value(virt as u32, (virt >> 32) as u32)
        }
        GlobalCommand::UnregisterNotifyMemory => {
            let (phys, _) = params[0].value()?;
            let mut held = ctx.notify.lock().map_err(|_| TeeError::Generic)?;
            let virt = held.remove(&(phys as PhysAddr)).ok_or(TeeError::ItemNotFound)?;
            ctx.mapper.unmap(virt)?;
            log::info!("notify memory {:#x} unregistered", phys);
            Ok(())
        }
        GlobalCommand::AllocExceptionMem => {
            let (phys, size) = params[0].value()?;
            let phys = phys as PhysAddr;
            let guard = ctx.mapper.acquire(phys, size)?;
            guard.fill(0)?;
            ctx.mapper.flush_cpu_to_device(phys, true)?;
            log::info!("exception memory {:#x} (+{}) cleared", phys, size);
            Ok(())
        }
        GlobalCommand::OpenSession | GlobalCommand::CloseSession => Err(TeeError::NotSupported),
        GlobalCommand::LoadSecureApp
        | GlobalCommand::RegisterAgent
        | GlobalCommand::UnregisterAgent
        | GlobalCommand::InitContentPath
        | GlobalCommand::TerminateContentPath => Err(TeeError::NotImplemented),
    }
}

/// `(seconds, millis)` since the epoch. The wire carries 32-bit seconds, so
/// clocks before 1970 or past 2106 are refused instead of wrapped.
fn tee_time(now: DateTime<Utc>) -> TeeResult<(u32, u32)> {
    let seconds = u32::try_from(now.timestamp()).map_err(|_| {
        log::warn!("clock {} does not fit the 32-bit time value", now);
        TeeError::TimeNotSet
    })?;
    Ok((seconds, now.timestamp_subsec_millis()))
}
