//! Crypto service: routes phase-tagged commands into per-session operations
//!
//! Slot layout for the stateful commands:
//! - slot 0: key reference (wire form of an [`ObjectHandle`]), snapshotted
//!   afresh at every init
//! - slot 1: `{phase, arg}`; `arg` is the direction at init and the
//!   expected tag length at compare-final
//! - slot 2: IV at init, payload otherwise (for compare-final the expected
//!   tag is the trailing `arg` bytes)
//! - slot 3: output; for signature commands an in/out buffer that carries
//!   the signature to verify

use super::CryptCommand;
use crate::crypto::{
    Algorithm, AlgorithmClass, CryptoOperation, DeriveHash, DeriveMode, KeyMaterial, Phase,
};
use crate::error::{TeeError, TeeResult};
use crate::object::{usage, ObjectHandle};
use crate::param::Params;
use crate::session::Context;

const OUTPUT: usize = 3;

pub(crate) fn handle(ctx: &mut Context<'_>, cmd: CryptCommand, params: &mut Params) -> TeeResult<()> {
    match cmd {
        CryptCommand::Encrypt | CryptCommand::Decrypt => Err(TeeError::NotImplemented),
        CryptCommand::CipherRnd => random(ctx, params),
        CryptCommand::CipherDk => derive(ctx, params),
        other => {
            let algorithm = other.algorithm().ok_or(TeeError::InvalidCmd)?;
            let result = run_phase(ctx, other, algorithm, params);
            if let Err(TeeError::ShortBuffer { required }) = result {
                params[OUTPUT].set_required(required);
            }
            result
        }
    }
}

fn random(ctx: &mut Context<'_>, params: &mut Params) -> TeeResult<()> {
    let mut buf = vec![0u8; params[OUTPUT].capacity()];
    ctx.engine.random(&mut buf)?;
    params[OUTPUT].write_output(&buf)
}

fn key_material(ctx: &Context<'_>, params: &Params) -> TeeResult<(ObjectHandle, KeyMaterial)> {
    let handle = ObjectHandle::from_bytes(params[0].input_bytes()?)?;
    let entry = ctx.session.registry.get(handle)?;
    Ok((handle, KeyMaterial::from_entry(entry)?))
}

fn derive(ctx: &mut Context<'_>, params: &mut Params) -> TeeResult<()> {
    let (_, key) = key_material(ctx, params)?;
    if key.usage & usage::DERIVE == 0 {
        return Err(TeeError::AccessDenied);
    }
    if !key.object_type.is_secret_key() {
        return Err(TeeError::BadParameters);
    }

    let (mode, hash) = params[1].value()?;
    let mode = DeriveMode::try_from(mode)?;
    let hash = DeriveHash::try_from(hash)?;
    let other_info = params[2].input_bytes()?;
    let out_len = params[OUTPUT].capacity();

    let derived = ctx
        .engine
        .derive_key(mode, hash, key.secret()?, other_info, out_len)?;
    params[OUTPUT].write_output(&derived)
}

fn run_phase(
    ctx: &mut Context<'_>,
    cmd: CryptCommand,
    algorithm: Algorithm,
    params: &mut Params,
) -> TeeResult<()> {
    let (phase, arg) = params[1].value()?;
    let phase = Phase::try_from(phase)?;

    let key = if phase == Phase::Init && algorithm.requires_key() {
        Some(key_material(ctx, params)?)
    } else {
        None
    };

    let engine = ctx.engine;
    let op = ctx
        .session
        .operations
        .entry(cmd)
        .or_insert_with(|| CryptoOperation::new(algorithm));
    let input = params[2].input_bytes()?;

    match phase {
        Phase::Init => {
            if let Some((handle, material)) = key {
                op.rekey(handle, material)?;
            }
            op.init(engine, arg, input)?;
            params[OUTPUT].write_output(&[])
        }
        Phase::UpdateAad => {
            op.update_aad(input)?;
            params[OUTPUT].write_output(&[])
        }
        Phase::Update => {
            let out = op.update(input, params[OUTPUT].capacity())?;
            params[OUTPUT].write_output(&out)
        }
        Phase::DoFinal => {
            let out = op.do_final(input, params[OUTPUT].capacity())?;
            log::debug!("session {} finished {:?}", ctx.session.id, algorithm);
            params[OUTPUT].write_output(&out)
        }
        Phase::CompareFinal => {
            let tag_len = arg as usize;
            if tag_len > input.len() {
                return Err(TeeError::BadParameters);
            }
            let (message, tag) = input.split_at(input.len() - tag_len);
            let result = op.compare_final(message, tag);
            if result == Err(TeeError::MacInvalid) {
                log::warn!("session {}: {:?} tag mismatch", ctx.session.id, algorithm);
            }
            result?;
            params[OUTPUT].write_output(&[])
        }
        Phase::SignDigest => {
            let signature = op.sign_digest(input, params[OUTPUT].capacity())?;
            params[OUTPUT].write_output(&signature)
        }
        Phase::VerifyDigest => {
            if algorithm.class() != AlgorithmClass::Signature {
                return Err(TeeError::BadState);
            }
            let signature = params[OUTPUT].input_bytes()?;
            op.verify_digest(input, signature)
        }
    }
}
