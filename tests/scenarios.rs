use std::sync::Arc;
use std::time::Duration;

use tee_core::config::SessionLimits;
use tee_core::crypto::{
    Algorithm, CryptoEngine, DeriveHash, DeriveMode, KeyMaterial, OperationContext,
    OperationMode, Phase, SoftwareEngine, CIPHER_ENCRYPT,
};
use tee_core::object::{usage, HANDLE_WIRE_LEN};
use tee_core::param::ParamType;
use tee_core::secmem::SimulatedSecureMemory;
use tee_core::service::storage::{open_flags, Whence};
use tee_core::service::MemoryStorage;
use tee_core::{
    param_types, Attribute, AttributeId, BusyPolicy, CryptCommand, Dispatcher, GlobalCommand,
    Identity, LoginMethod, ObjectHandle, ObjectType, Param, Params, ServiceId, SessionId,
    StorageCommand, TeeConfig, TeeError, TeeResult, TeeUuid,
};

const SECURE_BASE: u64 = 0x8000_0000;

fn dispatcher_with(config: TeeConfig, engine: Arc<dyn CryptoEngine>) -> Dispatcher {
    let memory = Arc::new(SimulatedSecureMemory::new());
    memory.add_region(SECURE_BASE, 0x10_0000, true).unwrap();
    Dispatcher::new(config, engine, Arc::new(MemoryStorage::new(4096)), memory)
}

fn dispatcher() -> Dispatcher {
    dispatcher_with(TeeConfig::default(), Arc::new(SoftwareEngine::new()))
}

async fn crypto_session(d: &Dispatcher) -> SessionId {
    d.open_session(&ServiceId::Crypto.uuid(), Identity::public())
        .await
        .unwrap()
}

async fn secret_key(
    d: &Dispatcher,
    s: SessionId,
    name: &[u8],
    object_type: ObjectType,
    key: &[u8],
    usage: u32,
) -> ObjectHandle {
    let h = d
        .create_object(s, name, object_type, key.len() as u32, usage)
        .await
        .unwrap();
    d.populate_object(s, h, &[Attribute::reference(AttributeId::SecretValue, key.to_vec())])
        .await
        .unwrap();
    h
}

/// Invoke one phase of a stateful crypto command, returning the output bytes
async fn phase(
    d: &Dispatcher,
    s: SessionId,
    cmd: CryptCommand,
    key: Option<ObjectHandle>,
    step: Phase,
    arg: u32,
    data: &[u8],
    capacity: usize,
) -> TeeResult<Vec<u8>> {
    let key_ref = match key {
        Some(h) => Param::memref_input(h.to_bytes().to_vec()),
        None => Param::None,
    };
    let mut params = Params::new()
        .with(0, key_ref)
        .with(1, Param::value_input(step as u32, arg))
        .with(2, Param::memref_input(data.to_vec()))
        .with(3, Param::memref_output(capacity));
    let types = params.param_types();
    d.invoke(s, cmd.id(), types, &mut params).await?;
    Ok(params[3].output_bytes().unwrap().to_vec())
}

#[tokio::test]
async fn test_aes_key_scenario() {
    let d = dispatcher();
    let s = crypto_session(&d).await;
    let key = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
    let h = secret_key(&d, s, b"aes", ObjectType::Aes, &key, usage::ENCRYPT).await;

    let cmd = CryptCommand::CipherAesCbc;
    phase(&d, s, cmd, Some(h), Phase::Init, CIPHER_ENCRYPT, &[0; 16], 0)
        .await
        .unwrap();
    let plaintext = hex::decode("00112233445566778899aabbccddeeff").unwrap();
    let mut ct = phase(&d, s, cmd, Some(h), Phase::Update, 0, &plaintext, 16)
        .await
        .unwrap();
    ct.extend(
        phase(&d, s, cmd, Some(h), Phase::DoFinal, 0, &[], 16)
            .await
            .unwrap(),
    );
    assert_eq!(hex::encode(&ct), "69c4e0d86a7b0430d8cdb78070b4c55a");

    // finished operations need a fresh init
    assert_eq!(
        phase(&d, s, cmd, Some(h), Phase::Update, 0, &plaintext, 16).await,
        Err(TeeError::BadState)
    );
}

#[tokio::test]
async fn test_reinit_picks_up_repopulated_key() {
    let d = dispatcher();
    let s = crypto_session(&d).await;
    let h = secret_key(&d, s, b"rolling", ObjectType::Aes, &[1; 16], usage::ENCRYPT).await;
    let fresh = secret_key(&d, s, b"fresh", ObjectType::Aes, &[2; 16], usage::ENCRYPT).await;
    let cmd = CryptCommand::CipherAesEcb;
    let block = [0x42u8; 16];

    phase(&d, s, cmd, Some(h), Phase::Init, CIPHER_ENCRYPT, &[], 0)
        .await
        .unwrap();
    let first = phase(&d, s, cmd, Some(h), Phase::DoFinal, 0, &block, 16)
        .await
        .unwrap();

    d.reset_object(s, h).await.unwrap();
    d.populate_object(s, h, &[Attribute::reference(AttributeId::SecretValue, vec![2; 16])])
        .await
        .unwrap();
    phase(&d, s, cmd, Some(h), Phase::Init, CIPHER_ENCRYPT, &[], 0)
        .await
        .unwrap();
    let second = phase(&d, s, cmd, Some(h), Phase::DoFinal, 0, &block, 16)
        .await
        .unwrap();

    phase(&d, s, cmd, Some(fresh), Phase::Init, CIPHER_ENCRYPT, &[], 0)
        .await
        .unwrap();
    let expected = phase(&d, s, cmd, Some(fresh), Phase::DoFinal, 0, &block, 16)
        .await
        .unwrap();

    assert_ne!(first, second);
    assert_eq!(second, expected);
}

#[tokio::test]
async fn test_value_key_ref_rejected_before_crypto() {
    let d = dispatcher();
    let s = crypto_session(&d).await;
    let mut params = Params::new()
        .with(0, Param::value_input(1, 0))
        .with(1, Param::value_input(Phase::Init as u32, CIPHER_ENCRYPT))
        .with(2, Param::memref_input(vec![0; 16]))
        .with(3, Param::memref_output(16));
    let types = params.param_types();
    assert_eq!(
        d.invoke(s, CryptCommand::CipherAesCbc.id(), types, &mut params)
            .await,
        Err(TeeError::BadParameters)
    );

    // declared tags that lie about the slot contents are refused as well
    let lying = param_types(
        ParamType::MemrefInput,
        ParamType::ValueInput,
        ParamType::MemrefInput,
        ParamType::MemrefOutput,
    );
    assert_eq!(
        d.invoke(s, CryptCommand::CipherAesCbc.id(), lying, &mut params)
            .await,
        Err(TeeError::BadParameters)
    );
}

#[tokio::test]
async fn test_empty_digest_and_missing_init() {
    let d = dispatcher();
    let s = crypto_session(&d).await;
    let cmd = CryptCommand::Sha256;

    assert_eq!(
        phase(&d, s, cmd, None, Phase::Update, 0, b"abc", 0).await,
        Err(TeeError::BadState)
    );

    phase(&d, s, cmd, None, Phase::Init, 0, &[], 0).await.unwrap();
    let digest = phase(&d, s, cmd, None, Phase::DoFinal, 0, &[], 32)
        .await
        .unwrap();
    assert_eq!(
        hex::encode(digest),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}

#[tokio::test]
async fn test_digest_short_buffer_reports_size() {
    let d = dispatcher();
    let s = crypto_session(&d).await;
    let cmd = CryptCommand::Sha256;
    phase(&d, s, cmd, None, Phase::Init, 0, &[], 0).await.unwrap();

    let mut params = Params::new()
        .with(1, Param::value_input(Phase::DoFinal as u32, 0))
        .with(2, Param::memref_input(b"abc".to_vec()))
        .with(3, Param::memref_output(8));
    let types = params.param_types();
    assert_eq!(
        d.invoke(s, cmd.id(), types, &mut params).await,
        Err(TeeError::ShortBuffer { required: 32 })
    );
    assert_eq!(params[3].size(), Some(32));

    // the operation survived the short buffer
    let digest = phase(&d, s, cmd, None, Phase::DoFinal, 0, b"abc", 32)
        .await
        .unwrap();
    assert_eq!(
        hex::encode(digest),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

/// Fresh init, then compare-final with the tag packed after the message
async fn compare_final(
    d: &Dispatcher,
    s: SessionId,
    cmd: CryptCommand,
    key: ObjectHandle,
    message: &[u8],
    expected: &[u8],
) -> TeeResult<Vec<u8>> {
    phase(d, s, cmd, Some(key), Phase::Init, 0, &[], 0).await?;
    let mut packed = message.to_vec();
    packed.extend_from_slice(expected);
    phase(d, s, cmd, Some(key), Phase::CompareFinal, expected.len() as u32, &packed, 0).await
}

#[tokio::test]
async fn test_hmac_compare_final_every_corruption() {
    let d = dispatcher();
    let s = crypto_session(&d).await;
    let h = secret_key(&d, s, b"mac", ObjectType::HmacSha256, b"Jefe", usage::MAC).await;
    let cmd = CryptCommand::HmacSha256;
    let message = b"what do ya want for nothing?";
    let tag = hex::decode("5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843")
        .unwrap();

    compare_final(&d, s, cmd, h, message, &tag).await.unwrap();
    for pos in 0..tag.len() {
        let mut bad = tag.clone();
        bad[pos] ^= 0x01;
        assert_eq!(
            compare_final(&d, s, cmd, h, message, &bad).await,
            Err(TeeError::MacInvalid),
            "position {}",
            pos
        );
    }
}

async fn derive(d: &Dispatcher, s: SessionId, key: ObjectHandle, cap: usize) -> TeeResult<Vec<u8>> {
    let mut params = Params::new()
        .with(0, Param::memref_input(key.to_bytes().to_vec()))
        .with(1, Param::value_input(DeriveMode::Kdf2 as u32, DeriveHash::Sha256 as u32))
        .with(2, Param::memref_input(b"context".to_vec()))
        .with(3, Param::memref_output(cap));
    let types = params.param_types();
    d.invoke(s, CryptCommand::CipherDk.id(), types, &mut params).await?;
    Ok(params[3].output_bytes().unwrap().to_vec())
}

#[tokio::test]
async fn test_key_usage_and_derivation() {
    let d = dispatcher();
    let s = crypto_session(&d).await;
    let no_derive = secret_key(&d, s, b"k1", ObjectType::GenericSecret, &[7; 32], usage::MAC).await;
    let derivable =
        secret_key(&d, s, b"k2", ObjectType::GenericSecret, &[7; 32], usage::DERIVE).await;

    assert_eq!(derive(&d, s, no_derive, 48).await, Err(TeeError::AccessDenied));
    let a = derive(&d, s, derivable, 48).await.unwrap();
    let b = derive(&d, s, derivable, 48).await.unwrap();
    assert_eq!(a.len(), 48);
    assert_eq!(a, b);

    // an encrypt-only key cannot drive decryption
    let aes = secret_key(&d, s, b"aes", ObjectType::Aes, &[1; 16], usage::ENCRYPT).await;
    assert_eq!(
        phase(&d, s, CryptCommand::CipherAesEcb, Some(aes), Phase::Init, 1, &[], 0).await,
        Err(TeeError::AccessDenied)
    );
}

#[tokio::test]
async fn test_session_cap_leaves_no_partial_state() {
    let config = TeeConfig {
        session_limits: SessionLimits {
            crypto: 2,
            ..SessionLimits::default()
        },
        ..TeeConfig::default()
    };
    let d = dispatcher_with(config, Arc::new(SoftwareEngine::new()));
    let first = crypto_session(&d).await;
    crypto_session(&d).await;
    for _ in 0..3 {
        assert_eq!(
            d.open_session(&ServiceId::Crypto.uuid(), Identity::public())
                .await,
            Err(TeeError::SessionMaximum)
        );
    }
    assert_eq!(d.session_count(ServiceId::Crypto).await, 2);

    // other services are unaffected
    d.open_session(&ServiceId::Echo.uuid(), Identity::public())
        .await
        .unwrap();

    d.close_session(first).await.unwrap();
    crypto_session(&d).await;
}

#[tokio::test]
async fn test_handles_die_with_their_session() {
    let d = dispatcher();
    let a = crypto_session(&d).await;
    let b = crypto_session(&d).await;
    let h = secret_key(&d, a, b"key", ObjectType::Aes, &[3; 16], usage::ALL).await;

    // handles are session-local
    assert_eq!(d.object_info(b, h).await, Err(TeeError::ItemNotFound));

    d.close_object(a, h).await.unwrap();
    assert_eq!(d.close_object(a, h).await, Err(TeeError::BadState));
    assert_eq!(d.object_info(a, h).await, Err(TeeError::ItemNotFound));

    let h2 = secret_key(&d, a, b"key", ObjectType::Aes, &[3; 16], usage::ALL).await;
    assert_ne!(h, h2);
    assert_eq!(d.object_info(a, h).await, Err(TeeError::ItemNotFound));

    d.close_session(a).await.unwrap();
    assert_eq!(d.object_info(a, h2).await, Err(TeeError::SessionNotExist));
}

async fn storage_call(
    d: &Dispatcher,
    s: SessionId,
    cmd: StorageCommand,
    params: &mut Params,
) -> TeeResult<()> {
    let types = params.param_types();
    d.invoke(s, cmd.id(), types, params).await
}

async fn open_file(d: &Dispatcher, s: SessionId, name: &[u8], flags: u32) -> TeeResult<Vec<u8>> {
    let mut params = Params::new()
        .with(0, Param::memref_input(name.to_vec()))
        .with(1, Param::value_input(flags, 0))
        .with(2, Param::memref_output(HANDLE_WIRE_LEN));
    storage_call(d, s, StorageCommand::Open, &mut params).await?;
    Ok(params[2].output_bytes().unwrap().to_vec())
}

#[tokio::test]
async fn test_storage_file_flow() {
    let d = dispatcher();
    let who = Identity::new(LoginMethod::Identify, TeeUuid::repeated(0x5A));
    let s = d
        .open_session(&ServiceId::Storage.uuid(), who)
        .await
        .unwrap();
    let rw = open_flags::READ | open_flags::WRITE;

    assert_eq!(open_file(&d, s, b"notes", rw).await, Err(TeeError::ItemNotFound));
    let f = open_file(&d, s, b"notes", rw | open_flags::CREATE).await.unwrap();

    let mut write = Params::new()
        .with(0, Param::memref_input(f.clone()))
        .with(1, Param::memref_input(b"hello world".to_vec()));
    storage_call(&d, s, StorageCommand::Write, &mut write).await.unwrap();

    let mut seek = Params::new()
        .with(0, Param::memref_input(f.clone()))
        .with(1, Param::value_input(0, Whence::Set as u32));
    storage_call(&d, s, StorageCommand::Seek, &mut seek).await.unwrap();

    let mut read = Params::new()
        .with(0, Param::memref_input(f.clone()))
        .with(1, Param::memref_output(5));
    storage_call(&d, s, StorageCommand::Read, &mut read).await.unwrap();
    assert_eq!(read[1].output_bytes().unwrap(), b"hello");

    let mut info = Params::new()
        .with(0, Param::memref_input(f.clone()))
        .with(1, Param::value_output());
    storage_call(&d, s, StorageCommand::Finfo, &mut info).await.unwrap();
    assert_eq!(info[1].value().unwrap(), (11, 5));

    let mut before_start = Params::new()
        .with(0, Param::memref_input(f.clone()))
        .with(1, Param::value_input((-20i32) as u32, Whence::Cur as u32));
    assert_eq!(
        storage_call(&d, s, StorageCommand::Seek, &mut before_start).await,
        Err(TeeError::SeekData)
    );

    let mut truncate = Params::new()
        .with(0, Param::memref_input(f.clone()))
        .with(1, Param::value_input(5, 0));
    storage_call(&d, s, StorageCommand::Truncate, &mut truncate)
        .await
        .unwrap();

    let mut tell = Params::new()
        .with(0, Param::memref_input(f.clone()))
        .with(1, Param::value_output());
    storage_call(&d, s, StorageCommand::Tell, &mut tell).await.unwrap();
    assert_eq!(tell[1].value().unwrap().0, 5);

    let mut remove = Params::new().with(0, Param::memref_input(b"notes".to_vec()));
    assert_eq!(
        storage_call(&d, s, StorageCommand::Remove, &mut remove).await,
        Err(TeeError::AccessConflict)
    );

    let mut close = Params::new().with(0, Param::memref_input(f.clone()));
    storage_call(&d, s, StorageCommand::Close, &mut close).await.unwrap();
    storage_call(&d, s, StorageCommand::Remove, &mut remove).await.unwrap();
    assert_eq!(open_file(&d, s, b"notes", rw).await, Err(TeeError::ItemNotFound));
}

#[tokio::test]
async fn test_remove_refused_while_another_session_holds_file() {
    let d = dispatcher();
    let who = Identity::new(LoginMethod::Identify, TeeUuid::repeated(0x5C));
    let a = d
        .open_session(&ServiceId::Storage.uuid(), who)
        .await
        .unwrap();
    let b = d
        .open_session(&ServiceId::Storage.uuid(), who)
        .await
        .unwrap();

    let f = open_file(&d, a, b"shared", open_flags::WRITE | open_flags::CREATE)
        .await
        .unwrap();
    let mut remove = Params::new().with(0, Param::memref_input(b"shared".to_vec()));
    assert_eq!(
        storage_call(&d, b, StorageCommand::Remove, &mut remove).await,
        Err(TeeError::AccessConflict)
    );

    let mut close = Params::new().with(0, Param::memref_input(f));
    storage_call(&d, a, StorageCommand::Close, &mut close).await.unwrap();
    storage_call(&d, b, StorageCommand::Remove, &mut remove).await.unwrap();

    // a session that goes away releases its files too
    open_file(&d, a, b"again", open_flags::WRITE | open_flags::CREATE)
        .await
        .unwrap();
    let mut remove_again = Params::new().with(0, Param::memref_input(b"again".to_vec()));
    assert_eq!(
        storage_call(&d, b, StorageCommand::Remove, &mut remove_again).await,
        Err(TeeError::AccessConflict)
    );
    d.close_session(a).await.unwrap();
    storage_call(&d, b, StorageCommand::Remove, &mut remove_again)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_storage_access_flags_and_quota() {
    let d = dispatcher();
    let who = Identity::new(LoginMethod::Identify, TeeUuid::repeated(0x5B));
    let s = d
        .open_session(&ServiceId::Storage.uuid(), who)
        .await
        .unwrap();

    let ro = open_file(&d, s, b"ro", open_flags::READ | open_flags::CREATE)
        .await
        .unwrap();
    let mut write = Params::new()
        .with(0, Param::memref_input(ro))
        .with(1, Param::memref_input(b"x".to_vec()));
    assert_eq!(
        storage_call(&d, s, StorageCommand::Write, &mut write).await,
        Err(TeeError::AccessDenied)
    );

    let big = open_file(&d, s, b"big", open_flags::WRITE | open_flags::CREATE)
        .await
        .unwrap();
    let mut too_much = Params::new()
        .with(0, Param::memref_input(big))
        .with(1, Param::memref_input(vec![0u8; 8192]));
    assert_eq!(
        storage_call(&d, s, StorageCommand::Write, &mut too_much).await,
        Err(TeeError::StorageNoSpace)
    );

    let mut close_all = Params::new();
    storage_call(&d, s, StorageCommand::CloseAll, &mut close_all)
        .await
        .unwrap();
    assert_eq!(
        open_file(&d, s, b"big", open_flags::CREATE | open_flags::EXCLUSIVE).await,
        Err(TeeError::AccessConflict)
    );
}

async fn register_notify(d: &Dispatcher, s: SessionId, phys: u32) -> TeeResult<(u32, u32)> {
    let mut params = Params::new()
        .with(0, Param::value_input(phys, 0x2000))
        .with(1, Param::value_output());
    let types = params.param_types();
    d.invoke(s, GlobalCommand::RegisterNotifyMemory.id(), types, &mut params)
        .await?;
    params[1].value()
}

#[tokio::test]
async fn test_global_notify_memory() {
    let d = dispatcher();
    let s = d
        .open_session(&ServiceId::Global.uuid(), Identity::public())
        .await
        .unwrap();

    let (lo, hi) = register_notify(&d, s, SECURE_BASE as u32).await.unwrap();
    let virt = ((hi as u64) << 32) | lo as u64;
    assert!(d.mapper().lookup(virt).is_some());
    assert_eq!(register_notify(&d, s, SECURE_BASE as u32).await, Err(TeeError::AccessConflict));

    let mut unregister = Params::new().with(0, Param::value_input(SECURE_BASE as u32, 0));
    let types = unregister.param_types();
    d.invoke(s, GlobalCommand::UnregisterNotifyMemory.id(), types, &mut unregister)
        .await
        .unwrap();
    assert_eq!(d.mapper().live_mappings(), 0);
    assert_eq!(
        d.invoke(s, GlobalCommand::UnregisterNotifyMemory.id(), types, &mut unregister)
            .await,
        Err(TeeError::ItemNotFound)
    );

    // exception memory is scoped: nothing stays mapped afterwards
    let mut exc = Params::new().with(0, Param::value_input(SECURE_BASE as u32 + 0x4000, 0x1000));
    let types = exc.param_types();
    d.invoke(s, GlobalCommand::AllocExceptionMem.id(), types, &mut exc)
        .await
        .unwrap();
    assert_eq!(d.mapper().live_mappings(), 0);

    let mut time = Params::new().with(0, Param::value_output());
    let types = time.param_types();
    d.invoke(s, GlobalCommand::TeeTime.id(), types, &mut time)
        .await
        .unwrap();
    assert!(time[0].value().unwrap().0 > 0);
}

#[tokio::test]
async fn test_map_unmap_reuses_window() {
    let d = dispatcher();
    let mapper = d.mapper();
    let window = mapper.available();
    for i in 0..64u64 {
        let virt = mapper.map(SECURE_BASE + i * 0x1000, 0x3000).unwrap();
        mapper.unmap(virt).unwrap();
    }
    assert_eq!(mapper.available(), window);
    assert_eq!(mapper.live_mappings(), 0);
}

/// Software engine whose random source can stall or fail
struct FlakyEngine {
    inner: SoftwareEngine,
    stall: Duration,
    fail: bool,
}

impl CryptoEngine for FlakyEngine {
    fn start(
        &self,
        algorithm: Algorithm,
        mode: OperationMode,
        key: Option<&KeyMaterial>,
        iv: &[u8],
    ) -> TeeResult<Box<dyn OperationContext>> {
        self.inner.start(algorithm, mode, key, iv)
    }

    fn random(&self, out: &mut [u8]) -> TeeResult<()> {
        std::thread::sleep(self.stall);
        if self.fail {
            return Err(TeeError::Communication);
        }
        self.inner.random(out)
    }

    fn derive_key(
        &self,
        mode: DeriveMode,
        hash: DeriveHash,
        secret: &[u8],
        other_info: &[u8],
        out_len: usize,
    ) -> TeeResult<Vec<u8>> {
        self.inner.derive_key(mode, hash, secret, other_info, out_len)
    }
}

fn random_params(len: usize) -> (u32, Params) {
    let params = Params::new().with(3, Param::memref_output(len));
    (params.param_types(), params)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fail_fast_reports_busy() {
    let config = TeeConfig {
        busy_policy: BusyPolicy::FailFast,
        ..TeeConfig::default()
    };
    let engine = FlakyEngine {
        inner: SoftwareEngine::new(),
        stall: Duration::from_millis(300),
        fail: false,
    };
    let d = Arc::new(dispatcher_with(config, Arc::new(engine)));
    let s = crypto_session(&d).await;
    let other = crypto_session(&d).await;

    let slow = {
        let d = Arc::clone(&d);
        tokio::spawn(async move {
            let (types, mut params) = random_params(16);
            d.invoke(s, CryptCommand::CipherRnd.id(), types, &mut params)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let h = d.create_object(s, b"late", ObjectType::Data, 0, 0).await;
    assert_eq!(h, Err(TeeError::Busy));
    // a different session is not held up
    d.create_object(other, b"free", ObjectType::Data, 0, 0)
        .await
        .unwrap();

    slow.await.unwrap().unwrap();
    d.create_object(s, b"late", ObjectType::Data, 0, 0)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_fatal_error_poisons_session() {
    let engine = FlakyEngine {
        inner: SoftwareEngine::new(),
        stall: Duration::ZERO,
        fail: true,
    };
    let d = dispatcher_with(TeeConfig::default(), Arc::new(engine));
    let s = crypto_session(&d).await;

    let (types, mut params) = random_params(8);
    assert_eq!(
        d.invoke(s, CryptCommand::CipherRnd.id(), types, &mut params)
            .await,
        Err(TeeError::Communication)
    );
    assert!(TeeError::Communication.is_fatal());
    assert_eq!(
        phase(&d, s, CryptCommand::Sha256, None, Phase::Init, 0, &[], 0).await,
        Err(TeeError::TargetDead)
    );

    d.close_session(s).await.unwrap();
    let fresh = crypto_session(&d).await;
    phase(&d, fresh, CryptCommand::Sha256, None, Phase::Init, 0, &[], 0)
        .await
        .unwrap();
}
