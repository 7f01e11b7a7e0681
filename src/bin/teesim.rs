//! teesim: drive the TEE core from the command line
//!
//! Commands:
//!   teesim demo            run an AES key scenario and a digest
//!   teesim digest <text>   SHA-256 of text through a crypto session
//!   teesim uuid <service>  print a service UUID
//!   teesim config [path]   load (or default) and print a config

use std::env;
use tee_core::crypto::{Phase, CIPHER_ENCRYPT};
use tee_core::object::usage;
use tee_core::{
    Attribute, AttributeId, CryptCommand, Dispatcher, Identity, ObjectHandle, ObjectType, Param,
    Params, ServiceId, SessionId, TeeConfig, TeeResult,
};

fn print_usage() {
    println!(
        r#"
teesim: TEE internal API simulator

Usage: teesim <command> [options]

Commands:
  demo                     Open a crypto session, encrypt one AES block, hash a string
  digest  <text>           SHA-256 of <text> computed inside a crypto session
  uuid    <service>        Print the UUID of global|echo|storage|crypto
  config  [path]           Print the effective JSON config

Examples:
  teesim digest "hello world"
  teesim uuid storage
  teesim config tee.json
"#
    );
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return;
    }

    match args[1].as_str() {
        "demo" => cmd_demo().await,
        "digest" => cmd_digest(&args[2..]).await,
        "uuid" => cmd_uuid(&args[2..]),
        "config" => cmd_config(&args[2..]),
        "help" | "--help" | "-h" => print_usage(),
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
        }
    }
}

/// One phase of a stateful crypto command
async fn crypt_phase(
    d: &Dispatcher,
    session: SessionId,
    cmd: CryptCommand,
    key: Option<ObjectHandle>,
    phase: Phase,
    arg: u32,
    data: &[u8],
    capacity: usize,
) -> TeeResult<Vec<u8>> {
    let key_ref = match key {
        Some(handle) => Param::memref_input(handle.to_bytes().to_vec()),
        None => Param::None,
    };
    let mut params = Params::new()
        .with(0, key_ref)
        .with(1, Param::value_input(phase as u32, arg))
        .with(2, Param::memref_input(data.to_vec()))
        .with(3, Param::memref_output(capacity));
    let types = params.param_types();
    d.invoke(session, cmd.id(), types, &mut params).await?;
    Ok(params[3].output_bytes().map(<[u8]>::to_vec).unwrap_or_default())
}

async fn sha256(d: &Dispatcher, session: SessionId, text: &[u8]) -> TeeResult<Vec<u8>> {
    crypt_phase(d, session, CryptCommand::Sha256, None, Phase::Init, 0, &[], 0).await?;
    crypt_phase(d, session, CryptCommand::Sha256, None, Phase::DoFinal, 0, text, 32).await
}

async fn cmd_digest(args: &[String]) {
    let text = args.join(" ");
    let d = Dispatcher::with_config(TeeConfig::default());
    let result = async {
        let s = d
            .open_session(&ServiceId::Crypto.uuid(), Identity::public())
            .await?;
        let digest = sha256(&d, s, text.as_bytes()).await?;
        d.close_session(s).await?;
        Ok::<_, tee_core::TeeError>(digest)
    }
    .await;

    match result {
        Ok(digest) => println!("{}", hex::encode(digest)),
        Err(e) => eprintln!("digest failed: {} ({:#010x})", e, e.code()),
    }
}

async fn cmd_demo() {
    println!("Step 1: Opening a crypto session...");
    println!("{}", "-".repeat(60));
    let d = Dispatcher::with_config(TeeConfig::default());
    let s = match d
        .open_session(&ServiceId::Crypto.uuid(), Identity::public())
        .await
    {
        Ok(s) => s,
        Err(e) => {
            eprintln!("  open failed: {}", e);
            return;
        }
    };
    println!("  session {} on {}", s, ServiceId::Crypto.uuid());

    println!("\nStep 2: AES-128-CBC over one block...");
    println!("{}", "-".repeat(60));
    let key: Vec<u8> = (0u8..16).collect();
    let plaintext = hex::decode("00112233445566778899aabbccddeeff").unwrap_or_default();
    let cipher = async {
        let h = d
            .create_object(s, b"demo-key", ObjectType::Aes, 16, usage::ENCRYPT | usage::DECRYPT)
            .await?;
        d.populate_object(s, h, &[Attribute::reference(AttributeId::SecretValue, key)])
            .await?;
        let cmd = CryptCommand::CipherAesCbc;
        crypt_phase(&d, s, cmd, Some(h), Phase::Init, CIPHER_ENCRYPT, &[0u8; 16], 0).await?;
        let mut out = crypt_phase(&d, s, cmd, Some(h), Phase::Update, 0, &plaintext, 32).await?;
        out.extend(crypt_phase(&d, s, cmd, Some(h), Phase::DoFinal, 0, &[], 32).await?);
        let info = d.object_info(s, h).await?;
        println!(
            "  key object: {:?}, {} of {} bytes, usage {:#x}",
            info.object_type, info.object_size, info.max_object_size, info.object_usage
        );
        Ok::<_, tee_core::TeeError>(out)
    }
    .await;
    match cipher {
        Ok(ct) => println!("  ciphertext: {}", hex::encode(ct)),
        Err(e) => eprintln!("  cipher failed: {}", e),
    }

    println!("\nStep 3: SHA-256 digest...");
    println!("{}", "-".repeat(60));
    match sha256(&d, s, b"abc").await {
        Ok(digest) => println!("  sha256(\"abc\") = {}", hex::encode(digest)),
        Err(e) => eprintln!("  digest failed: {}", e),
    }

    println!("\nStep 4: Closing...");
    println!("{}", "-".repeat(60));
    d.shutdown().await;
    println!("  all sessions closed");
}

fn cmd_uuid(args: &[String]) {
    let Some(name) = args.first() else {
        eprintln!("Usage: teesim uuid <global|echo|storage|crypto>");
        return;
    };
    match ServiceId::from_name(name) {
        Some(service) => println!("{}", service.uuid()),
        None => eprintln!("Unknown service: {}", name),
    }
}

fn cmd_config(args: &[String]) {
    let config = match args.first() {
        Some(path) => match TeeConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load {}: {}", path, e);
                return;
            }
        },
        None => TeeConfig::default(),
    };
    match config.to_json() {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to render config: {}", e),
    }
}
