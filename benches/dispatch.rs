use criterion::{criterion_group, criterion_main, Criterion};
use tee_core::crypto::Phase;
use tee_core::param::{decode_type, encode_types};
use tee_core::{CryptCommand, Dispatcher, Identity, Param, Params, ServiceId, TeeConfig};

fn bench_param_types(c: &mut Criterion) {
    c.bench_function("encode_types", |b| {
        b.iter(|| encode_types(criterion::black_box(5), 1, 5, 6))
    });

    let word = encode_types(5, 1, 5, 6);
    c.bench_function("decode_types_all_slots", |b| {
        b.iter(|| (0..4).map(|i| decode_type(criterion::black_box(word), i)).sum::<u32>())
    });
}

fn bench_digest_invoke(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let d = Dispatcher::with_config(TeeConfig::default());
    let s = rt
        .block_on(d.open_session(&ServiceId::Crypto.uuid(), Identity::public()))
        .unwrap();
    let payload = vec![0x5Au8; 1024];

    c.bench_function("sha256_invoke_1k", |b| {
        b.iter(|| {
            rt.block_on(async {
                for (phase, data, cap) in [(Phase::Init, &[][..], 0), (Phase::DoFinal, &payload[..], 32)] {
                    let mut params = Params::new()
                        .with(1, Param::value_input(phase as u32, 0))
                        .with(2, Param::memref_input(data.to_vec()))
                        .with(3, Param::memref_output(cap));
                    let types = params.param_types();
                    d.invoke(s, CryptCommand::Sha256.id(), types, &mut params)
                        .await
                        .unwrap();
                }
            })
        })
    });

    c.bench_function("echo_invoke_256", |b| {
        let e = rt
            .block_on(d.open_session(&ServiceId::Echo.uuid(), Identity::public()))
            .unwrap();
        b.iter(|| {
            let mut params = Params::new()
                .with(0, Param::memref_input(vec![1u8; 256]))
                .with(1, Param::memref_output(256));
            let types = params.param_types();
            rt.block_on(d.invoke(e, tee_core::EchoCommand::SendCmd.id(), types, &mut params))
                .unwrap();
        })
    });
}

criterion_group!(benches, bench_param_types, bench_digest_invoke);
criterion_main!(benches);
