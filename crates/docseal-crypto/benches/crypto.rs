use std::sync::Arc;

use docseal_crypto::{
    CipherBackend, DerivedKey, FileEncryptionService, KdfParams, MasterSecret, PortableBackend,
};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

fn bench_seal(bencher: divan::Bencher, backend: &dyn CipherBackend, size: usize) {
    let key = DerivedKey::from_bytes([0xABu8; 32]);
    let nonce = backend.generate_nonce();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            backend
                .seal(divan::black_box(&data), divan::black_box(&key), &nonce)
                .unwrap()
        });
}

fn bench_open(bencher: divan::Bencher, backend: &dyn CipherBackend, size: usize) {
    let key = DerivedKey::from_bytes([0xABu8; 32]);
    let nonce = backend.generate_nonce();
    let (ciphertext, tag) = backend.seal(&make_data(size), &key, &nonce).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            backend
                .open(divan::black_box(&ciphertext), &tag, &key, &nonce)
                .unwrap()
        });
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn seal_portable(bencher: divan::Bencher, size: usize) {
    bench_seal(bencher, &PortableBackend::default(), size);
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn open_portable(bencher: divan::Bencher, size: usize) {
    bench_open(bencher, &PortableBackend::default(), size);
}

#[cfg(feature = "native")]
#[divan::bench(args = [1024, 65536, 1048576])]
fn seal_native(bencher: divan::Bencher, size: usize) {
    bench_seal(bencher, &docseal_crypto::NativeBackend, size);
}

#[cfg(feature = "native")]
#[divan::bench(args = [1024, 65536, 1048576])]
fn open_native(bencher: divan::Bencher, size: usize) {
    bench_open(bencher, &docseal_crypto::NativeBackend, size);
}

/// Full encrypt path including both KDF steps, at production PBKDF2 cost.
#[divan::bench]
fn encrypt_file_portable(bencher: divan::Bencher) {
    let service = FileEncryptionService::new(
        Arc::new(PortableBackend::new(KdfParams::default())),
        MasterSecret::new(vec![0x11u8; 32]),
    );
    let data = make_data(65536);
    bencher.bench(|| service.encrypt(divan::black_box(&data), "bench-tenant").unwrap());
}

fn main() {
    divan::main();
}
