// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for the save path in belegwerk-upload: payload
// digesting and one uncontended save through in-memory collaborators.

use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use belegwerk_core::{ReceiptId, StructuredReceipt, UploadConfig};
use belegwerk_upload::fake::{FakeMetadataStore, FakeObjectStore};
use belegwerk_upload::{MemoryAsset, SaveRequest, UploadCoordinator, sha256_hex};

fn payload() -> Vec<u8> {
    (0..512 * 1024).map(|i| (i % 251) as u8).collect()
}

fn bench_digest(c: &mut Criterion) {
    let bytes = payload();
    c.bench_function("sha256_hex (512 KiB)", |b| {
        b.iter(|| black_box(sha256_hex(black_box(&bytes))));
    });
}

fn bench_save(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("build tokio runtime");
    let coordinator = UploadCoordinator::new(
        Arc::new(FakeObjectStore::new()),
        Arc::new(FakeMetadataStore::new()),
        UploadConfig::default(),
    );
    let asset = MemoryAsset::new(payload());

    c.bench_function("save via primary (fake stores)", |b| {
        b.iter(|| {
            let request = SaveRequest {
                receipt_id: ReceiptId::new(),
                owner_id: "bench".into(),
                receipt: StructuredReceipt::default(),
                raw_text: None,
            };
            let outcome = rt.block_on(coordinator.save(&request, &asset));
            black_box(outcome.result.is_ok());
        });
    });
}

criterion_group!(benches, bench_digest, bench_save);
criterion_main!(benches);
