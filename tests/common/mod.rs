// tests/common/mod.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Shared setup for driver integration tests: a `CosDriver` backed by the
// in-memory bucket store, plus deterministic payloads.

#![allow(dead_code)]

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use cosblob::{CopyConfig, CosDriver, DriverParameters, MemoryClient, ObjectClient};
use cosblob::constants::MIN_CHUNK_SIZE;

pub const MIB: u64 = 1 << 20;

/// Driver parameters with small copy thresholds so multipart copies can be
/// exercised without hundreds of MiB of test data.
pub fn small_params(root: &str) -> DriverParameters {
    let mut p = DriverParameters::new("id", "key", "test-bucket", "ap-test");
    p.root_directory = root.to_string();
    p.chunk_size = MIN_CHUNK_SIZE;
    p.copy = CopyConfig { threshold: 4 * MIB, chunk_size: MIB, max_concurrency: 4 };
    p
}

pub fn driver_with(params: DriverParameters, mem: MemoryClient) -> (CosDriver, Arc<MemoryClient>) {
    let mem = Arc::new(mem);
    let client: Arc<dyn ObjectClient> = mem.clone();
    (CosDriver::new(&params, client), mem)
}

pub fn driver(root: &str) -> (CosDriver, Arc<MemoryClient>) {
    driver_with(small_params(root), MemoryClient::new("test-bucket"))
}

pub fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut buf = vec![0u8; len];
    rng.fill_bytes(&mut buf);
    buf
}
