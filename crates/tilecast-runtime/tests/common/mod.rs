#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::prelude::*;
use tilecast_runtime::config::GlobalConfig;
use tilecast_runtime::{GridClient, MatrixId};

/// Default settings without touching the process-wide configuration.
pub fn test_config() -> Arc<GlobalConfig> {
    Arc::new(GlobalConfig::default())
}

/// Deterministic values in `[-1, 1)`.
pub fn random_data(len: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.random_range(-1.0f32..1.0)).collect()
}

/// Row-major `a (m x k)` times `b (k x n)`, accumulated in the same
/// k-ascending order the grid uses so results match bit for bit.
pub fn reference_gemm(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Vec<f32> {
    let mut c = vec![0.0f32; m * n];
    for i in 0..m {
        for p in 0..k {
            let lhs = a[i * k + p];
            for j in 0..n {
                c[i * n + j] += lhs * b[p * n + j];
            }
        }
    }
    c
}

/// Streams random A and B blocking and returns the host copies.
pub fn stream_inputs(client: &GridClient, seed: u64) -> (Vec<f32>, Vec<f32>) {
    let desc = client.descriptor();
    let a = random_data(desc.input_len(MatrixId::A), seed);
    let b = random_data(desc.input_len(MatrixId::B), seed.wrapping_add(1));
    client.stream_in(MatrixId::A, a.clone(), true).unwrap();
    client.stream_in(MatrixId::B, b.clone(), true).unwrap();
    (a, b)
}

/// Polls every couple of milliseconds until `cond` holds or `limit` elapses.
pub fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < limit {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}
