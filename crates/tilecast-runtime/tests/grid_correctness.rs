mod common;

use common::{random_data, reference_gemm, stream_inputs, test_config};
use pretty_assertions::assert_eq;
use tilecast_common::tolerance::assert_allclose;
use tilecast_runtime::{GridClient, GridDescriptor, MatrixId};

fn run_main(p: usize, mt: usize, kt: usize, nt: usize, seed: u64) {
    let desc = GridDescriptor::square(p, mt, kt, nt);
    let client = GridClient::init_with_config(desc, test_config()).unwrap();
    let (a, b) = stream_inputs(&client, seed);
    client.launch("main").unwrap();
    let c = client.read_back(MatrixId::C).unwrap();

    let (m, k) = desc.host_dims(MatrixId::A);
    let (_, n) = desc.host_dims(MatrixId::B);
    assert_allclose(&c, &reference_gemm(&a, &b, m, k, n), 1e-5, 1e-6);
}

fn run_bias(p: usize, mt: usize, kt: usize, nt: usize, seed: u64) {
    let desc = GridDescriptor::square(p, mt, kt, nt);
    let client = GridClient::init_with_config(desc, test_config()).unwrap();
    let (a, b) = stream_inputs(&client, seed);
    let bias = random_data(desc.input_len(MatrixId::Bias), seed.wrapping_add(2));
    client.stream_in(MatrixId::Bias, bias.clone(), true).unwrap();
    client.launch("main_bias").unwrap();
    let c = client.read_back(MatrixId::C).unwrap();

    let (m, k) = desc.host_dims(MatrixId::A);
    let (_, n) = desc.host_dims(MatrixId::B);
    let mut expected = reference_gemm(&a, &b, m, k, n);
    for i in 0..m {
        for j in 0..n {
            expected[i * n + j] += bias[i];
        }
    }
    assert_allclose(&c, &expected, 1e-5, 1e-6);
}

#[test]
fn two_by_two_matches_the_host_gemm() {
    run_main(2, 3, 4, 5, 11);
}

#[test]
fn every_small_grid_matches_the_host_gemm() {
    for p in 1..=4 {
        run_main(p, 2, 3, 2, 20 + p as u64);
    }
}

#[test]
fn skewed_tiles_match_the_host_gemm() {
    run_main(2, 7, 2, 9, 31);
    run_main(3, 1, 6, 1, 32);
}

#[test]
fn the_bias_entry_adds_the_row_vector() {
    run_bias(2, 3, 2, 4, 41);
}

#[test]
fn a_single_node_handles_the_bias_epilogue_too() {
    run_bias(1, 4, 3, 5, 47);
}

#[test]
fn a_relaunch_reuses_the_streamed_tiles_bit_for_bit() {
    let desc = GridDescriptor::square(3, 2, 3, 2);
    let client = GridClient::init_with_config(desc, test_config()).unwrap();
    stream_inputs(&client, 53);
    client.launch("main").unwrap();
    let first = client.read_back(MatrixId::C).unwrap();
    client.launch("main").unwrap();
    let second = client.read_back(MatrixId::C).unwrap();
    assert_eq!(first, second);
}

#[test]
fn the_bias_can_stream_after_a_plain_run() {
    let desc = GridDescriptor::square(2, 2, 2, 2);
    let client = GridClient::init_with_config(desc, test_config()).unwrap();
    stream_inputs(&client, 59);
    client.launch("main").unwrap();
    let plain = client.read_back(MatrixId::C).unwrap();

    let bias = random_data(desc.input_len(MatrixId::Bias), 61);
    client.stream_in(MatrixId::Bias, bias.clone(), true).unwrap();
    client.launch("main_bias").unwrap();
    let biased = client.read_back(MatrixId::C).unwrap();

    let (m, _) = desc.host_dims(MatrixId::C);
    let n = biased.len() / m;
    let expected: Vec<f32> = plain
        .iter()
        .enumerate()
        .map(|(idx, value)| value + bias[idx / n])
        .collect();
    assert_eq!(biased, expected);
}

#[test]
fn a_blocking_launch_returns_after_the_run_retired() {
    let desc = GridDescriptor::square(2, 3, 2, 3);
    let client = GridClient::init_with_config(desc, test_config()).unwrap();
    let (a, b) = stream_inputs(&client, 71);
    client.launch_blocking("main").unwrap();
    // The run already retired, so metrics are available before any read back.
    assert!(client.metrics().is_ok());
    let c = client.read_back(MatrixId::C).unwrap();

    let (m, k) = desc.host_dims(MatrixId::A);
    let (_, n) = desc.host_dims(MatrixId::B);
    assert_allclose(&c, &reference_gemm(&a, &b, m, k, n), 1e-5, 1e-6);
}

#[test]
fn inputs_read_back_exactly() {
    let desc = GridDescriptor::square(2, 3, 4, 5);
    let client = GridClient::init_with_config(desc, test_config()).unwrap();
    let (a, b) = stream_inputs(&client, 67);
    assert_eq!(client.read_back(MatrixId::A).unwrap(), a);
    assert_eq!(client.read_back(MatrixId::B).unwrap(), b);
}
