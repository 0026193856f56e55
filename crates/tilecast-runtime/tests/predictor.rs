mod common;

use common::{stream_inputs, test_config};
use tilecast_runtime::config::GlobalConfig;
use tilecast_runtime::metrics::Direction;
use tilecast_runtime::predict::{fit_direction, CalibrationSweep, FitLimits};
use tilecast_runtime::{CostModel, EntryPoint, GridClient, GridDescriptor, MatrixId};

#[test]
fn the_prediction_reproduces_a_measured_run() {
    for p in [2usize, 3] {
        let desc = GridDescriptor::square(p, 4, 3, 5);
        let client = GridClient::init_with_config(desc, test_config()).unwrap();
        stream_inputs(&client, 90 + p as u64);
        client.launch("main").unwrap();
        let _ = client.read_back(MatrixId::C).unwrap();

        let measured = client.metrics().unwrap();
        let predicted = client.predict(&desc);
        assert_eq!(predicted.phases, measured.phases);
        assert_eq!(predicted.total_cycles, measured.total_cycles);
        assert_eq!(predicted.pipeline, measured.pipeline);
    }
}

#[test]
fn a_single_node_prediction_is_one_bare_update() {
    let model = CostModel::from_config(&GlobalConfig::default().cost);
    let desc = GridDescriptor::square(1, 4, 4, 4);
    let prediction = model.predict_run(&desc, EntryPoint::Main, 2);
    let update = model.compute_step_cycles(desc.tile);
    assert_eq!(prediction.phases.steps_total, update.round() as u64);
}

#[test]
fn the_predicted_wall_grows_with_every_dimension() {
    let model = CostModel::from_config(&GlobalConfig::default().cost);
    let base = GridDescriptor::square(2, 4, 4, 4);
    let floor = model.predict_run(&base, EntryPoint::Main, 2).phases.steps_total;
    for desc in [
        GridDescriptor::square(3, 4, 4, 4),
        GridDescriptor::square(2, 8, 4, 4),
        GridDescriptor::square(2, 4, 8, 4),
        GridDescriptor::square(2, 4, 4, 8),
    ] {
        let grown = model.predict_run(&desc, EntryPoint::Main, 2).phases.steps_total;
        assert!(grown >= floor, "{desc} predicted below the base shape");
    }
}

#[test]
fn calibration_recovers_the_ground_truth_surfaces() {
    let config = test_config();
    let report = CalibrationSweep::standard().run(&config).unwrap();
    assert!(report.warnings().next().is_none());

    let truth = CostModel::from_config(&config.cost);
    for direction in [
        Direction::HostToGrid,
        Direction::GridToHost,
        Direction::Broadcast,
    ] {
        let expected = truth.coeffs(direction);
        let fitted = report.fitted.model.coeffs(direction);
        assert!(
            (expected.alpha - fitted.alpha).abs() < 1e-6,
            "{direction} alpha drifted: {} vs {}",
            expected.alpha,
            fitted.alpha
        );
        assert!((expected.beta - fitted.beta).abs() < 1e-6);
        assert!((expected.gamma - fitted.gamma).abs() < 1e-6);
    }
    for fit in &report.fitted.fits {
        assert!(fit.r_squared > 0.999_999, "{} fit too loose", fit.direction);
    }
}

#[test]
fn fitting_the_same_samples_twice_is_identical() {
    let config = test_config();
    let report = CalibrationSweep::standard().run(&config).unwrap();
    let limits = FitLimits {
        r2_floor: 0.9,
        mape_ceiling: 0.15,
    };
    let once = fit_direction(Direction::Broadcast, &report.samples, &limits).unwrap();
    let again = fit_direction(Direction::Broadcast, &report.samples, &limits).unwrap();
    assert_eq!(once, again);
}
