/// Arithmetic mean, `0.0` for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Coefficient of determination between observed and predicted values.
///
/// A constant observation series is a degenerate case: the result is `1.0`
/// when the predictions match it exactly and `0.0` otherwise.
pub fn r_squared(observed: &[f64], predicted: &[f64]) -> f64 {
    assert_eq!(observed.len(), predicted.len());
    if observed.is_empty() {
        return 1.0;
    }
    let mean_obs = mean(observed);
    let ss_res: f64 = observed
        .iter()
        .zip(predicted)
        .map(|(o, p)| (o - p) * (o - p))
        .sum();
    let ss_tot: f64 = observed.iter().map(|o| (o - mean_obs) * (o - mean_obs)).sum();
    if ss_tot <= f64::EPSILON {
        return if ss_res <= f64::EPSILON { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

/// Mean absolute percentage error, as a fraction (`0.15` is 15%).
///
/// Observations at zero carry no defined percentage and are skipped.
pub fn mape(observed: &[f64], predicted: &[f64]) -> f64 {
    assert_eq!(observed.len(), predicted.len());
    let mut total = 0.0;
    let mut count = 0usize;
    for (o, p) in observed.iter().zip(predicted) {
        if o.abs() <= f64::EPSILON {
            continue;
        }
        total += ((o - p) / o).abs();
        count += 1;
    }
    if count == 0 { 0.0 } else { total / count as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_of_values() {
        assert_eq!(mean(&[1.0, 2.0, 3.0, 4.0]), 2.5);
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn r_squared_perfect_fit() {
        let obs = [10.0, 20.0, 30.0];
        assert_eq!(r_squared(&obs, &obs), 1.0);
    }

    #[test]
    fn r_squared_poor_fit_is_low() {
        let obs = [10.0, 20.0, 30.0];
        let pred = [30.0, 10.0, 20.0];
        assert!(r_squared(&obs, &pred) < 0.0);
    }

    #[test]
    fn mape_skips_zero_observations() {
        let obs = [0.0, 100.0];
        let pred = [5.0, 110.0];
        let err = mape(&obs, &pred);
        assert!((err - 0.1).abs() < 1e-12);
    }
}
