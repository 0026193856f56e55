/// Default relative tolerance for dense result comparison.
pub const RTOL: f64 = 1e-5;
/// Default absolute tolerance for dense result comparison.
pub const ATOL: f64 = 1e-6;

/// First element pair that violates `|actual - expected| <= atol + rtol * |expected|`.
#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    /// Flat index of the offending element.
    pub index: usize,
    /// Observed value.
    pub actual: f64,
    /// Reference value.
    pub expected: f64,
}

/// Scan two equally sized slices for the first out-of-tolerance element.
pub fn first_mismatch(
    actual: &[f32],
    expected: &[f32],
    rtol: f64,
    atol: f64,
) -> Option<Mismatch> {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (index, (a, e)) in actual.iter().zip(expected).enumerate() {
        let (a, e) = (*a as f64, *e as f64);
        if (a - e).abs() > atol + rtol * e.abs() {
            return Some(Mismatch {
                index,
                actual: a,
                expected: e,
            });
        }
    }
    None
}

/// Panic with a located report when any element is out of tolerance.
#[track_caller]
pub fn assert_allclose(actual: &[f32], expected: &[f32], rtol: f64, atol: f64) {
    if let Some(m) = first_mismatch(actual, expected, rtol, atol) {
        panic!(
            "element {} out of tolerance: actual {} expected {} (rtol {rtol} atol {atol})",
            m.index, m.actual, m.expected
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_tolerance() {
        let expected = [1.0f32, -2.0, 3.0];
        let actual = [1.000_001f32, -2.000_01, 3.0];
        assert_eq!(first_mismatch(&actual, &expected, RTOL, ATOL), None);
    }

    #[test]
    fn reports_first_violation() {
        let expected = [1.0f32, 2.0, 3.0];
        let actual = [1.0f32, 2.5, 9.0];
        let m = first_mismatch(&actual, &expected, RTOL, ATOL).unwrap();
        assert_eq!(m.index, 1);
    }

    #[test]
    #[should_panic(expected = "out of tolerance")]
    fn assert_panics_on_violation() {
        assert_allclose(&[1.0], &[2.0], RTOL, ATOL);
    }
}
