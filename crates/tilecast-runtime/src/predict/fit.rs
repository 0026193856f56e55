use log::warn;
use serde::{Deserialize, Serialize};

use crate::config::{PredictorConfig, TransferCostConfig};
use crate::metrics::{Direction, TransferSample};

/// Quality thresholds a fit is held to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitLimits {
    /// Fits explaining less variance than this get flagged.
    pub r2_floor: f64,
    /// Mean absolute percentage error above this gets flagged.
    pub mape_ceiling: f64,
}

impl FitLimits {
    pub fn from_config(config: &PredictorConfig) -> Self {
        Self {
            r2_floor: config.r2_floor,
            mape_ceiling: config.mape_ceiling,
        }
    }
}

/// A fit that converged but explains the samples poorly.
///
/// Quality problems are advisory: the fitted coefficients are still
/// returned and usable, the warning tells the operator the model shape
/// may not match the fabric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelFitWarning {
    LowRSquared {
        direction: Direction,
        value: f64,
        floor: f64,
    },
    HighMape {
        direction: Direction,
        value: f64,
        ceiling: f64,
    },
}

impl core::fmt::Display for ModelFitWarning {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::LowRSquared {
                direction,
                value,
                floor,
            } => write!(
                f,
                "{direction} fit explains little variance: R^2 {value:.4} under floor {floor:.4}"
            ),
            Self::HighMape {
                direction,
                value,
                ceiling,
            } => write!(
                f,
                "{direction} fit drifts: MAPE {value:.4} over ceiling {ceiling:.4}"
            ),
        }
    }
}

/// Fitted coefficients of one direction and how well they explain the
/// samples they came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionFit {
    pub direction: Direction,
    pub coeffs: TransferCostConfig,
    pub r_squared: f64,
    pub mape: f64,
    /// Samples the fit consumed.
    pub samples: usize,
    pub warnings: Vec<ModelFitWarning>,
}

/// A fit that cannot produce coefficients at all.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FitError {
    #[error(
        "Not enough {direction} samples to fit three coefficients.\nCaused by:\n  got {got}, need at least {need}"
    )]
    TooFewSamples {
        direction: Direction,
        got: usize,
        need: usize,
    },
    #[error(
        "The {direction} samples do not pin down the coefficients.\nCaused by:\n  singular normal equations, vary words and span independently"
    )]
    DegenerateDesign { direction: Direction },
}

/// Ordinary least squares over `cycles = alpha * words + beta * span +
/// gamma`, restricted to the samples of one direction.
pub fn fit_direction(
    direction: Direction,
    samples: &[TransferSample],
    limits: &FitLimits,
) -> Result<DirectionFit, FitError> {
    let rows: Vec<&TransferSample> = samples
        .iter()
        .filter(|sample| sample.direction == direction)
        .collect();
    if rows.len() < 3 {
        return Err(FitError::TooFewSamples {
            direction,
            got: rows.len(),
            need: 3,
        });
    }

    // Normal equations of the design [words, span, 1].
    let mut ata = [[0.0f64; 3]; 3];
    let mut aty = [0.0f64; 3];
    for sample in &rows {
        let x = [sample.words, sample.span, 1.0];
        for i in 0..3 {
            for j in 0..3 {
                ata[i][j] += x[i] * x[j];
            }
            aty[i] += x[i] * sample.cycles;
        }
    }
    let solution = solve3(ata, aty).ok_or(FitError::DegenerateDesign { direction })?;
    let coeffs = TransferCostConfig {
        alpha: solution[0],
        beta: solution[1],
        gamma: solution[2],
    };

    let observed: Vec<f64> = rows.iter().map(|sample| sample.cycles).collect();
    let predicted: Vec<f64> = rows
        .iter()
        .map(|sample| coeffs.alpha * sample.words + coeffs.beta * sample.span + coeffs.gamma)
        .collect();
    let r_squared = tilecast_common::stats::r_squared(&observed, &predicted);
    let mape = tilecast_common::stats::mape(&observed, &predicted);

    let mut warnings = Vec::new();
    if r_squared < limits.r2_floor {
        warn!(
            "{direction} fit over {} samples has R^2 {r_squared:.4}, floor is {:.4}",
            rows.len(),
            limits.r2_floor
        );
        warnings.push(ModelFitWarning::LowRSquared {
            direction,
            value: r_squared,
            floor: limits.r2_floor,
        });
    }
    if mape > limits.mape_ceiling {
        warn!(
            "{direction} fit over {} samples has MAPE {mape:.4}, ceiling is {:.4}",
            rows.len(),
            limits.mape_ceiling
        );
        warnings.push(ModelFitWarning::HighMape {
            direction,
            value: mape,
            ceiling: limits.mape_ceiling,
        });
    }

    Ok(DirectionFit {
        direction,
        coeffs,
        r_squared,
        mape,
        samples: rows.len(),
        warnings,
    })
}

/// Gaussian elimination with partial pivoting on a 3x3 system.
fn solve3(mut a: [[f64; 3]; 3], mut y: [f64; 3]) -> Option<[f64; 3]> {
    let scale = a
        .iter()
        .flatten()
        .fold(0.0f64, |acc, v| acc.max(v.abs()))
        .max(1.0);
    for col in 0..3 {
        let mut pivot = col;
        for row in (col + 1)..3 {
            if a[row][col].abs() > a[pivot][col].abs() {
                pivot = row;
            }
        }
        if a[pivot][col].abs() < scale * 1e-9 {
            return None;
        }
        a.swap(col, pivot);
        y.swap(col, pivot);
        for row in (col + 1)..3 {
            let factor = a[row][col] / a[col][col];
            for k in col..3 {
                a[row][k] -= factor * a[col][k];
            }
            y[row] -= factor * y[col];
        }
    }
    let mut x = [0.0f64; 3];
    for row in (0..3).rev() {
        let mut sum = y[row];
        for k in (row + 1)..3 {
            sum -= a[row][k] * x[k];
        }
        x[row] = sum / a[row][row];
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> FitLimits {
        FitLimits {
            r2_floor: 0.90,
            mape_ceiling: 0.15,
        }
    }

    fn sample(words: f64, span: f64, cycles: f64) -> TransferSample {
        TransferSample {
            direction: Direction::Broadcast,
            words,
            span,
            cycles,
        }
    }

    #[test]
    fn recovers_exact_coefficients() {
        let (alpha, beta, gamma) = (2.5, 12.0, 100.0);
        let points = [
            (100.0, 2.0),
            (200.0, 2.0),
            (100.0, 4.0),
            (400.0, 6.0),
            (800.0, 3.0),
        ];
        let samples: Vec<TransferSample> = points
            .iter()
            .map(|&(w, s)| sample(w, s, alpha * w + beta * s + gamma))
            .collect();

        let fit = fit_direction(Direction::Broadcast, &samples, &limits()).unwrap();
        assert!((fit.coeffs.alpha - alpha).abs() < 1e-6);
        assert!((fit.coeffs.beta - beta).abs() < 1e-6);
        assert!((fit.coeffs.gamma - gamma).abs() < 1e-6);
        assert!(fit.r_squared > 0.999_999);
        assert!(fit.mape < 1e-6);
        assert!(fit.warnings.is_empty());
        assert_eq!(fit.samples, 5);
    }

    #[test]
    fn needs_three_samples() {
        let samples = vec![sample(10.0, 2.0, 50.0), sample(20.0, 3.0, 80.0)];
        assert_eq!(
            fit_direction(Direction::Broadcast, &samples, &limits()),
            Err(FitError::TooFewSamples {
                direction: Direction::Broadcast,
                got: 2,
                need: 3,
            })
        );
    }

    #[test]
    fn other_directions_do_not_count() {
        let mut samples = vec![
            sample(10.0, 2.0, 50.0),
            sample(20.0, 3.0, 80.0),
            sample(30.0, 4.0, 110.0),
        ];
        for s in &mut samples {
            s.direction = Direction::HostToGrid;
        }
        assert!(matches!(
            fit_direction(Direction::Broadcast, &samples, &limits()),
            Err(FitError::TooFewSamples { got: 0, .. })
        ));
    }

    #[test]
    fn constant_span_is_degenerate() {
        // The span column is a multiple of the intercept column, beta and
        // gamma cannot be told apart.
        let samples: Vec<TransferSample> = [100.0, 250.0, 400.0, 950.0]
            .iter()
            .map(|&w| sample(w, 8.0, 2.0 * w + 96.0 + 500.0))
            .collect();
        assert_eq!(
            fit_direction(Direction::Broadcast, &samples, &limits()),
            Err(FitError::DegenerateDesign {
                direction: Direction::Broadcast,
            })
        );
    }

    #[test]
    fn noisy_samples_surface_quality_warnings() {
        let strict = FitLimits {
            r2_floor: 0.999_999,
            mape_ceiling: 1e-6,
        };
        let samples: Vec<TransferSample> = [
            (100.0, 2.0),
            (220.0, 4.0),
            (340.0, 3.0),
            (460.0, 6.0),
            (580.0, 5.0),
        ]
        .iter()
        .enumerate()
        .map(|(i, &(w, s))| {
            let noise = if i % 2 == 0 { 150.0 } else { -150.0 };
            sample(w, s, 2.0 * w + 10.0 * s + 50.0 + noise)
        })
        .collect();

        let fit = fit_direction(Direction::Broadcast, &samples, &strict).unwrap();
        assert!(!fit.warnings.is_empty());
        assert!(fit.warnings.iter().any(|w| matches!(
            w,
            ModelFitWarning::HighMape { .. } | ModelFitWarning::LowRSquared { .. }
        )));
    }
}
