//! Loss functions returning the scalar loss and its gradient w.r.t. the
//! model output.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::tensor::Tensor;

/// Which loss the trainer minimizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Loss {
    /// Cross-entropy against class-probability targets.
    #[default]
    CrossEntropy,
    /// Mean squared error.
    Mse,
}

impl Loss {
    /// `(loss, d loss / d output)`
    pub fn compute(&self, output: &Tensor, targets: &Tensor) -> Result<(f64, Tensor)> {
        match self {
            Loss::CrossEntropy => cross_entropy_loss(output, targets),
            Loss::Mse => mse_loss(output, targets),
        }
    }
}

impl fmt::Display for Loss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Loss::CrossEntropy => f.write_str("cross-entropy"),
            Loss::Mse => f.write_str("mse"),
        }
    }
}

impl FromStr for Loss {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cross-entropy" | "cross_entropy" | "ce" => Ok(Loss::CrossEntropy),
            "mse" => Ok(Loss::Mse),
            other => Err(Error::InvalidArgument {
                arg: "loss",
                reason: format!("unknown loss '{other}', expected 'cross-entropy' or 'mse'"),
            }),
        }
    }
}

/// Cross-entropy with probability targets:
/// `-mean_b sum_c targets[b, c] * log_softmax(logits[b])[c]`
///
/// - `logits`: `[batch, classes]` raw model output
/// - `targets`: `[batch, classes]` class probabilities (not required to sum to 1)
///
/// With a single class `log_softmax` is identically zero, so the loss and
/// its gradient are zero whatever the inputs.
pub fn cross_entropy_loss(logits: &Tensor, targets: &Tensor) -> Result<(f64, Tensor)> {
    logits.check_same_shape(targets)?;
    let (batch, classes) = logits.dims2()?;
    if batch == 0 {
        return Err(Error::InvalidArgument {
            arg: "logits",
            reason: "empty batch".to_string(),
        });
    }

    let mut loss = 0.0f64;
    let mut grad = Vec::with_capacity(batch * classes);
    for i in 0..batch {
        let z = logits.row(i)?;
        let t = targets.row(i)?;

        // Stable log-sum-exp
        let max = z.iter().copied().fold(f32::NEG_INFINITY, f32::max) as f64;
        let sum_exp: f64 = z.iter().map(|&v| (v as f64 - max).exp()).sum();
        let log_norm = max + sum_exp.ln();
        let t_sum: f64 = t.iter().map(|&v| v as f64).sum();

        for c in 0..classes {
            let log_p = z[c] as f64 - log_norm;
            loss -= t[c] as f64 * log_p;
            let p = log_p.exp();
            grad.push(((p * t_sum - t[c] as f64) / batch as f64) as f32);
        }
    }

    let grad = Tensor::from_vec(grad, &[batch, classes])?;
    Ok((loss / batch as f64, grad))
}

/// Mean squared error loss: `mean((predictions - targets)^2)`
pub fn mse_loss(predictions: &Tensor, targets: &Tensor) -> Result<(f64, Tensor)> {
    predictions.check_same_shape(targets)?;
    let n = predictions.numel();
    if n == 0 {
        return Err(Error::InvalidArgument {
            arg: "predictions",
            reason: "empty tensor".to_string(),
        });
    }

    let mut loss = 0.0f64;
    let grad: Vec<f32> = predictions
        .as_slice()
        .iter()
        .zip(targets.as_slice())
        .map(|(&p, &t)| {
            let d = (p - t) as f64;
            loss += d * d;
            (2.0 * d / n as f64) as f32
        })
        .collect();

    let grad = Tensor::from_vec(grad, predictions.shape())?;
    Ok((loss / n as f64, grad))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cross_entropy_one_hot() {
        // logits [0, ln 3] -> softmax [0.25, 0.75]
        let logits = Tensor::from_slice(&[0.0, 3f32.ln()], &[1, 2]).unwrap();
        let targets = Tensor::from_slice(&[0.0, 1.0], &[1, 2]).unwrap();
        let (loss, grad) = cross_entropy_loss(&logits, &targets).unwrap();
        assert!((loss - (-(0.75f64).ln())).abs() < 1e-6);
        let g = grad.as_slice();
        assert!((g[0] - 0.25).abs() < 1e-6);
        assert!((g[1] + 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_cross_entropy_single_class_is_zero() {
        let logits = Tensor::from_slice(&[0.3, -2.0, 5.0], &[3, 1]).unwrap();
        let targets = Tensor::from_slice(&[0.9, 0.1, 0.5], &[3, 1]).unwrap();
        let (loss, grad) = cross_entropy_loss(&logits, &targets).unwrap();
        assert!(loss.abs() < 1e-9);
        assert!(grad.as_slice().iter().all(|v| v.abs() < 1e-7));
    }

    #[test]
    fn test_mse() {
        let p = Tensor::from_slice(&[1.0, 2.0], &[2, 1]).unwrap();
        let t = Tensor::from_slice(&[0.0, 4.0], &[2, 1]).unwrap();
        let (loss, grad) = mse_loss(&p, &t).unwrap();
        assert!((loss - 2.5).abs() < 1e-9);
        assert_eq!(grad.as_slice(), &[1.0, -2.0]);
    }

    #[test]
    fn test_shape_mismatch() {
        let p = Tensor::zeros(&[2, 1]);
        let t = Tensor::zeros(&[1, 2]);
        assert!(mse_loss(&p, &t).is_err());
        assert!(cross_entropy_loss(&p, &t).is_err());
    }

    #[test]
    fn test_parse() {
        assert_eq!("mse".parse::<Loss>().unwrap(), Loss::Mse);
        assert_eq!("cross-entropy".parse::<Loss>().unwrap(), Loss::CrossEntropy);
        assert!("hinge".parse::<Loss>().is_err());
        assert_eq!(Loss::default().to_string(), "cross-entropy");
    }
}
