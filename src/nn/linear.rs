//! Fully-connected layer with analytic gradients.

use rand::Rng;

use crate::error::{Error, Result};
use crate::nn::module::{Module, Parameter};
use crate::tensor::Tensor;

/// Dense linear layer: output = input @ weight^T + bias
///
/// `weight` is `[out_features, in_features]`, `bias` is `[out_features]`.
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Parameter,
    bias: Parameter,
}

impl Linear {
    /// Weights and bias drawn from `U(-1/sqrt(in), 1/sqrt(in))`.
    pub fn new<G: Rng + ?Sized>(in_features: usize, out_features: usize, rng: &mut G) -> Result<Self> {
        if in_features == 0 || out_features == 0 {
            return Err(Error::InvalidArgument {
                arg: "features",
                reason: format!("in={in_features} out={out_features} must both be > 0"),
            });
        }
        let bound = 1.0 / (in_features as f32).sqrt();
        let weight = Tensor::uniform(&[out_features, in_features], -bound, bound, rng);
        let bias = Tensor::uniform(&[out_features], -bound, bound, rng);
        Self::from_tensors(weight, bias)
    }

    /// Create from existing tensors.
    pub fn from_tensors(weight: Tensor, bias: Tensor) -> Result<Self> {
        let (out_features, _) = weight.dims2()?;
        if bias.shape() != [out_features] {
            return Err(Error::ShapeMismatch {
                expected: vec![out_features],
                got: bias.shape().to_vec(),
            });
        }
        Ok(Self {
            weight: Parameter::new(weight),
            bias: Parameter::new(bias),
        })
    }

    pub fn in_features(&self) -> usize {
        self.weight.value.shape()[1]
    }

    pub fn out_features(&self) -> usize {
        self.weight.value.shape()[0]
    }

    pub fn weight(&self) -> &Parameter {
        &self.weight
    }

    pub fn bias(&self) -> &Parameter {
        &self.bias
    }

    fn check_input(&self, input: &Tensor) -> Result<usize> {
        let (batch, features) = input.dims2()?;
        if features != self.in_features() {
            return Err(Error::ShapeMismatch {
                expected: vec![batch, self.in_features()],
                got: input.shape().to_vec(),
            });
        }
        Ok(batch)
    }
}

impl Module for Linear {
    fn parameters(&self) -> Vec<(String, &Parameter)> {
        vec![
            ("bias".to_string(), &self.bias),
            ("weight".to_string(), &self.weight),
        ]
    }

    fn parameters_mut(&mut self) -> Vec<(String, &mut Parameter)> {
        vec![
            ("bias".to_string(), &mut self.bias),
            ("weight".to_string(), &mut self.weight),
        ]
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let batch = self.check_input(input)?;
        let (out_f, in_f) = (self.out_features(), self.in_features());
        let w = self.weight.value.as_slice();
        let b = self.bias.value.as_slice();

        let mut out = Vec::with_capacity(batch * out_f);
        for i in 0..batch {
            let x = input.row(i)?;
            for o in 0..out_f {
                let row = &w[o * in_f..(o + 1) * in_f];
                let dot: f32 = row.iter().zip(x).map(|(a, b)| a * b).sum();
                out.push(dot + b[o]);
            }
        }
        Tensor::from_vec(out, &[batch, out_f])
    }

    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> Result<Tensor> {
        let batch = self.check_input(input)?;
        let (out_f, in_f) = (self.out_features(), self.in_features());
        if grad_output.shape() != [batch, out_f] {
            return Err(Error::ShapeMismatch {
                expected: vec![batch, out_f],
                got: grad_output.shape().to_vec(),
            });
        }

        let w = self.weight.value.as_slice();
        let mut grad_input = vec![0.0f32; batch * in_f];
        let dw = self.weight.grad.as_mut_slice();
        let db = self.bias.grad.as_mut_slice();

        for i in 0..batch {
            let x = input.row(i)?;
            let g = grad_output.row(i)?;
            let gx = &mut grad_input[i * in_f..(i + 1) * in_f];
            for o in 0..out_f {
                db[o] += g[o];
                let dw_row = &mut dw[o * in_f..(o + 1) * in_f];
                let w_row = &w[o * in_f..(o + 1) * in_f];
                for k in 0..in_f {
                    dw_row[k] += g[o] * x[k];
                    gx[k] += g[o] * w_row[k];
                }
            }
        }

        Tensor::from_vec(grad_input, &[batch, in_f])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn layer() -> Linear {
        // W = [[1, 2], [3, 4], [5, 6]], b = [0.1, 0.2, 0.3]
        let w = Tensor::from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2]).unwrap();
        let b = Tensor::from_slice(&[0.1, 0.2, 0.3], &[3]).unwrap();
        Linear::from_tensors(w, b).unwrap()
    }

    #[test]
    fn test_forward() {
        let l = layer();
        let x = Tensor::from_slice(&[1.0, 1.0, 0.0, 2.0], &[2, 2]).unwrap();
        let y = l.forward(&x).unwrap();
        assert_eq!(y.shape(), &[2, 3]);
        let expected = [3.1, 7.2, 11.3, 4.1, 8.2, 12.3];
        for (a, b) in y.as_slice().iter().zip(expected) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_backward_accumulates() {
        let mut l = layer();
        let x = Tensor::from_slice(&[1.0, 2.0], &[1, 2]).unwrap();
        let g = Tensor::from_slice(&[1.0, 0.0, -1.0], &[1, 3]).unwrap();

        let gx = l.backward(&x, &g).unwrap();
        // gx = g @ W = [1 - 5, 2 - 6]
        assert_eq!(gx.as_slice(), &[-4.0, -4.0]);
        assert_eq!(l.weight().grad.as_slice(), &[1.0, 2.0, 0.0, 0.0, -1.0, -2.0]);
        assert_eq!(l.bias().grad.as_slice(), &[1.0, 0.0, -1.0]);

        l.backward(&x, &g).unwrap();
        assert_eq!(l.bias().grad.as_slice(), &[2.0, 0.0, -2.0]);

        l.zero_grad();
        assert!(l.weight().grad.as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_init_bound() {
        let mut rng = StdRng::seed_from_u64(0);
        let l = Linear::new(20, 1, &mut rng).unwrap();
        let bound = 1.0 / 20f32.sqrt();
        assert_eq!(l.num_parameters(), 21);
        assert!(l.weight().value.as_slice().iter().all(|v| v.abs() <= bound));
    }

    #[test]
    fn test_shape_checks() {
        let mut l = layer();
        let bad = Tensor::zeros(&[2, 3]);
        assert!(l.forward(&bad).is_err());
        let x = Tensor::zeros(&[2, 2]);
        assert!(l.backward(&x, &Tensor::zeros(&[2, 2])).is_err());
    }

    #[test]
    fn test_state_dict_round_trip() {
        let mut rng = StdRng::seed_from_u64(1);
        let src = Linear::new(4, 2, &mut rng).unwrap();
        let mut dst = Linear::new(4, 2, &mut rng).unwrap();
        let state = src.state_dict();
        assert_eq!(state.keys().collect::<Vec<_>>(), vec!["bias", "weight"]);

        dst.load_state_dict(&state).unwrap();
        assert_eq!(dst.weight().value, src.weight().value);

        let mut missing = state.clone();
        missing.remove("bias");
        assert!(dst.load_state_dict(&missing).is_err());

        let mut wrong = state;
        wrong.insert("bias".to_string(), Tensor::zeros(&[3]));
        assert!(dst.load_state_dict(&wrong).is_err());
    }
}
