//! Dense row-major `f32` tensor on the CPU.
//!
//! Only what a single fully-connected layer, its loss and SGD need:
//! construction, shape queries, row access and a few in-place
//! element-wise updates.

use rand::Rng;

use crate::error::{Error, Result};

/// Dense row-major `f32` tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: Vec<f32>,
    shape: Vec<usize>,
}

impl Tensor {
    /// Build a tensor from a flat slice. `data.len()` must equal the shape's
    /// element count.
    pub fn from_slice(data: &[f32], shape: &[usize]) -> Result<Self> {
        Self::from_vec(data.to_vec(), shape)
    }

    /// Build a tensor taking ownership of `data`.
    pub fn from_vec(data: Vec<f32>, shape: &[usize]) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if data.len() != numel {
            return Err(Error::InvalidArgument {
                arg: "data",
                reason: format!(
                    "{} elements do not fill shape {:?} ({numel} elements)",
                    data.len(),
                    shape
                ),
            });
        }
        Ok(Self {
            data,
            shape: shape.to_vec(),
        })
    }

    pub fn zeros(shape: &[usize]) -> Self {
        let numel = shape.iter().product();
        Self {
            data: vec![0.0; numel],
            shape: shape.to_vec(),
        }
    }

    /// Samples uniformly from `[0, 1)`.
    pub fn rand<G: Rng + ?Sized>(shape: &[usize], rng: &mut G) -> Self {
        Self::uniform(shape, 0.0, 1.0, rng)
    }

    /// Samples uniformly from `[low, high)`.
    pub fn uniform<G: Rng + ?Sized>(shape: &[usize], low: f32, high: f32, rng: &mut G) -> Self {
        let numel: usize = shape.iter().product();
        let data = (0..numel)
            .map(|_| low + (high - low) * rng.random::<f32>())
            .collect();
        Self {
            data,
            shape: shape.to_vec(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.data.clone()
    }

    /// Row `i` of a rank-2 tensor.
    pub fn row(&self, i: usize) -> Result<&[f32]> {
        let (rows, cols) = self.dims2()?;
        if i >= rows {
            return Err(Error::InvalidArgument {
                arg: "row",
                reason: format!("row {i} out of bounds for {rows} rows"),
            });
        }
        Ok(&self.data[i * cols..(i + 1) * cols])
    }

    /// `(rows, cols)` of a rank-2 tensor.
    pub fn dims2(&self) -> Result<(usize, usize)> {
        match self.shape.as_slice() {
            [rows, cols] => Ok((*rows, *cols)),
            other => Err(Error::InvalidArgument {
                arg: "tensor",
                reason: format!("expected 2 dims, got shape {other:?}"),
            }),
        }
    }

    /// Fail unless `other` has exactly this tensor's shape.
    pub fn check_same_shape(&self, other: &Tensor) -> Result<()> {
        if self.shape != other.shape {
            return Err(Error::ShapeMismatch {
                expected: self.shape.clone(),
                got: other.shape.clone(),
            });
        }
        Ok(())
    }

    /// `self += alpha * x`
    pub fn axpy(&mut self, alpha: f32, x: &Tensor) -> Result<()> {
        self.check_same_shape(x)?;
        for (s, v) in self.data.iter_mut().zip(&x.data) {
            *s += alpha * v;
        }
        Ok(())
    }

    /// `self *= alpha`
    pub fn scale(&mut self, alpha: f32) {
        for v in &mut self.data {
            *v *= alpha;
        }
    }

    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    /// Sum of squares of all elements.
    pub fn sum_squares(&self) -> f64 {
        self.data.iter().map(|&v| (v as f64) * (v as f64)).sum()
    }
}
