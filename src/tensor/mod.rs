//! Shaped f32 tensors whose storage is charged to a [`SimulatedDevice`].

pub mod autocast;

pub use autocast::{autocast, autocast_dtype, AutocastGuard};

use crate::device::{DeviceBuffer, SimulatedDevice};
use crate::errors::ProfilerError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Storage precision of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F32,
    /// bfloat16: f32 exponent range, 8-bit mantissa.
    BF16,
}

impl DType {
    pub fn size_bytes(self) -> usize {
        match self {
            DType::F32 => 4,
            DType::BF16 => 2,
        }
    }

    /// Round a value to what this dtype can represent.
    pub fn round(self, x: f32) -> f32 {
        match self {
            DType::F32 => x,
            DType::BF16 => {
                // round-to-nearest-even on the upper 16 bits
                let bits = x.to_bits();
                let rounding = 0x7FFF + ((bits >> 16) & 1);
                f32::from_bits(bits.wrapping_add(rounding) & 0xFFFF_0000)
            }
        }
    }
}

/// Row-major tensor. Values are kept as f32 and rounded to `dtype` on creation.
#[derive(Debug)]
pub struct Tensor {
    data: Vec<f32>,
    shape: Vec<usize>,
    dtype: DType,
    buffer: DeviceBuffer,
}

impl Tensor {
    /// Build a tensor from host data, charging `numel * dtype.size_bytes()` to `device`.
    pub fn from_vec(
        device: &Arc<SimulatedDevice>,
        mut data: Vec<f32>,
        shape: &[usize],
        dtype: DType,
    ) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if numel != data.len() {
            return Err(ProfilerError::ShapeMismatch {
                expected: shape.to_vec(),
                actual: vec![data.len()],
            }
            .into());
        }
        if dtype != DType::F32 {
            data.iter_mut().for_each(|x| *x = dtype.round(*x));
        }
        let buffer = device.allocate((numel * dtype.size_bytes()) as u64)?;
        Ok(Self {
            data,
            shape: shape.to_vec(),
            dtype,
            buffer,
        })
    }

    pub fn zeros(device: &Arc<SimulatedDevice>, shape: &[usize], dtype: DType) -> Result<Self> {
        let numel = shape.iter().product();
        Self::from_vec(device, vec![0.0; numel], shape, dtype)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Bytes charged to the device for this tensor's storage.
    pub fn size_bytes(&self) -> u64 {
        self.buffer.bytes()
    }

    pub fn device(&self) -> &Arc<SimulatedDevice> {
        self.buffer.device()
    }

    /// Interpret as a matrix `(rows, cols)`.
    pub fn dims2(&self) -> Result<(usize, usize)> {
        match self.shape.as_slice() {
            [rows, cols] => Ok((*rows, *cols)),
            other => anyhow::bail!("expected a 2-D tensor, got shape {:?}", other),
        }
    }

    /// Copy into a new allocation with the given dtype.
    pub fn to_dtype(&self, dtype: DType) -> Result<Tensor> {
        Tensor::from_vec(self.device(), self.data.clone(), &self.shape, dtype)
    }

    /// Copy into a new allocation with the same dtype.
    pub fn try_clone(&self) -> Result<Tensor> {
        self.to_dtype(self.dtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceAllocator, DeviceConfig};

    #[test]
    fn tensor_charges_device_until_dropped() {
        let device = SimulatedDevice::new(DeviceConfig::default());
        let t = Tensor::zeros(&device, &[16, 32], DType::F32).unwrap();
        assert_eq!(t.size_bytes(), 16 * 32 * 4);
        assert_eq!(device.allocated_bytes(), 2048);
        let half = t.to_dtype(DType::BF16).unwrap();
        assert_eq!(half.size_bytes(), 1024);
        drop(t);
        drop(half);
        assert_eq!(device.allocated_bytes(), 0);
    }

    #[test]
    fn from_vec_rejects_wrong_length() {
        let device = SimulatedDevice::new(DeviceConfig::default());
        let err = Tensor::from_vec(&device, vec![1.0; 5], &[2, 3], DType::F32).unwrap_err();
        assert!(err.downcast_ref::<ProfilerError>().is_some());
        assert_eq!(device.allocated_bytes(), 0);
    }

    #[test]
    fn bf16_rounding_drops_low_mantissa_bits() {
        let x = 1.0f32 + f32::EPSILON;
        assert_eq!(DType::BF16.round(x), 1.0);
        assert_eq!(DType::BF16.round(0.5), 0.5);
        assert_eq!(DType::F32.round(x), x);
    }
}
