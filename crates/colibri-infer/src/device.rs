use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::InferError;

/// Where an engine keeps its tensors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Device {
    Cpu,
    Cuda { device_id: i32 },
}

impl Device {
    /// Resolve to a live candle device.
    ///
    /// CUDA resolution fails with [`InferError::UnsupportedDevice`] when the
    /// build or the machine cannot provide it.
    pub fn to_candle(&self) -> Result<candle_core::Device, InferError> {
        match self {
            Device::Cpu => Ok(candle_core::Device::Cpu),
            Device::Cuda { device_id } => candle_core::Device::new_cuda(*device_id as usize)
                .map_err(|e| InferError::UnsupportedDevice(format!("{self}: {e}"))),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "CPU"),
            Device::Cuda { device_id } => write!(f, "CUDA(device_id={device_id})"),
        }
    }
}
