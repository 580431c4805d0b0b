use std::marker::PhantomData;

use bytemuck::Pod;
use kiln_dtype::{DType, HasDType, ScalarDType};
use snafu::ensure;

use crate::device::Device;
use crate::error::{FaultSnafu, Result, SizeMismatchSnafu};

/// Typed allocation in device memory. Freed on drop.
pub struct DeviceBuffer<T> {
    device: Device,
    address: u64,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T> std::fmt::Debug for DeviceBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("device", &self.device.name())
            .field("address", &format_args!("{:#x}", self.address))
            .field("len", &self.len)
            .finish()
    }
}

impl<T: Pod + HasDType> DeviceBuffer<T> {
    pub fn zeros(device: &Device, len: usize) -> Result<Self> {
        device.check_alive()?;
        let address = device.memory().allocate(len * size_of::<T>())?;
        Ok(Self { device: device.clone(), address, len, _marker: PhantomData })
    }

    pub fn from_slice(device: &Device, data: &[T]) -> Result<Self> {
        let buffer = Self::zeros(device, data.len())?;
        buffer.copy_from_host(data)?;
        Ok(buffer)
    }

    /// Synchronous host to device copy. Waits for the default stream first.
    pub fn copy_from_host(&self, data: &[T]) -> Result<()> {
        ensure!(data.len() == self.len, SizeMismatchSnafu { expected: self.len, actual: data.len() });
        self.device.default_stream().drain();
        self.device.check_alive()?;
        self.device.memory().write(self.address, bytemuck::cast_slice(data)).map_err(|reason| self.fault(reason))
    }

    /// Synchronous device to host copy. Waits for the default stream first.
    pub fn to_vec(&self) -> Result<Vec<T>> {
        self.device.default_stream().drain();
        self.device.check_alive()?;
        let bytes = self.device.memory().read(self.address, self.len * size_of::<T>()).map_err(|reason| self.fault(reason))?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }

    fn fault(&self, reason: String) -> crate::error::Error {
        FaultSnafu { kernel: "<host copy>", reason }.build()
    }

    pub fn dtype(&self) -> DType {
        DType::ptr(T::DTYPE)
    }

    pub fn element(&self) -> ScalarDType {
        T::DTYPE
    }
}

impl<T> DeviceBuffer<T> {
    /// Device address of the first element.
    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

impl<T> Drop for DeviceBuffer<T> {
    fn drop(&mut self) {
        self.device.memory().free(self.address);
    }
}
