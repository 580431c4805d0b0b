use std::sync::Arc;

use kiln_codegen::binary::{self, Image};
use kiln_codegen::{BinaryFormat, Kernel};

/// A kernel binary loaded on a device.
#[derive(Debug, Clone)]
pub struct Module {
    image: Arc<Image>,
    format: BinaryFormat,
    device: u64,
}

impl Module {
    /// Decode `bytes` without checking them against a device.
    pub(crate) fn decode(bytes: &[u8], device: u64) -> Result<Self, String> {
        let image = binary::decode(bytes).map_err(|err| err.to_string())?;
        let format = BinaryFormat::from_magic(image.magic).ok_or("unknown binary format")?;
        Ok(Self { image: Arc::new(image), format, device })
    }

    pub fn entry(&self) -> &str {
        self.image.entry()
    }

    pub fn format(&self) -> BinaryFormat {
        self.format
    }

    pub fn arch(&self) -> &str {
        &self.image.arch
    }

    /// Id of the device the module was loaded on.
    pub fn device_id(&self) -> u64 {
        self.device
    }

    pub fn num_warps(&self) -> u32 {
        self.image.num_warps
    }

    pub fn shared_mem(&self) -> u32 {
        self.image.shared_mem
    }

    pub fn registers(&self) -> u32 {
        self.image.registers
    }

    pub fn kernel(&self) -> &Kernel {
        &self.image.kernel
    }

    pub(crate) fn image(&self) -> &Arc<Image> {
        &self.image
    }
}
