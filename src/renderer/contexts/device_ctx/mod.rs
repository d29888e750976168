pub mod instance;
pub mod device;
pub mod gpu_device;
pub mod queue;
pub mod transfer_ctx;

use color_eyre::Result;
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::contexts::device_ctx::instance::RenderInstance;

/// Responsibilities:
/// - Manage the Vulkan instance, device, and queue
/// - Submit one-shot transfer work
/// - Own the memory and descriptor allocators
pub struct RenderDeviceContext {
    // Dropped before the instance
    pub device: RenderDevice,
    pub instance: RenderInstance,
}

impl RenderDeviceContext {
    pub fn new(config: &RenderConfig) -> Result<Self> {
        let instance = RenderInstance::new(config)?;
        let device = instance.create_device(config)?;

        Ok(Self {
            device,
            instance,
        })
    }
}
