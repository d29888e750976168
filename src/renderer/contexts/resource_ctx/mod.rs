pub mod descriptor_set_layout_builder;
pub mod registry;

use color_eyre::Result;
use crate::components::specular_probe::SpecularProbeManager;
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::contexts::device_ctx::gpu_device::GpuDevice;
use crate::renderer::contexts::resource_ctx::registry::ResourceRegistry;
use crate::renderer::internals::bindless::{GlobalTextureLayout, GlobalTextureTable};
use crate::renderer::internals::memory::GpuMemoryManager;
use crate::renderer::internals::memory_pool::PooledMemoryManager;
use crate::renderer::resources::image::{ImageDescriptor, ImageHandle};
use crate::renderer::resources::image_manager::ImageManager;

/// What resource creation and destruction needs from the device side.
pub struct GpuContext<'a> {
    pub device: &'a dyn GpuDevice,
    pub memory: &'a mut dyn GpuMemoryManager,
    pub textures: &'a mut GlobalTextureTable,
}

/// Responsibilities:
/// - Own the image records and the probe records
/// - Sub-allocate device memory for them
/// - Keep the global texture table in sync with the live textures
pub struct RenderResourceContext {
    pub images: ImageManager,
    pub probes: SpecularProbeManager,
    pub textures: GlobalTextureTable,
    memory: PooledMemoryManager,
    texture_layout: GlobalTextureLayout,
}

impl RenderResourceContext {
    pub fn new(
        device: &RenderDevice,
        config: &RenderConfig,
    ) -> Result<Self> {
        let texture_layout = GlobalTextureLayout::new(device, config.max_global_textures)?;
        let textures = texture_layout.create_table()?;
        let memory = PooledMemoryManager::new(
            config.memory_pool_sizes.clone(),
            device.memory_allocator(),
        );

        // Defaults for both bindings of the texture table
        let mut images = ImageManager::new(config);
        for name in [&config.fallback_texture_2d, &config.fallback_texture_cube] {
            images.create_image(name, ImageDescriptor::texture_from_file(name.as_str()))?;
        }

        Ok(Self {
            images,
            probes: SpecularProbeManager::new(),
            textures,
            memory,
            texture_layout,
        })
    }

    pub fn texture_layout(&self) -> &GlobalTextureLayout {
        &self.texture_layout
    }

    pub fn create_resources(
        &mut self,
        device: &RenderDevice,
        images: &[ImageHandle],
    ) -> Result<()> {
        let mut ctx = GpuContext {
            device,
            memory: &mut self.memory,
            textures: &mut self.textures,
        };
        self.images.create_resources(images, &mut ctx)
    }

    pub fn destroy_resources(
        &mut self,
        device: &RenderDevice,
        images: &[ImageHandle],
    ) -> Result<()> {
        let mut ctx = GpuContext {
            device,
            memory: &mut self.memory,
            textures: &mut self.textures,
        };
        self.images.destroy_resources(images, &mut ctx)
    }

    pub fn update_global_descriptor_sets(&mut self, device: &RenderDevice) -> Result<()> {
        let mut ctx = GpuContext {
            device,
            memory: &mut self.memory,
            textures: &mut self.textures,
        };
        self.images.update_global_descriptor_sets(&mut ctx)
    }

    pub fn texture_id(&self, image: ImageHandle) -> u32 {
        self.images.get_texture_id(image, &self.textures)
    }

    /// Runs `func` with every resource kind registered and a context to
    /// create or destroy their GPU objects with.
    pub fn with_registry<F, T>(
        &mut self,
        device: &RenderDevice,
        func: F,
    ) -> Result<T>
    where
        F: FnOnce(&mut ResourceRegistry<'_>, &mut GpuContext<'_>) -> Result<T>,
    {
        let mut ctx = GpuContext {
            device,
            memory: &mut self.memory,
            textures: &mut self.textures,
        };
        let mut registry = ResourceRegistry::new();
        registry.register(&mut self.images)?;
        registry.register(&mut self.probes)?;
        func(&mut registry, &mut ctx)
    }

    /// Releases every GPU object. Must run before the device is dropped.
    pub fn destroy(&mut self, device: &RenderDevice) -> Result<()> {
        self.with_registry(device, |registry, ctx| registry.destroy_all(ctx))?;
        self.memory.destroy()?;
        self.texture_layout.destroy(device)
    }
}
