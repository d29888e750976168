use std::path::PathBuf;
use ash::vk;
use crate::renderer::internals::memory::MemoryPoolType;

/// Contains configuration options for the renderer like validation, the size of the
/// bindless texture table, where textures are loaded from and how large each memory pool is
pub struct RenderConfig {
    pub enable_validation: bool,
    /// Capacity of each binding of the global texture table
    pub max_global_textures: u32,
    pub texture_directory: PathBuf,
    pub texture_extension: String,
    /// Default for the 2D binding and replacement for missing texture files
    pub fallback_texture_2d: String,
    /// Default for the cube binding
    pub fallback_texture_cube: String,
    pub memory_pool_sizes: MemoryPoolSizes,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            enable_validation: cfg!(debug_assertions),
            max_global_textures: 4096,
            texture_directory: PathBuf::from("media/textures"),
            texture_extension: "dds".into(),
            fallback_texture_2d: "checkerboard".into(),
            fallback_texture_cube: "default_ibl_cube_specular".into(),
            memory_pool_sizes: MemoryPoolSizes::default(),
        }
    }
}

const MIB: vk::DeviceSize = 1024 * 1024;

/// Size of the block backing each memory pool. The first request in a pool
/// may be larger, in which case the block is sized to fit it.
#[derive(Clone)]
pub struct MemoryPoolSizes {
    pub static_images: vk::DeviceSize,
    pub static_buffers: vk::DeviceSize,
    pub static_staging_buffers: vk::DeviceSize,
    pub resolution_dependent_images: vk::DeviceSize,
    pub resolution_dependent_buffers: vk::DeviceSize,
    pub volatile_staging_buffers: vk::DeviceSize,
}

impl Default for MemoryPoolSizes {
    fn default() -> Self {
        Self {
            static_images: 512 * MIB,
            static_buffers: 128 * MIB,
            static_staging_buffers: 32 * MIB,
            resolution_dependent_images: 256 * MIB,
            resolution_dependent_buffers: 32 * MIB,
            volatile_staging_buffers: 128 * MIB,
        }
    }
}

impl MemoryPoolSizes {
    pub fn size_of(&self, pool: MemoryPoolType) -> vk::DeviceSize {
        match pool {
            MemoryPoolType::StaticImages => self.static_images,
            MemoryPoolType::StaticBuffers => self.static_buffers,
            MemoryPoolType::StaticStagingBuffers => self.static_staging_buffers,
            MemoryPoolType::ResolutionDependentImages => self.resolution_dependent_images,
            MemoryPoolType::ResolutionDependentBuffers => self.resolution_dependent_buffers,
            MemoryPoolType::VolatileStagingBuffers => self.volatile_staging_buffers,
        }
    }
}
