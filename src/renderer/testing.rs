//! Recording stand-ins for the device and the pool allocator.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ptr::NonNull;
use ash::vk;
use ash::vk::Handle;
use color_eyre::Result;
use crate::renderer::contexts::device_ctx::gpu_device::{GpuDevice, ImageUpload};
use crate::renderer::internals::memory::{GpuMemoryAllocation, GpuMemoryManager, MemoryPoolType};

#[derive(Clone, Debug)]
pub struct CreatedImage {
    pub handle: vk::Image,
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub flags: vk::ImageCreateFlags,
}

#[derive(Clone, Debug)]
pub struct CreatedView {
    pub handle: vk::ImageView,
    pub image: vk::Image,
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub range: vk::ImageSubresourceRange,
}

#[derive(Clone, Debug)]
pub struct RecordedUpload {
    pub image: vk::Image,
    pub range: vk::ImageSubresourceRange,
    pub regions: Vec<vk::BufferImageCopy>,
}

#[derive(Clone, Debug)]
pub struct DescriptorWrite {
    pub binding: u32,
    pub first_element: u32,
    pub views: Vec<vk::ImageView>,
}

/// Hands out fake handles and records every call.
pub struct MockDevice {
    next_handle: Cell<u64>,
    format_properties: HashMap<vk::Format, vk::FormatProperties>,

    pub images: RefCell<Vec<CreatedImage>>,
    pub views: RefCell<Vec<CreatedView>>,
    pub destroyed_images: RefCell<Vec<vk::Image>>,
    pub destroyed_views: RefCell<Vec<vk::ImageView>>,
    pub bound_images: RefCell<Vec<(vk::Image, vk::DeviceMemory, vk::DeviceSize)>>,
    pub buffers_created: Cell<usize>,
    pub buffers_destroyed: Cell<usize>,
    pub uploads: RefCell<Vec<RecordedUpload>>,
    pub descriptor_writes: RefCell<Vec<DescriptorWrite>>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self {
            next_handle: Cell::new(0x1000),
            format_properties: HashMap::new(),
            images: RefCell::default(),
            views: RefCell::default(),
            destroyed_images: RefCell::default(),
            destroyed_views: RefCell::default(),
            bound_images: RefCell::default(),
            buffers_created: Cell::new(0),
            buffers_destroyed: Cell::new(0),
            uploads: RefCell::default(),
            descriptor_writes: RefCell::default(),
        }
    }
}

impl MockDevice {
    /// Formats without an override support everything with optimal tiling
    /// and nothing with linear tiling.
    pub fn with_format_properties(
        mut self,
        format: vk::Format,
        properties: vk::FormatProperties,
    ) -> Self {
        self.format_properties.insert(format, properties);
        self
    }

    fn next<H: Handle>(&self) -> H {
        let raw = self.next_handle.get();
        self.next_handle.set(raw + 1);
        H::from_raw(raw)
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers_created.get() - self.buffers_destroyed.get()
    }

    pub fn live_views(&self) -> usize {
        self.views.borrow().len() - self.destroyed_views.borrow().len()
    }

    pub fn views_of(&self, image: vk::Image) -> Vec<CreatedView> {
        self.views
            .borrow()
            .iter()
            .filter(|view| view.image == image)
            .cloned()
            .collect()
    }

    pub fn image(&self, image: vk::Image) -> Option<CreatedImage> {
        self.images.borrow().iter().find(|i| i.handle == image).cloned()
    }
}

impl GpuDevice for MockDevice {
    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        self.format_properties
            .get(&format)
            .copied()
            .unwrap_or(vk::FormatProperties {
                linear_tiling_features: vk::FormatFeatureFlags::empty(),
                optimal_tiling_features: vk::FormatFeatureFlags::from_raw(u32::MAX),
                buffer_features: vk::FormatFeatureFlags::empty(),
            })
    }

    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> Result<vk::Image> {
        let handle = self.next();
        self.images.borrow_mut().push(CreatedImage {
            handle,
            image_type: info.image_type,
            format: info.format,
            extent: info.extent,
            mip_levels: info.mip_levels,
            array_layers: info.array_layers,
            tiling: info.tiling,
            usage: info.usage,
            flags: info.flags,
        });
        Ok(handle)
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        let size = self
            .image(image)
            .map(|i| {
                let e = i.extent;
                e.width as u64 * e.height as u64 * e.depth as u64
                    * i.array_layers as u64 * i.mip_levels as u64 * 16
            })
            .unwrap_or(0);
        vk::MemoryRequirements {
            size,
            alignment: 256,
            memory_type_bits: 0b1,
        }
    }

    fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> Result<()> {
        self.bound_images.borrow_mut().push((image, memory, offset));
        Ok(())
    }

    fn destroy_image(&self, image: vk::Image) {
        self.destroyed_images.borrow_mut().push(image);
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> Result<vk::ImageView> {
        let handle = self.next();
        self.views.borrow_mut().push(CreatedView {
            handle,
            image: info.image,
            view_type: info.view_type,
            format: info.format,
            range: info.subresource_range,
        });
        Ok(handle)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.destroyed_views.borrow_mut().push(view);
    }

    fn create_buffer(&self, _info: &vk::BufferCreateInfo<'_>) -> Result<vk::Buffer> {
        self.buffers_created.set(self.buffers_created.get() + 1);
        Ok(self.next())
    }

    fn buffer_memory_requirements(&self, _buffer: vk::Buffer) -> vk::MemoryRequirements {
        // Large enough for every test payload
        vk::MemoryRequirements {
            size: 1 << 20,
            alignment: 16,
            memory_type_bits: 0b10,
        }
    }

    fn bind_buffer_memory(
        &self,
        _buffer: vk::Buffer,
        _memory: vk::DeviceMemory,
        _offset: vk::DeviceSize,
    ) -> Result<()> {
        Ok(())
    }

    fn destroy_buffer(&self, _buffer: vk::Buffer) {
        self.buffers_destroyed.set(self.buffers_destroyed.get() + 1);
    }

    fn upload_buffer_to_image(&self, upload: &ImageUpload<'_>) -> Result<()> {
        self.uploads.borrow_mut().push(RecordedUpload {
            image: upload.image,
            range: upload.subresource_range,
            regions: upload.regions.to_vec(),
        });
        Ok(())
    }

    fn write_combined_image_samplers(
        &self,
        _set: vk::DescriptorSet,
        binding: u32,
        first_element: u32,
        image_infos: &[vk::DescriptorImageInfo],
    ) {
        self.descriptor_writes.borrow_mut().push(DescriptorWrite {
            binding,
            first_element,
            views: image_infos.iter().map(|info| info.image_view).collect(),
        });
    }
}

/// Counts allocation requests. Host-visible pools are backed by real heap
/// memory so staging copies can be inspected.
#[derive(Default)]
pub struct CountingMemory {
    /// `(pool, size, alignment, linear)` per request
    pub requests: Vec<(MemoryPoolType, vk::DeviceSize, vk::DeviceSize, bool)>,
    pub resets: Vec<MemoryPoolType>,
    host_blocks: Vec<Box<[u8]>>,
}

impl CountingMemory {
    pub fn last_written(&self, len: usize) -> Vec<u8> {
        self.host_blocks
            .last()
            .map(|block| block[..len].to_vec())
            .unwrap_or_default()
    }
}

impl GpuMemoryManager for CountingMemory {
    fn allocate_offset(
        &mut self,
        pool: MemoryPoolType,
        size: vk::DeviceSize,
        alignment: vk::DeviceSize,
        memory_type_bits: u32,
        linear: bool,
    ) -> Result<GpuMemoryAllocation> {
        self.requests.push((pool, size, alignment, linear));

        let mapped_memory = if pool.is_host_visible() {
            let mut block = vec![0u8; size as usize].into_boxed_slice();
            let ptr = NonNull::new(block.as_mut_ptr());
            self.host_blocks.push(block);
            ptr
        } else {
            None
        };

        Ok(GpuMemoryAllocation {
            memory: vk::DeviceMemory::from_raw(self.requests.len() as u64),
            offset: 0,
            size_in_bytes: size,
            alignment_in_bytes: alignment,
            memory_pool_type: pool,
            memory_type_bits,
            linear,
            mapped_memory,
        })
    }

    fn reset_pool(&mut self, pool: MemoryPoolType) {
        self.resets.push(pool);
    }
}

/// Builds an uncompressed RGBA8 DDS file with a DX10 header. Texel bytes
/// count up from zero so regions can be told apart.
pub fn encode_rgba8_dds(width: u32, height: u32, mip_levels: u32, cube: bool) -> Vec<u8> {
    const DDSD_CAPS: u32 = 0x1;
    const DDSD_HEIGHT: u32 = 0x2;
    const DDSD_WIDTH: u32 = 0x4;
    const DDSD_PIXELFORMAT: u32 = 0x1000;
    const DDSD_MIPMAPCOUNT: u32 = 0x20000;
    const DDPF_FOURCC: u32 = 0x4;
    const DDSCAPS_COMPLEX: u32 = 0x8;
    const DDSCAPS_TEXTURE: u32 = 0x1000;
    const DDSCAPS_MIPMAP: u32 = 0x400000;
    const DXGI_FORMAT_R8G8B8A8_UNORM: u32 = 28;
    const D3D10_RESOURCE_DIMENSION_TEXTURE2D: u32 = 3;

    let mut words: Vec<u32> = Vec::new();
    words.push(u32::from_le_bytes(*b"DDS "));
    words.extend([
        124,
        DDSD_CAPS | DDSD_HEIGHT | DDSD_WIDTH | DDSD_PIXELFORMAT | DDSD_MIPMAPCOUNT,
        height,
        width,
        0,
        0,
        mip_levels,
    ]);
    words.extend([0; 11]);
    words.extend([32, DDPF_FOURCC, u32::from_le_bytes(*b"DX10"), 0, 0, 0, 0, 0]);
    words.extend([
        DDSCAPS_TEXTURE | DDSCAPS_COMPLEX | DDSCAPS_MIPMAP,
        if cube { 0x200 | 0xFC00 } else { 0 },
        0,
        0,
        0,
    ]);
    words.extend([
        DXGI_FORMAT_R8G8B8A8_UNORM,
        D3D10_RESOURCE_DIMENSION_TEXTURE2D,
        if cube { 0x4 } else { 0 },
        1,
        0,
    ]);

    let mut bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();

    let faces = if cube { 6 } else { 1 };
    let face_size: usize = (0..mip_levels)
        .map(|mip| ((width >> mip).max(1) * (height >> mip).max(1) * 4) as usize)
        .sum();
    bytes.extend((0..faces * face_size).map(|i| i as u8));
    bytes
}
