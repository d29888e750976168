use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::{eyre, OptionExt};
use crate::renderer::contexts::device_ctx::gpu_device::{GpuDevice, ImageUpload};
use crate::renderer::internals::memory::{allocate_memory, GpuMemoryManager, MemoryPoolType};

/// Copies `data` into a fresh staging buffer and from there into `image`.
///
/// Blocks until the device has finished the copy. On return the image is in
/// `SHADER_READ_ONLY_OPTIMAL`, the staging buffer is destroyed and the
/// volatile staging pool has been reset.
pub fn upload_to_image(
    device: &dyn GpuDevice,
    memory: &mut dyn GpuMemoryManager,
    image: vk::Image,
    subresource_range: vk::ImageSubresourceRange,
    regions: &[vk::BufferImageCopy],
    data: &[u8],
) -> Result<()> {
    let buffer_info = vk::BufferCreateInfo::default()
        .size(data.len() as vk::DeviceSize)
        .usage(vk::BufferUsageFlags::TRANSFER_SRC)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);
    let staging_buffer = device.create_buffer(&buffer_info)?;

    let result = stage_and_copy(
        device,
        memory,
        staging_buffer,
        image,
        subresource_range,
        regions,
        data,
    );

    device.destroy_buffer(staging_buffer);
    memory.reset_pool(MemoryPoolType::VolatileStagingBuffers);

    result
}

fn stage_and_copy(
    device: &dyn GpuDevice,
    memory: &mut dyn GpuMemoryManager,
    staging_buffer: vk::Buffer,
    image: vk::Image,
    subresource_range: vk::ImageSubresourceRange,
    regions: &[vk::BufferImageCopy],
    data: &[u8],
) -> Result<()> {
    let requirements = device.buffer_memory_requirements(staging_buffer);
    let allocation = allocate_memory(
        &mut None,
        MemoryPoolType::VolatileStagingBuffers,
        &requirements,
        true,
        memory,
    )?;
    device.bind_buffer_memory(staging_buffer, allocation.memory, allocation.offset)?;

    let mapped = allocation
        .mapped_memory
        .ok_or_eyre("Staging memory is not host visible")?;
    let mut raw = unsafe {
        presser::RawAllocation::from_raw_parts(mapped, allocation.size_in_bytes as usize)
    };
    let mut slab = unsafe { raw.borrow_as_slab() };
    presser::copy_from_slice_to_offset(data, &mut slab, 0)
        .map_err(|e| eyre!("Failed to fill staging buffer: {}", e))?;

    log::debug!(
        "Uploading {} bytes in {} regions",
        data.len(),
        regions.len()
    );

    device.upload_buffer_to_image(&ImageUpload {
        staging_buffer,
        image,
        subresource_range,
        regions,
    })
}

/// Records the layout transitions around a buffer-to-image copy covering
/// `upload.subresource_range`.
pub fn record_image_upload(
    cmd: vk::CommandBuffer,
    device: &ash::Device,
    upload: &ImageUpload<'_>,
) {
    transition_image_layout(
        cmd,
        device,
        upload.image,
        upload.subresource_range,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    );

    unsafe {
        device.cmd_copy_buffer_to_image(
            cmd,
            upload.staging_buffer,
            upload.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            upload.regions,
        );
    }

    transition_image_layout(
        cmd,
        device,
        upload.image,
        upload.subresource_range,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );
}

fn transition_image_layout(
    cmd: vk::CommandBuffer,
    device: &ash::Device,
    image: vk::Image,
    subresource_range: vk::ImageSubresourceRange,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let (src_stage, src_access, dst_stage, dst_access) = match new_layout {
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (
            vk::PipelineStageFlags2::TOP_OF_PIPE,
            vk::AccessFlags2::NONE,
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_WRITE,
        ),
        _ => (
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_WRITE,
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
            vk::AccessFlags2::SHADER_READ,
        ),
    };

    let image_barriers = [
        vk::ImageMemoryBarrier2::default()
            .src_stage_mask(src_stage)
            .src_access_mask(src_access)
            .dst_stage_mask(dst_stage)
            .dst_access_mask(dst_access)
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .subresource_range(subresource_range)
            .image(image),
    ];
    let dependency_info = vk::DependencyInfo::default()
        .image_memory_barriers(&image_barriers);

    unsafe {
        device.cmd_pipeline_barrier2(cmd, &dependency_info);
    }
}
