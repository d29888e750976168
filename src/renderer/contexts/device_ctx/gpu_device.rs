use ash::vk;
use color_eyre::Result;

/// A recorded staging-buffer-to-image copy, submitted as one blocking
/// command sequence.
pub struct ImageUpload<'a> {
    pub staging_buffer: vk::Buffer,
    pub image: vk::Image,
    /// The full mip/layer range, transitioned before and after the copy
    pub subresource_range: vk::ImageSubresourceRange,
    pub regions: &'a [vk::BufferImageCopy],
}

/// The device operations the image manager and the global texture table depend on.
///
/// `RenderDevice` forwards these to Vulkan. All calls happen on the thread that owns
/// the device; nothing here is expected to be called concurrently.
pub trait GpuDevice {
    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties;

    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> Result<vk::Image>;
    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;
    fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> Result<()>;
    fn destroy_image(&self, image: vk::Image);

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> Result<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);

    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> Result<vk::Buffer>;
    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;
    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> Result<()>;
    fn destroy_buffer(&self, buffer: vk::Buffer);

    /// Records undefined -> transfer dst, the copy, and transfer dst -> shader read,
    /// submits it and returns only once the device has finished executing it.
    fn upload_buffer_to_image(&self, upload: &ImageUpload<'_>) -> Result<()>;

    /// Writes `image_infos` into consecutive array elements of `binding`,
    /// starting at `first_element`.
    fn write_combined_image_samplers(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        first_element: u32,
        image_infos: &[vk::DescriptorImageInfo],
    );
}
