use std::ffi::{c_char, CStr};
use std::mem::ManuallyDrop;
use std::str::Utf8Error;
use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use gpu_descriptor::{CreatePoolError, DescriptorAllocator, DescriptorDevice, DescriptorPoolCreateFlags, DescriptorTotalCount, DeviceAllocationError};
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::device_ctx::gpu_device::{GpuDevice, ImageUpload};
use crate::renderer::contexts::device_ctx::instance::RenderInstance;
use crate::renderer::contexts::device_ctx::queue::{Queue, QueueFamily};
use crate::renderer::contexts::device_ctx::transfer_ctx::TransferContext;
use crate::renderer::internals::upload::record_image_upload;

pub type RenderDescriptorAllocator = DescriptorAllocator<vk::DescriptorPool, vk::DescriptorSet>;

/// Logical device, its single queue and the allocators built on top of it
pub struct RenderDevice {
    pub logical: Arc<ash::Device>,
    pub physical: vk::PhysicalDevice,
    pub queue: Arc<Queue>,

    instance: ash::Instance,
    memory_allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,
    descriptor_allocator: Mutex<RenderDescriptorAllocator>,
    transfer_context: ManuallyDrop<TransferContext>,
}

impl RenderDevice {
    pub fn new(
        instance: &RenderInstance,
        config: &RenderConfig,
    ) -> Result<Self> {
        let (physical_device, queue_family) =
            Self::select_physical_device(&instance.instance)?;

        let (logical_device, queue) = Self::create_logical_device(
            &instance.instance,
            &physical_device,
            queue_family,
        )?;

        let memory_allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.instance.clone(),
            device: logical_device.clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: true,
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: true,
                log_frees: true,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        let logical_device = Arc::new(logical_device);
        let queue = Arc::new(queue);

        // Both texture bindings are update-after-bind
        let descriptor_allocator = RenderDescriptorAllocator::new(
            config.max_global_textures * 2,
        );

        let transfer_context = TransferContext::new(
            queue.clone(),
            logical_device.clone(),
        )?;

        Ok(Self {
            logical: logical_device,
            physical: physical_device,
            queue,

            instance: instance.instance.clone(),
            memory_allocator: ManuallyDrop::new(Arc::new(Mutex::new(memory_allocator))),
            descriptor_allocator: Mutex::new(descriptor_allocator),
            transfer_context: ManuallyDrop::new(transfer_context),
        })
    }

    pub fn memory_allocator(&self) -> Arc<Mutex<Allocator>> {
        Arc::clone(&self.memory_allocator)
    }

    pub fn descriptor_allocator(&self) -> &Mutex<RenderDescriptorAllocator> {
        &self.descriptor_allocator
    }

    pub fn descriptor_device(&self) -> DescriptorAshDevice {
        DescriptorAshDevice::from(self.logical.clone())
    }

    pub fn immediate_submit<F>(
        &self,
        func: F,
    ) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer, &ash::Device) -> Result<()>,
    {
        self.transfer_context.immediate_submit(func)
    }

    fn select_physical_device(
        instance: &ash::Instance,
    ) -> Result<(vk::PhysicalDevice, QueueFamily)> {
        let req_device_exts = Self::get_required_device_extensions();
        let req_device_exts = req_device_exts
            .iter()
            .map(|ext| ext.to_str())
            .collect::<std::result::Result<Vec<&str>, Utf8Error>>()?;

        let candidates = unsafe { instance.enumerate_physical_devices()? };

        candidates
            .into_iter()
            // Filter out devices that do not contain the required device extensions
            .filter(|device| {
                let supported_extensions = unsafe {
                    instance
                        .enumerate_device_extension_properties(*device)
                        .unwrap_or_default()
                };

                req_device_exts.iter().all(|req_ext| {
                    let req_ext_supported = supported_extensions
                        .iter()
                        .filter_map(|sup_ext| sup_ext.extension_name_as_c_str().ok())
                        .any(|sup_ext| sup_ext.to_str() == Ok(*req_ext));
                    if !req_ext_supported {
                        log::error!("Device extension not supported: {}", req_ext);
                    }
                    req_ext_supported
                })
            })
            // A single graphics queue handles uploads and sampling
            .filter_map(|device| {
                let props = unsafe {
                    instance.get_physical_device_queue_family_properties(device)
                };
                props
                    .iter()
                    .enumerate()
                    .map(|(i, p)| QueueFamily::new(i as u32, *p))
                    .find(|family| family.supports_graphics() && family.supports_transfer())
                    .map(|family| (device, family))
            })
            .min_by_key(|(device, _)| {
                let props = unsafe { instance.get_physical_device_properties(*device) };
                match props.device_type {
                    vk::PhysicalDeviceType::DISCRETE_GPU => 0,
                    vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
                    vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
                    vk::PhysicalDeviceType::CPU => 3,
                    vk::PhysicalDeviceType::OTHER => 4,
                    _ => 5,
                }
            })
            .ok_or_eyre("No suitable physical device found")
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: &vk::PhysicalDevice,
        queue_family: QueueFamily,
    ) -> Result<(ash::Device, Queue)> {
        let queue_priorities = [1.0];
        let queue_create_infos = [
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(queue_family.index)
                .queue_priorities(&queue_priorities),
        ];

        let device = {
            let enabled_extension_names = Self::get_required_device_extensions()
                .iter()
                .map(|ext| ext.as_ptr())
                .collect::<Vec<*const c_char>>();
            let features = unsafe {
                instance.get_physical_device_features(*physical_device)
            };
            let mut vulkan12_features = vk::PhysicalDeviceVulkan12Features::default()
                .descriptor_indexing(true)
                .descriptor_binding_partially_bound(true)
                .descriptor_binding_sampled_image_update_after_bind(true);
            let mut vulkan13_features = vk::PhysicalDeviceVulkan13Features::default()
                .synchronization2(true);

            let device_create_info = vk::DeviceCreateInfo::default()
                .enabled_features(&features)
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&enabled_extension_names)
                .push_next(&mut vulkan12_features)
                .push_next(&mut vulkan13_features);

            unsafe {
                instance.create_device(*physical_device, &device_create_info, None)?
            }
        };

        let queue = unsafe {
            let handle = device.get_device_queue(queue_family.index, 0);
            Queue::new(queue_family, handle)
        };

        Ok((device, queue))
    }

    fn get_required_device_extensions() -> Vec<&'static CStr> {
        vec![
            #[cfg(target_os = "macos")]
            ash::khr::portability_subset::NAME,
        ]
    }
}

impl GpuDevice for RenderDevice {
    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance.get_physical_device_format_properties(self.physical, format)
        }
    }

    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> Result<vk::Image> {
        Ok(unsafe { self.logical.create_image(info, None)? })
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        unsafe { self.logical.get_image_memory_requirements(image) }
    }

    fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> Result<()> {
        unsafe { self.logical.bind_image_memory(image, memory, offset)? };
        Ok(())
    }

    fn destroy_image(&self, image: vk::Image) {
        unsafe { self.logical.destroy_image(image, None) }
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> Result<vk::ImageView> {
        Ok(unsafe { self.logical.create_image_view(info, None)? })
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.logical.destroy_image_view(view, None) }
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> Result<vk::Buffer> {
        Ok(unsafe { self.logical.create_buffer(info, None)? })
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        unsafe { self.logical.get_buffer_memory_requirements(buffer) }
    }

    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> Result<()> {
        unsafe { self.logical.bind_buffer_memory(buffer, memory, offset)? };
        Ok(())
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.logical.destroy_buffer(buffer, None) }
    }

    fn upload_buffer_to_image(&self, upload: &ImageUpload<'_>) -> Result<()> {
        self.immediate_submit(|cmd, device| {
            record_image_upload(cmd, device, upload);
            Ok(())
        })
    }

    fn write_combined_image_samplers(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        first_element: u32,
        image_infos: &[vk::DescriptorImageInfo],
    ) {
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(binding)
            .dst_array_element(first_element)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(image_infos);
        unsafe {
            self.logical.update_descriptor_sets(&[write], &[]);
        }
    }
}

impl Drop for RenderDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.logical.device_wait_idle() {
                log::error!("Failed to wait for device idle on shutdown: {}", err);
            }

            ManuallyDrop::drop(&mut self.transfer_context);

            match self.descriptor_allocator.lock() {
                Ok(mut allocator) => allocator.cleanup(&self.descriptor_device()),
                Err(err) => log::error!("Descriptor allocator poisoned: {}", err),
            }

            // The allocator has to release its memory blocks before the device goes away
            if Arc::strong_count(&self.memory_allocator) > 1 {
                log::error!("Memory allocator still referenced while destroying the device");
            }
            ManuallyDrop::drop(&mut self.memory_allocator);

            self.logical.destroy_device(None);
        }
    }
}

/// Adapter letting `gpu-descriptor` create pools and sets on the ash device
pub struct DescriptorAshDevice(pub Arc<ash::Device>);

impl From<Arc<ash::Device>> for DescriptorAshDevice {
    fn from(device: Arc<ash::Device>) -> Self {
        Self(device)
    }
}

impl DescriptorDevice<vk::DescriptorSetLayout, vk::DescriptorPool, vk::DescriptorSet>
for DescriptorAshDevice
{
    unsafe fn create_descriptor_pool(
        &self,
        descriptor_count: &DescriptorTotalCount,
        max_sets: u32,
        flags: DescriptorPoolCreateFlags,
    ) -> Result<vk::DescriptorPool, CreatePoolError> {
        let counts = [
            (vk::DescriptorType::SAMPLER, descriptor_count.sampler),
            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, descriptor_count.combined_image_sampler),
            (vk::DescriptorType::SAMPLED_IMAGE, descriptor_count.sampled_image),
            (vk::DescriptorType::STORAGE_IMAGE, descriptor_count.storage_image),
            (vk::DescriptorType::UNIFORM_TEXEL_BUFFER, descriptor_count.uniform_texel_buffer),
            (vk::DescriptorType::STORAGE_TEXEL_BUFFER, descriptor_count.storage_texel_buffer),
            (vk::DescriptorType::UNIFORM_BUFFER, descriptor_count.uniform_buffer),
            (vk::DescriptorType::STORAGE_BUFFER, descriptor_count.storage_buffer),
            (vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, descriptor_count.uniform_buffer_dynamic),
            (vk::DescriptorType::STORAGE_BUFFER_DYNAMIC, descriptor_count.storage_buffer_dynamic),
            (vk::DescriptorType::INPUT_ATTACHMENT, descriptor_count.input_attachment),
            (vk::DescriptorType::ACCELERATION_STRUCTURE_KHR, descriptor_count.acceleration_structure),
        ];
        let pool_sizes: smallvec::SmallVec<[vk::DescriptorPoolSize; 12]> = counts
            .iter()
            .filter(|(_, count)| *count != 0)
            .map(|(ty, count)| vk::DescriptorPoolSize {
                ty: *ty,
                descriptor_count: *count,
            })
            .collect();

        if descriptor_count.inline_uniform_block_bytes != 0
            || descriptor_count.inline_uniform_block_bindings != 0
        {
            panic!("Inline uniform blocks are not supported");
        }

        let mut ash_flags = vk::DescriptorPoolCreateFlags::empty();

        if flags.contains(DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET) {
            ash_flags |= vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET;
        }

        if flags.contains(DescriptorPoolCreateFlags::UPDATE_AFTER_BIND) {
            ash_flags |= vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND;
        }

        let result = unsafe {
            self.0.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::default()
                    .max_sets(max_sets)
                    .pool_sizes(&pool_sizes)
                    .flags(ash_flags),
                None,
            )
        };

        match result {
            Ok(pool) => Ok(pool),
            Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY) => Err(CreatePoolError::OutOfDeviceMemory),
            Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY) => Err(CreatePoolError::OutOfHostMemory),
            Err(vk::Result::ERROR_FRAGMENTATION) => Err(CreatePoolError::Fragmentation),
            Err(err) => panic!("Unexpected return code '{}'", err),
        }
    }

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe {
            self.0.destroy_descriptor_pool(pool, None)
        }
    }

    unsafe fn alloc_descriptor_sets<'a>(
        &self,
        pool: &mut vk::DescriptorPool,
        layouts: impl ExactSizeIterator<Item = &'a vk::DescriptorSetLayout>,
        sets: &mut impl Extend<vk::DescriptorSet>,
    ) -> Result<(), DeviceAllocationError> {
        let set_layouts: smallvec::SmallVec<[_; 16]> = layouts.copied().collect();

        unsafe {
            match self.0.allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfo::default()
                    .set_layouts(&set_layouts)
                    .descriptor_pool(*pool),
            ) {
                Ok(allocated) => {
                    sets.extend(allocated);
                    Ok(())
                }
                Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY) => {
                    Err(DeviceAllocationError::OutOfHostMemory)
                }
                Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY) => {
                    Err(DeviceAllocationError::OutOfDeviceMemory)
                }
                Err(vk::Result::ERROR_FRAGMENTED_POOL) => Err(DeviceAllocationError::FragmentedPool),
                Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY) => Err(DeviceAllocationError::OutOfPoolMemory),
                Err(err) => panic!("Unexpected return code '{}'", err),
            }
        }
    }

    unsafe fn dealloc_descriptor_sets(
        &self,
        pool: &mut vk::DescriptorPool,
        sets: impl Iterator<Item = vk::DescriptorSet>,
    ) {
        let sets: smallvec::SmallVec<[_; 16]> = sets.collect();
        unsafe {
            if let Err(err) = self.0.free_descriptor_sets(*pool, &sets) {
                panic!("Unexpected return code '{}'", err);
            }
        }
    }
}

pub(crate) fn lock_poisoned<T>(err: std::sync::PoisonError<T>) -> color_eyre::Report {
    eyre!(err.to_string())
}
