use std::collections::HashMap;
use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::{ensure, eyre, OptionExt};
use gpu_descriptor::{DescriptorSetLayoutCreateFlags, DescriptorTotalCount};
use crate::renderer::contexts::device_ctx::device::{lock_poisoned, RenderDevice};
use crate::renderer::contexts::device_ctx::gpu_device::GpuDevice;
use crate::renderer::contexts::resource_ctx::descriptor_set_layout_builder::DescriptorSetLayoutBuilder;
use crate::renderer::resources::image::ImageHandle;

/// The two bindings of the global texture set.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TextureSlot {
    Texture2D,
    Cube,
}

impl TextureSlot {
    pub const ALL: &'static [Self] = &[Self::Texture2D, Self::Cube];

    pub fn binding(self) -> u32 {
        match self {
            Self::Texture2D => 0,
            Self::Cube => 1,
        }
    }

    fn index(self) -> usize {
        self.binding() as usize
    }
}

struct SlotIds {
    next_id: u32,
    ids: HashMap<ImageHandle, u32>,
    default_view: Option<vk::ImageView>,
}

impl SlotIds {
    fn new() -> Self {
        Self {
            next_id: 1,
            ids: HashMap::new(),
            default_view: None,
        }
    }
}

/// Maps live textures to indices of the shader-visible texture arrays.
///
/// Index 0 of each binding is reserved for the slot's default texture; live
/// textures get dense ids starting at 1, unique per binding.
pub struct GlobalTextureTable {
    descriptor_set: vk::DescriptorSet,
    sampler: vk::Sampler,
    capacity: u32,
    slots: [SlotIds; 2],
}

impl GlobalTextureTable {
    pub fn new(
        descriptor_set: vk::DescriptorSet,
        sampler: vk::Sampler,
        capacity: u32,
    ) -> Self {
        Self {
            descriptor_set,
            sampler,
            capacity,
            slots: [SlotIds::new(), SlotIds::new()],
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.descriptor_set
    }

    /// Returns the shader index of `handle`, 0 when unassigned.
    pub fn texture_id(&self, handle: ImageHandle) -> u32 {
        self.slots
            .iter()
            .find_map(|slot| slot.ids.get(&handle).copied())
            .unwrap_or(0)
    }

    pub fn assigned_count(&self, slot: TextureSlot) -> usize {
        self.slots[slot.index()].ids.len()
    }

    fn image_info(&self, view: vk::ImageView) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    /// Assigns the next free id of `slot` to `handle` and writes that single
    /// descriptor. Returns the existing id if `handle` was already registered.
    pub fn register_single(
        &mut self,
        device: &dyn GpuDevice,
        handle: ImageHandle,
        slot: TextureSlot,
        view: vk::ImageView,
    ) -> Result<u32> {
        if let Some(id) = self.slots[slot.index()].ids.get(&handle) {
            return Ok(*id);
        }

        let id = self.slots[slot.index()].next_id;
        ensure!(
            id < self.capacity,
            "Global texture table for {:?} is full ({} entries)",
            slot,
            self.capacity
        );

        let info = [self.image_info(view)];
        device.write_combined_image_samplers(self.descriptor_set, slot.binding(), id, &info);

        let ids = &mut self.slots[slot.index()];
        ids.next_id += 1;
        ids.ids.insert(handle, id);
        Ok(id)
    }

    /// Drops the id of `handle` and points its entry back at the slot default.
    pub fn release(
        &mut self,
        device: &dyn GpuDevice,
        handle: ImageHandle,
    ) {
        for slot in TextureSlot::ALL {
            let ids = &mut self.slots[slot.index()];
            let Some(id) = ids.ids.remove(&handle) else {
                continue;
            };
            if let Some(default_view) = ids.default_view {
                let info = [self.image_info(default_view)];
                device.write_combined_image_samplers(self.descriptor_set, slot.binding(), id, &info);
            }
        }
    }

    /// Reassigns every id from scratch.
    ///
    /// `entries` are visited in order and receive ids `1..=n` per slot. Every
    /// other element of both bindings is filled with the slot default, and
    /// each binding is written with a single update.
    pub fn rebuild(
        &mut self,
        device: &dyn GpuDevice,
        entries: &[(ImageHandle, TextureSlot, vk::ImageView)],
        default_2d: vk::ImageView,
        default_cube: vk::ImageView,
    ) -> Result<()> {
        let defaults = [default_2d, default_cube];
        let mut infos: Vec<Vec<vk::DescriptorImageInfo>> = defaults
            .iter()
            .map(|view| vec![self.image_info(*view); self.capacity as usize])
            .collect();

        for (slot, default_view) in self.slots.iter_mut().zip(defaults) {
            slot.ids.clear();
            slot.next_id = 1;
            slot.default_view = Some(default_view);
        }

        for (handle, slot, view) in entries {
            let ids = &mut self.slots[slot.index()];
            let id = ids.next_id;
            ensure!(
                id < self.capacity,
                "Global texture table for {:?} is full ({} entries)",
                slot,
                self.capacity
            );
            ids.next_id += 1;
            ids.ids.insert(*handle, id);
            infos[slot.index()][id as usize].image_view = *view;
        }

        for slot in TextureSlot::ALL {
            device.write_combined_image_samplers(
                self.descriptor_set,
                slot.binding(),
                0,
                &infos[slot.index()],
            );
        }

        log::debug!(
            "Rebuilt global texture table: {} 2D, {} cube",
            self.assigned_count(TextureSlot::Texture2D),
            self.assigned_count(TextureSlot::Cube)
        );

        Ok(())
    }
}

/// Device objects behind the global texture table: the two-binding layout,
/// the descriptor set allocated from it and the shared sampler.
pub struct GlobalTextureLayout {
    pub layout: vk::DescriptorSetLayout,
    pub sampler: vk::Sampler,
    pub capacity: u32,
    descriptor_set: Option<gpu_descriptor::DescriptorSet<vk::DescriptorSet>>,
}

impl GlobalTextureLayout {
    pub fn new(
        device: &RenderDevice,
        capacity: u32,
    ) -> Result<Self> {
        let layout = TextureSlot::ALL
            .iter()
            .fold(DescriptorSetLayoutBuilder::new(), |builder, slot| {
                builder.add_bindless_binding(
                    slot.binding(),
                    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    capacity,
                    vk::ShaderStageFlags::FRAGMENT,
                )
            })
            .build(
                vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL,
                &device.logical,
            )?;

        let descriptor_set = unsafe {
            device
                .descriptor_allocator()
                .lock()
                .map_err(lock_poisoned)?
                .allocate(
                    &device.descriptor_device(),
                    &layout,
                    DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND,
                    &DescriptorTotalCount {
                        combined_image_sampler: capacity * TextureSlot::ALL.len() as u32,
                        ..Default::default()
                    },
                    1,
                )?
                .drain(..)
                .next()
                .ok_or_eyre("Failed to allocate global texture descriptor set")?
        };

        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .max_lod(vk::LOD_CLAMP_NONE);
        let sampler = unsafe { device.logical.create_sampler(&sampler_info, None)? };

        log::info!("Created global texture table with {} entries per binding", capacity);

        Ok(Self {
            layout,
            sampler,
            capacity,
            descriptor_set: Some(descriptor_set),
        })
    }

    pub fn create_table(&self) -> Result<GlobalTextureTable> {
        let set = self.descriptor_set
            .as_ref()
            .ok_or_else(|| eyre!("Global texture layout already destroyed"))?;
        Ok(GlobalTextureTable::new(*set.raw(), self.sampler, self.capacity))
    }

    pub fn destroy(&mut self, device: &RenderDevice) -> Result<()> {
        if let Some(set) = self.descriptor_set.take() {
            unsafe {
                device
                    .descriptor_allocator()
                    .lock()
                    .map_err(lock_poisoned)?
                    .free(&device.descriptor_device(), Some(set));
            }
        }
        unsafe {
            device.logical.destroy_sampler(self.sampler, None);
            device.logical.destroy_descriptor_set_layout(self.layout, None);
        }
        Ok(())
    }
}
