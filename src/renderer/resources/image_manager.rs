use std::collections::HashMap;
use std::path::PathBuf;
use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::{bail, ensure, eyre, OptionExt};
use glam::UVec3;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use slotmap::SlotMap;
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::device_ctx::gpu_device::GpuDevice;
use crate::renderer::contexts::resource_ctx::GpuContext;
use crate::renderer::contexts::resource_ctx::registry::ResourceKind;
use crate::renderer::internals::bindless::{GlobalTextureTable, TextureSlot};
use crate::renderer::internals::format::Format;
use crate::renderer::internals::memory::{
    allocate_memory, can_reuse_allocation, GpuMemoryAllocation, GpuMemoryManager, MemoryPoolType,
    RetiredAllocations,
};
use crate::renderer::internals::upload::upload_to_image;
use crate::renderer::resources::image::{
    attachment_features, image_usage, select_tiling, ImageDescriptor, ImageFlags, ImageHandle,
    ImageRecord, ImageTextureType, ImageType,
};
use crate::renderer::resources::texture::{TextureContainer, TextureTarget};

/// Where texture files live and which textures fill the table defaults.
struct TextureLocations {
    directory: PathBuf,
    extension: String,
    fallback_2d: String,
    fallback_cube: String,
}

/// Where the pixels of a file-backed texture come from.
#[derive(Debug, PartialEq)]
enum TextureSource {
    File(PathBuf),
    /// The requested file is missing and the checkerboard file replaces it
    Fallback(PathBuf),
    Generated,
}

impl TextureLocations {
    /// `name` may itself contain dots, so the extension is appended rather
    /// than substituted.
    fn path_of(&self, name: &str) -> PathBuf {
        self.directory.join(format!("{}.{}", name, self.extension))
    }

    fn resolve(&self, name: &str, target: TextureTarget) -> TextureSource {
        let path = self.path_of(name);
        if path.exists() {
            return TextureSource::File(path);
        }

        let fallback_path = self.path_of(&self.fallback_2d);
        if target == TextureTarget::Texture2D && fallback_path.exists() {
            log::warn!(
                "Texture {} not found, using {}",
                path.display(),
                fallback_path.display()
            );
            return TextureSource::Fallback(fallback_path);
        }

        log::warn!(
            "Texture {} not found, using a generated checkerboard",
            path.display()
        );
        TextureSource::Generated
    }

    /// Loads `name`, substituting the checkerboard when the file is missing.
    fn load(&self, name: &str, target: TextureTarget) -> Result<TextureContainer> {
        match self.resolve(name, target) {
            TextureSource::File(path) | TextureSource::Fallback(path) => {
                TextureContainer::load(&path)
            }
            TextureSource::Generated => Ok(TextureContainer::checkerboard(target)),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct NamedImageDescriptor {
    name: String,
    descriptor: ImageDescriptor,
}

/// Owns every [`ImageRecord`] and the Vulkan objects created for them.
pub struct ImageManager {
    records: SlotMap<ImageHandle, ImageRecord>,
    /// Registration order, which is also the order of bindless ids
    active: Vec<ImageHandle>,
    names: HashMap<String, ImageHandle>,
    /// Memory of forgotten records, handed to the next compatible image
    retired: RetiredAllocations,
    locations: TextureLocations,
}

impl ImageManager {
    pub fn new(config: &RenderConfig) -> Self {
        log::info!(
            "Image manager reading textures from {}",
            config.texture_directory.display()
        );

        Self {
            records: SlotMap::with_key(),
            active: Vec::new(),
            names: HashMap::new(),
            retired: RetiredAllocations::default(),
            locations: TextureLocations {
                directory: config.texture_directory.clone(),
                extension: config.texture_extension.clone(),
                fallback_2d: config.fallback_texture_2d.clone(),
                fallback_cube: config.fallback_texture_cube.clone(),
            },
        }
    }

    pub fn create_image(
        &mut self,
        name: &str,
        descriptor: ImageDescriptor,
    ) -> Result<ImageHandle> {
        ensure!(
            !self.names.contains_key(name),
            "Image {} is already registered",
            name
        );

        let handle = self.records.insert(ImageRecord::new(name.to_owned(), descriptor));
        self.active.push(handle);
        self.names.insert(name.to_owned(), handle);
        Ok(handle)
    }

    /// Forgets a record. Its GPU objects must have been destroyed already.
    pub fn destroy_image(&mut self, handle: ImageHandle) -> Result<()> {
        let record = self.record(handle)?;
        ensure!(
            !record.has_resources(),
            "Image {} still owns GPU resources",
            record.name
        );

        if let Some(record) = self.records.remove(handle) {
            self.names.remove(&record.name);
            if let Some(allocation) = record.memory_allocation {
                self.retired.retire(allocation);
            }
        }
        self.active.retain(|h| *h != handle);
        Ok(())
    }

    pub fn resource_by_name(&self, name: &str) -> Option<ImageHandle> {
        self.names.get(name).copied()
    }

    pub fn active_resources(&self) -> &[ImageHandle] {
        &self.active
    }

    pub fn is_alive(&self, handle: ImageHandle) -> bool {
        self.records.contains_key(handle)
    }

    pub fn record(&self, handle: ImageHandle) -> Result<&ImageRecord> {
        self.records
            .get(handle)
            .ok_or_else(|| eyre!("Stale image handle {:?}", handle))
    }

    pub fn descriptor(&self, handle: ImageHandle) -> Result<&ImageDescriptor> {
        Ok(&self.record(handle)?.descriptor)
    }

    /// Descriptors are frozen once the image exists.
    pub fn descriptor_mut(&mut self, handle: ImageHandle) -> Result<&mut ImageDescriptor> {
        let record = self.records
            .get_mut(handle)
            .ok_or_else(|| eyre!("Stale image handle {:?}", handle))?;
        ensure!(
            !record.has_resources(),
            "Image {} cannot change after its resources were created",
            record.name
        );
        Ok(&mut record.descriptor)
    }

    pub fn image(&self, handle: ImageHandle) -> Option<vk::Image> {
        self.records.get(handle).and_then(|r| r.image)
    }

    pub fn image_view(&self, handle: ImageHandle) -> Option<vk::ImageView> {
        self.records.get(handle).and_then(|r| r.image_view)
    }

    pub fn image_view_gamma(&self, handle: ImageHandle) -> Option<vk::ImageView> {
        self.records.get(handle).and_then(|r| r.image_view_gamma)
    }

    pub fn image_view_linear(&self, handle: ImageHandle) -> Option<vk::ImageView> {
        self.records.get(handle).and_then(|r| r.image_view_linear)
    }

    pub fn sub_resource_view(
        &self,
        handle: ImageHandle,
        layer: u32,
        mip: u32,
    ) -> Option<vk::ImageView> {
        self.records
            .get(handle)?
            .sub_resource_views
            .get(layer as usize)?
            .get(mip as usize)
            .copied()
    }

    pub fn texture_type(&self, handle: ImageHandle) -> Option<ImageTextureType> {
        self.records.get(handle).and_then(|r| r.texture_type)
    }

    pub fn tiling(&self, handle: ImageHandle) -> Option<vk::ImageTiling> {
        self.records.get(handle).and_then(|r| r.tiling)
    }

    pub fn memory_allocation(&self, handle: ImageHandle) -> Option<GpuMemoryAllocation> {
        self.records.get(handle).and_then(|r| r.memory_allocation)
    }

    pub fn get_texture_id(&self, handle: ImageHandle, textures: &GlobalTextureTable) -> u32 {
        textures.texture_id(handle)
    }

    pub fn compile_descriptor(&self, handle: ImageHandle) -> Result<Value> {
        Ok(serde_json::to_value(self.descriptor(handle)?)?)
    }

    pub fn init_from_descriptor(&mut self, handle: ImageHandle, value: &Value) -> Result<()> {
        let descriptor: ImageDescriptor = serde_json::from_value(value.clone())?;
        *self.descriptor_mut(handle)? = descriptor;
        Ok(())
    }

    /// Creates the Vulkan objects of every non-external image in `images`.
    pub fn create_resources(
        &mut self,
        images: &[ImageHandle],
        ctx: &mut GpuContext<'_>,
    ) -> Result<()> {
        for handle in images {
            let record = self.records
                .get_mut(*handle)
                .ok_or_else(|| eyre!("Stale image handle {:?}", handle))?;

            if record.descriptor.image_type == ImageType::External {
                continue;
            }
            ensure!(
                !record.has_resources(),
                "Resources of image {} were already created",
                record.name
            );

            match record.descriptor.image_type {
                ImageType::Texture => create_texture(record, &mut self.retired, ctx)?,
                ImageType::TextureFromFile => {
                    let slot = create_texture_from_file(
                        record,
                        &self.locations,
                        &mut self.retired,
                        ctx,
                    )?;
                    let view = record.image_view.ok_or_eyre("Texture has no view")?;
                    ctx.textures.register_single(ctx.device, *handle, slot, view)?;
                }
                ImageType::External => {}
            }

            log::debug!(
                "Created image {} ({} {:?}, {:?})",
                record.name,
                record.descriptor.dimensions,
                record.descriptor.image_format,
                record.texture_type
            );
        }
        Ok(())
    }

    /// Destroys views and images. Memory allocations stay on the record so a
    /// later re-creation can reuse them.
    pub fn destroy_resources(
        &mut self,
        images: &[ImageHandle],
        ctx: &mut GpuContext<'_>,
    ) -> Result<()> {
        for handle in images {
            let record = self.records
                .get_mut(*handle)
                .ok_or_else(|| eyre!("Stale image handle {:?}", handle))?;
            if record.descriptor.image_type == ImageType::External {
                continue;
            }

            ctx.textures.release(ctx.device, *handle);

            for view in record.sub_resource_views.drain(..).flatten() {
                ctx.device.destroy_image_view(view);
            }
            for view in [
                record.image_view.take(),
                record.image_view_gamma.take(),
                record.image_view_linear.take(),
            ].into_iter().flatten() {
                ctx.device.destroy_image_view(view);
            }
            if let Some(image) = record.image.take() {
                ctx.device.destroy_image(image);
            }
            record.texture_type = None;
            record.tiling = None;
        }
        Ok(())
    }

    /// Reassigns all bindless ids from the active file-backed textures.
    pub fn update_global_descriptor_sets(&self, ctx: &mut GpuContext<'_>) -> Result<()> {
        let default_view = |name: &str| {
            self.resource_by_name(name)
                .and_then(|handle| self.image_view(handle))
                .ok_or_else(|| eyre!("Default texture {} has not been created", name))
        };
        let default_2d = default_view(&self.locations.fallback_2d)?;
        let default_cube = default_view(&self.locations.fallback_cube)?;

        let entries: Vec<_> = self.active
            .iter()
            .filter_map(|handle| {
                let record = self.records.get(*handle)?;
                if record.descriptor.image_type != ImageType::TextureFromFile {
                    return None;
                }
                let slot = match record.texture_type? {
                    ImageTextureType::Cube => TextureSlot::Cube,
                    _ => TextureSlot::Texture2D,
                };
                Some((*handle, slot, record.image_view?))
            })
            .collect();

        ctx.textures.rebuild(ctx.device, &entries, default_2d, default_cube)
    }
}

fn create_view(
    device: &dyn GpuDevice,
    image: vk::Image,
    view_type: vk::ImageViewType,
    format: vk::Format,
    subresource_range: vk::ImageSubresourceRange,
) -> Result<vk::ImageView> {
    let info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(view_type)
        .format(format)
        .subresource_range(subresource_range);
    device.create_image_view(&info)
}

fn create_sub_resource_views(
    device: &dyn GpuDevice,
    record: &mut ImageRecord,
    image: vk::Image,
    view_type: vk::ImageViewType,
    format: Format,
) -> Result<()> {
    let descriptor = &record.descriptor;
    let mut views = Vec::with_capacity(descriptor.array_layer_count as usize);
    for layer in 0..descriptor.array_layer_count {
        let mut mips = Vec::with_capacity(descriptor.mip_level_count as usize);
        for mip in 0..descriptor.mip_level_count {
            let range = vk::ImageSubresourceRange {
                aspect_mask: format.aspect(),
                base_mip_level: mip,
                level_count: 1,
                base_array_layer: layer,
                layer_count: 1,
            };
            mips.push(create_view(device, image, view_type, format.to_vk(), range)?);
        }
        views.push(mips);
    }
    record.sub_resource_views = views;
    Ok(())
}

/// Binds memory for `record`, preferring its own previous allocation, then a
/// retired one, then fresh memory from the pool.
fn allocate_image_memory(
    record: &mut ImageRecord,
    retired: &mut RetiredAllocations,
    pool: MemoryPoolType,
    requirements: &vk::MemoryRequirements,
    linear: bool,
    memory: &mut dyn GpuMemoryManager,
) -> Result<GpuMemoryAllocation> {
    let keeps_own = record.memory_allocation
        .as_ref()
        .is_some_and(|a| can_reuse_allocation(a, pool, requirements, linear));
    if !keeps_own {
        let previous = match retired.take(pool, requirements, linear) {
            Some(adopted) => {
                log::trace!(
                    "Image {} adopts a retired {} byte allocation",
                    record.name,
                    adopted.size_in_bytes
                );
                record.memory_allocation.replace(adopted)
            }
            None => record.memory_allocation.take(),
        };
        if let Some(previous) = previous {
            retired.retire(previous);
        }
    }

    allocate_memory(&mut record.memory_allocation, pool, requirements, linear, memory)
}

fn create_texture(
    record: &mut ImageRecord,
    retired: &mut RetiredAllocations,
    ctx: &mut GpuContext<'_>,
) -> Result<()> {
    let descriptor = record.descriptor.clone();
    let format = descriptor.image_format;
    ensure!(descriptor.mip_level_count >= 1, "Image {} needs at least one mip", record.name);
    let texture_type = ImageTextureType::classify(descriptor.dimensions, descriptor.array_layer_count)?;

    let properties = ctx.device.format_properties(format.to_vk());
    let mut required = vk::FormatFeatureFlags::empty();
    if descriptor.image_flags.contains(ImageFlags::USAGE_ATTACHMENT) {
        required |= attachment_features(format);
    }
    let tiling = select_tiling(&properties, required)?;
    let usage = image_usage(format, descriptor.image_flags, &properties, tiling)?;

    let mutable_views = format.mutable_views();
    let flags = if mutable_views.is_some() {
        vk::ImageCreateFlags::MUTABLE_FORMAT
    } else {
        vk::ImageCreateFlags::empty()
    };

    let info = vk::ImageCreateInfo::default()
        .image_type(texture_type.image_type())
        .format(format.to_vk())
        .extent(vk::Extent3D {
            width: descriptor.dimensions.x,
            height: descriptor.dimensions.y,
            depth: descriptor.dimensions.z,
        })
        .mip_levels(descriptor.mip_level_count)
        .array_layers(descriptor.array_layer_count)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(tiling)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .flags(flags);
    let image = ctx.device.create_image(&info)?;
    record.image = Some(image);
    record.texture_type = Some(texture_type);
    record.tiling = Some(tiling);

    let requirements = ctx.device.image_memory_requirements(image);
    let allocation = allocate_image_memory(
        record,
        retired,
        descriptor.memory_pool_type,
        &requirements,
        tiling == vk::ImageTiling::LINEAR,
        ctx.memory,
    )?;
    ctx.device.bind_image_memory(image, allocation.memory, allocation.offset)?;

    create_sub_resource_views(
        ctx.device,
        record,
        image,
        texture_type.sub_resource_view_type(),
        format,
    )?;

    let full_range = vk::ImageSubresourceRange {
        aspect_mask: format.aspect(),
        base_mip_level: 0,
        level_count: descriptor.mip_level_count,
        base_array_layer: 0,
        layer_count: descriptor.array_layer_count,
    };
    record.image_view = Some(create_view(
        ctx.device,
        image,
        texture_type.view_type(),
        format.to_vk(),
        full_range,
    )?);

    if let Some((gamma, linear)) = mutable_views {
        record.image_view_gamma = Some(create_view(
            ctx.device,
            image,
            texture_type.view_type(),
            gamma,
            full_range,
        )?);
        record.image_view_linear = Some(create_view(
            ctx.device,
            image,
            texture_type.view_type(),
            linear,
            full_range,
        )?);
    }

    Ok(())
}

fn create_texture_from_file(
    record: &mut ImageRecord,
    locations: &TextureLocations,
    retired: &mut RetiredAllocations,
    ctx: &mut GpuContext<'_>,
) -> Result<TextureSlot> {
    let file_name = record.descriptor.file_name.clone().unwrap_or_else(|| record.name.clone());
    let target = if record.name == locations.fallback_cube || file_name == locations.fallback_cube {
        TextureTarget::Cube
    } else {
        TextureTarget::Texture2D
    };
    let texture = locations.load(&file_name, target)?;

    // The file decides what the image looks like
    let descriptor = &mut record.descriptor;
    descriptor.image_format = texture.format;
    descriptor.dimensions = UVec3::new(texture.width, texture.height, 1);
    descriptor.mip_level_count = texture.mip_levels;
    descriptor.array_layer_count = texture.faces;
    descriptor.image_flags |= ImageFlags::USAGE_SAMPLED;
    let memory_pool_type = descriptor.memory_pool_type;

    let format = texture.format;
    let properties = ctx.device.format_properties(format.to_vk());
    if !properties.optimal_tiling_features.contains(vk::FormatFeatureFlags::SAMPLED_IMAGE) {
        bail!("{:?} cannot be sampled with optimal tiling", format);
    }

    let is_cube = texture.target == TextureTarget::Cube;
    let info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(format.to_vk())
        .extent(vk::Extent3D {
            width: texture.width,
            height: texture.height,
            depth: 1,
        })
        .mip_levels(texture.mip_levels)
        .array_layers(texture.faces)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .flags(if is_cube {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        });
    let image = ctx.device.create_image(&info)?;
    record.image = Some(image);
    record.tiling = Some(vk::ImageTiling::OPTIMAL);

    let requirements = ctx.device.image_memory_requirements(image);
    let allocation = allocate_image_memory(
        record,
        retired,
        memory_pool_type,
        &requirements,
        false,
        ctx.memory,
    )?;
    ctx.device.bind_image_memory(image, allocation.memory, allocation.offset)?;

    let full_range = vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: texture.mip_levels,
        base_array_layer: 0,
        layer_count: texture.faces,
    };
    let regions = texture.copy_regions();
    upload_to_image(ctx.device, ctx.memory, image, full_range, &regions, &texture.data)?;

    let (texture_type, slot) = if is_cube {
        (ImageTextureType::Cube, TextureSlot::Cube)
    } else {
        (ImageTextureType::Tex2D, TextureSlot::Texture2D)
    };
    record.texture_type = Some(texture_type);

    create_sub_resource_views(
        ctx.device,
        record,
        image,
        texture_type.sub_resource_view_type(),
        format,
    )?;
    record.image_view = Some(create_view(
        ctx.device,
        image,
        texture_type.view_type(),
        format.to_vk(),
        full_range,
    )?);

    Ok(slot)
}

impl ResourceKind for ImageManager {
    fn kind_name(&self) -> &'static str {
        "Image"
    }

    fn active_resource_count(&self) -> usize {
        self.active.len()
    }

    fn create_all_resources(&mut self, ctx: &mut GpuContext<'_>) -> Result<()> {
        let pending: Vec<ImageHandle> = self.active
            .iter()
            .copied()
            .filter(|handle| self.records.get(*handle).is_some_and(|r| !r.has_resources()))
            .collect();
        self.create_resources(&pending, ctx)?;
        self.update_global_descriptor_sets(ctx)
    }

    fn destroy_all_resources(&mut self, ctx: &mut GpuContext<'_>) -> Result<()> {
        let active = self.active.clone();
        self.destroy_resources(&active, ctx)
    }

    fn save_descriptors(&self) -> Result<Value> {
        let named = self.active
            .iter()
            .map(|handle| {
                let record = self.record(*handle)?;
                Ok(NamedImageDescriptor {
                    name: record.name.clone(),
                    descriptor: record.descriptor.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(serde_json::to_value(named)?)
    }

    fn load_descriptors(&mut self, value: &Value) -> Result<()> {
        let named: Vec<NamedImageDescriptor> = serde_json::from_value(value.clone())?;
        for entry in named {
            match self.resource_by_name(&entry.name) {
                Some(handle) => *self.descriptor_mut(handle)? = entry.descriptor,
                None => {
                    self.create_image(&entry.name, entry.descriptor)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::testing::{encode_rgba8_dds, CountingMemory, MockDevice};
    use ash::vk::Handle;

    fn texture_dir(test: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("intrinsic_images_{}_{}", test, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn config(dir: PathBuf) -> RenderConfig {
        RenderConfig {
            texture_directory: dir,
            ..Default::default()
        }
    }

    fn table() -> GlobalTextureTable {
        GlobalTextureTable::new(vk::DescriptorSet::from_raw(1), vk::Sampler::from_raw(2), 64)
    }

    #[test]
    fn sampled_2d_image_gets_one_sub_view_and_one_primary_view() {
        let device = MockDevice::default();
        let mut memory = CountingMemory::default();
        let mut textures = table();
        let mut manager = ImageManager::new(&config(texture_dir("sampled")));

        let handle = manager.create_image(
            "hdr_target",
            ImageDescriptor::texture(Format::R16G16B16A16Float, UVec3::new(256, 256, 1), ImageFlags::USAGE_SAMPLED),
        ).unwrap();
        let mut ctx = GpuContext { device: &device, memory: &mut memory, textures: &mut textures };
        manager.create_resources(&[handle], &mut ctx).unwrap();

        let record = manager.record(handle).unwrap();
        assert_eq!(record.sub_resource_views.len(), 1);
        assert_eq!(record.sub_resource_views[0].len(), 1);
        assert!(record.image_view.is_some());
        assert!(record.image_view_gamma.is_none());
        assert_eq!(manager.tiling(handle), Some(vk::ImageTiling::OPTIMAL));
        assert_eq!(manager.texture_type(handle), Some(ImageTextureType::Tex2D));
        assert_eq!(device.live_views(), 2);

        let image = device.image(manager.image(handle).unwrap()).unwrap();
        assert!(image.usage.contains(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST));
    }

    #[test]
    fn srgb_capable_formats_get_gamma_and_linear_views() {
        let device = MockDevice::default();
        let mut memory = CountingMemory::default();
        let mut textures = table();
        let mut manager = ImageManager::new(&config(texture_dir("mutable")));

        let handle = manager.create_image(
            "albedo",
            ImageDescriptor {
                image_format: Format::R8G8B8A8Unorm,
                dimensions: UVec3::new(64, 64, 1),
                image_flags: ImageFlags::USAGE_SAMPLED | ImageFlags::USAGE_ATTACHMENT,
                mip_level_count: 3,
                array_layer_count: 2,
                ..Default::default()
            },
        ).unwrap();
        let mut ctx = GpuContext { device: &device, memory: &mut memory, textures: &mut textures };
        manager.create_resources(&[handle], &mut ctx).unwrap();

        let image = device.image(manager.image(handle).unwrap()).unwrap();
        assert!(image.flags.contains(vk::ImageCreateFlags::MUTABLE_FORMAT));
        assert_eq!(manager.texture_type(handle), Some(ImageTextureType::Tex2DArray));

        let views = device.views_of(image.handle);
        assert_eq!(views.len(), 2 * 3 + 3);
        let gamma = manager.image_view_gamma(handle).unwrap();
        let linear = manager.image_view_linear(handle).unwrap();
        assert!(views.iter().any(|v| v.handle == gamma && v.format == vk::Format::R8G8B8A8_SRGB));
        assert!(views.iter().any(|v| v.handle == linear && v.format == vk::Format::R8G8B8A8_UNORM));

        let sub = manager.sub_resource_view(handle, 1, 2).unwrap();
        let sub = views.iter().find(|v| v.handle == sub).unwrap();
        assert_eq!((sub.range.base_array_layer, sub.range.base_mip_level), (1, 2));
        assert_eq!(sub.view_type, vk::ImageViewType::TYPE_2D);
    }

    #[test]
    fn linear_tiling_only_when_optimal_lacks_the_attachment_feature() {
        let device = MockDevice::default().with_format_properties(
            vk::Format::R32_SFLOAT,
            vk::FormatProperties {
                linear_tiling_features: vk::FormatFeatureFlags::COLOR_ATTACHMENT,
                optimal_tiling_features: vk::FormatFeatureFlags::SAMPLED_IMAGE,
                buffer_features: vk::FormatFeatureFlags::empty(),
            },
        );
        let mut memory = CountingMemory::default();
        let mut textures = table();
        let mut manager = ImageManager::new(&config(texture_dir("tiling")));

        let handle = manager.create_image(
            "mask",
            ImageDescriptor::texture(Format::R32Float, UVec3::new(32, 32, 1), ImageFlags::USAGE_ATTACHMENT),
        ).unwrap();
        let mut ctx = GpuContext { device: &device, memory: &mut memory, textures: &mut textures };
        manager.create_resources(&[handle], &mut ctx).unwrap();
        assert_eq!(manager.tiling(handle), Some(vk::ImageTiling::LINEAR));
        // Linear images get memory apart from optimal ones
        assert!(memory.requests[0].3);

        // Sampling is not available with linear tiling
        let sampled = manager.create_image(
            "mask_sampled",
            ImageDescriptor::texture(
                Format::R32Float,
                UVec3::new(32, 32, 1),
                ImageFlags::USAGE_ATTACHMENT | ImageFlags::USAGE_SAMPLED,
            ),
        ).unwrap();
        let mut ctx = GpuContext { device: &device, memory: &mut memory, textures: &mut textures };
        assert!(manager.create_resources(&[sampled], &mut ctx).is_err());
    }

    #[test]
    fn recreating_a_static_image_reuses_its_memory() {
        let device = MockDevice::default();
        let mut memory = CountingMemory::default();
        let mut textures = table();
        let mut manager = ImageManager::new(&config(texture_dir("reuse")));

        let handle = manager.create_image(
            "shadow_map",
            ImageDescriptor::texture(Format::D32Float, UVec3::new(512, 512, 1), ImageFlags::USAGE_ATTACHMENT),
        ).unwrap();
        let mut ctx = GpuContext { device: &device, memory: &mut memory, textures: &mut textures };
        manager.create_resources(&[handle], &mut ctx).unwrap();
        let first = manager.memory_allocation(handle).unwrap();
        manager.destroy_resources(&[handle], &mut ctx).unwrap();
        manager.create_resources(&[handle], &mut ctx).unwrap();

        assert_eq!(manager.memory_allocation(handle), Some(first));
        assert_eq!(memory.requests.len(), 1);
        assert_eq!(device.destroyed_images.borrow().len(), 1);
    }

    #[test]
    fn creating_twice_without_destroy_fails() {
        let device = MockDevice::default();
        let mut memory = CountingMemory::default();
        let mut textures = table();
        let mut manager = ImageManager::new(&config(texture_dir("twice")));

        let handle = manager.create_image("target", ImageDescriptor::default()).unwrap();
        let mut ctx = GpuContext { device: &device, memory: &mut memory, textures: &mut textures };
        manager.create_resources(&[handle], &mut ctx).unwrap();
        assert!(manager.create_resources(&[handle], &mut ctx).is_err());
        assert!(manager.destroy_image(handle).is_err());
        assert!(manager.descriptor_mut(handle).is_err());

        manager.destroy_resources(&[handle], &mut ctx).unwrap();
        manager.destroy_image(handle).unwrap();
        assert!(!manager.is_alive(handle));
        assert!(manager.resource_by_name("target").is_none());
        assert_eq!(device.live_views(), 0);
    }

    #[test]
    fn external_images_are_left_alone() {
        let device = MockDevice::default();
        let mut memory = CountingMemory::default();
        let mut textures = table();
        let mut manager = ImageManager::new(&config(texture_dir("external")));

        let handle = manager.create_image(
            "swapchain",
            ImageDescriptor { image_type: ImageType::External, ..Default::default() },
        ).unwrap();
        let mut ctx = GpuContext { device: &device, memory: &mut memory, textures: &mut textures };
        manager.create_resources(&[handle], &mut ctx).unwrap();
        manager.destroy_resources(&[handle], &mut ctx).unwrap();

        assert!(device.images.borrow().is_empty());
        assert!(memory.requests.is_empty());
    }

    #[test]
    fn missing_texture_falls_back_to_checkerboard_file() {
        let dir = texture_dir("fallback");
        std::fs::write(dir.join("checkerboard.dds"), encode_rgba8_dds(16, 16, 1, false)).unwrap();

        let device = MockDevice::default();
        let mut memory = CountingMemory::default();
        let mut textures = table();
        let mut manager = ImageManager::new(&config(dir.clone()));
        assert_eq!(
            manager.locations.resolve("doesnotexist", TextureTarget::Texture2D),
            TextureSource::Fallback(dir.join("checkerboard.dds"))
        );

        let handle = manager.create_image(
            "doesnotexist",
            ImageDescriptor::texture_from_file("doesnotexist"),
        ).unwrap();
        let mut ctx = GpuContext { device: &device, memory: &mut memory, textures: &mut textures };
        manager.create_resources(&[handle], &mut ctx).unwrap();

        // The checkerboard file, not the generated 64x64 one
        let descriptor = manager.descriptor(handle).unwrap();
        assert_eq!(descriptor.dimensions, UVec3::new(16, 16, 1));
        assert_eq!(descriptor.image_format, Format::R8G8B8A8Unorm);
        assert_eq!(manager.texture_type(handle), Some(ImageTextureType::Tex2D));
        assert_eq!(manager.get_texture_id(handle, &textures), 1);

        let uploads = device.uploads.borrow();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].regions.len(), 1);
        assert_eq!(memory.resets, vec![MemoryPoolType::VolatileStagingBuffers]);
    }

    #[test]
    fn missing_cube_and_missing_checkerboard_are_generated() {
        let dir = texture_dir("generated");
        std::fs::write(dir.join("checkerboard.dds"), encode_rgba8_dds(16, 16, 1, false)).unwrap();
        let manager = ImageManager::new(&config(dir.clone()));

        assert_eq!(
            manager.locations.resolve("missing_sky", TextureTarget::Cube),
            TextureSource::Generated
        );

        let empty = ImageManager::new(&config(texture_dir("generated_empty")));
        assert_eq!(
            empty.locations.resolve("missing", TextureTarget::Texture2D),
            TextureSource::Generated
        );
    }

    #[test]
    fn dotted_names_keep_their_suffix() {
        let dir = texture_dir("dotted");
        std::fs::write(dir.join("rock.v2.dds"), encode_rgba8_dds(8, 8, 1, false)).unwrap();
        let manager = ImageManager::new(&config(dir.clone()));

        assert_eq!(manager.locations.path_of("rock.v2"), dir.join("rock.v2.dds"));
        assert_eq!(
            manager.locations.resolve("rock.v2", TextureTarget::Texture2D),
            TextureSource::File(dir.join("rock.v2.dds"))
        );
    }

    #[test]
    fn reloading_a_forgotten_texture_reuses_its_memory() {
        let device = MockDevice::default();
        let mut memory = CountingMemory::default();
        let mut textures = table();
        let mut manager = ImageManager::new(&config(texture_dir("reload")));

        for _ in 0..3 {
            let handle = manager.create_image("rock", ImageDescriptor::texture_from_file("rock")).unwrap();
            let mut ctx = GpuContext { device: &device, memory: &mut memory, textures: &mut textures };
            manager.create_resources(&[handle], &mut ctx).unwrap();
            manager.destroy_resources(&[handle], &mut ctx).unwrap();
            manager.destroy_image(handle).unwrap();
        }

        let static_requests = memory.requests
            .iter()
            .filter(|r| r.0 == MemoryPoolType::StaticImages)
            .count();
        assert_eq!(static_requests, 1);
        assert_eq!(manager.retired.len(), 1);
    }

    #[test]
    fn cube_file_uploads_every_face_and_mip() {
        let dir = texture_dir("cube");
        std::fs::write(dir.join("sky.dds"), encode_rgba8_dds(32, 32, 4, true)).unwrap();

        let device = MockDevice::default();
        let mut memory = CountingMemory::default();
        let mut textures = table();
        let mut manager = ImageManager::new(&config(dir));

        let handle = manager.create_image("sky", ImageDescriptor::texture_from_file("sky")).unwrap();
        let mut ctx = GpuContext { device: &device, memory: &mut memory, textures: &mut textures };
        manager.create_resources(&[handle], &mut ctx).unwrap();

        let uploads = device.uploads.borrow();
        assert_eq!(uploads[0].regions.len(), 24);
        assert_eq!(uploads[0].range.layer_count, 6);
        assert_eq!(uploads[0].range.level_count, 4);

        let image = device.image(manager.image(handle).unwrap()).unwrap();
        assert_eq!(image.array_layers, 6);
        assert!(image.flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE));

        let view = manager.image_view(handle).unwrap();
        let view = device.views_of(image.handle).into_iter().find(|v| v.handle == view).unwrap();
        assert_eq!(view.view_type, vk::ImageViewType::CUBE);
        assert_eq!(view.range.layer_count, 6);
        assert_eq!(manager.texture_type(handle), Some(ImageTextureType::Cube));
        assert_eq!(textures.texture_id(handle), 1);
    }

    #[test]
    fn rebuild_assigns_ids_in_registration_order() {
        let dir = texture_dir("rebuild");
        let device = MockDevice::default();
        let mut memory = CountingMemory::default();
        let mut textures = table();
        let mut manager = ImageManager::new(&config(dir));

        // Neither file exists: both defaults are generated
        let checkerboard = manager.create_image("checkerboard", ImageDescriptor::texture_from_file("checkerboard")).unwrap();
        let cube = manager.create_image("default_ibl_cube_specular", ImageDescriptor::texture_from_file("default_ibl_cube_specular")).unwrap();
        let rock = manager.create_image("rock", ImageDescriptor::texture_from_file("rock")).unwrap();
        let target = manager.create_image("target", ImageDescriptor::default()).unwrap();

        let mut ctx = GpuContext { device: &device, memory: &mut memory, textures: &mut textures };
        manager.create_all_resources(&mut ctx).unwrap();

        assert_eq!(manager.texture_type(cube), Some(ImageTextureType::Cube));
        let first: Vec<u32> = [checkerboard, rock, cube, target]
            .iter()
            .map(|h| ctx.textures.texture_id(*h))
            .collect();
        assert_eq!(first, vec![1, 2, 1, 0]);

        manager.update_global_descriptor_sets(&mut ctx).unwrap();
        let second: Vec<u32> = [checkerboard, rock, cube, target]
            .iter()
            .map(|h| ctx.textures.texture_id(*h))
            .collect();
        assert_eq!(first, second);

        manager.destroy_resources(&[rock], &mut ctx).unwrap();
        assert_eq!(ctx.textures.texture_id(rock), 0);
    }

    #[test]
    fn descriptors_round_trip_through_json() {
        let mut manager = ImageManager::new(&config(texture_dir("json")));
        let handle = manager.create_image(
            "gbuffer_normals",
            ImageDescriptor {
                image_format: Format::R16G16B16A16Float,
                dimensions: UVec3::new(1920, 1080, 1),
                image_flags: ImageFlags::USAGE_ATTACHMENT | ImageFlags::USAGE_SAMPLED,
                memory_pool_type: MemoryPoolType::ResolutionDependentImages,
                ..Default::default()
            },
        ).unwrap();

        let json = manager.compile_descriptor(handle).unwrap();
        assert_eq!(json["imageFormat"], "R16G16B16A16Float");
        assert_eq!(json["memoryPoolType"], "ResolutionDependentImages");

        let other = manager.create_image("copy", ImageDescriptor::default()).unwrap();
        manager.init_from_descriptor(other, &json).unwrap();
        assert_eq!(manager.descriptor(other).unwrap(), manager.descriptor(handle).unwrap());

        let saved = manager.save_descriptors().unwrap();
        let mut restored = ImageManager::new(&config(texture_dir("json_restore")));
        restored.load_descriptors(&saved).unwrap();
        assert_eq!(restored.active_resources().len(), 2);
        let copy = restored.resource_by_name("copy").unwrap();
        assert_eq!(restored.descriptor(copy).unwrap().dimensions, UVec3::new(1920, 1080, 1));
    }
}
