use ash::vk;
use bitflags::bitflags;
use color_eyre::Result;
use color_eyre::eyre::{bail, ensure};
use glam::UVec3;
use serde::{Deserialize, Serialize};
use crate::renderer::internals::format::Format;
use crate::renderer::internals::memory::{GpuMemoryAllocation, MemoryPoolType};

slotmap::new_key_type! {
    /// Generation-checked reference to an [`ImageRecord`].
    pub struct ImageHandle;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ImageType {
    /// Owned elsewhere (e.g. swapchain images); never created or destroyed here
    External,
    Texture,
    TextureFromFile,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
    pub struct ImageFlags: u32 {
        const USAGE_ATTACHMENT = 1 << 0;
        const USAGE_SAMPLED = 1 << 1;
        const USAGE_STORAGE = 1 << 2;
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ImageTextureType {
    Tex1D,
    Tex1DArray,
    Tex2D,
    Tex2DArray,
    Tex3D,
    Cube,
}

impl ImageTextureType {
    /// Derives the texture type from the image extent and layer count.
    ///
    /// A depth of two or more always yields a volume; volumes cannot be
    /// layered. Otherwise the height decides between 1D and 2D and the layer
    /// count between plain and array variants. Cube maps are never derived
    /// here, only set by the file loader.
    pub fn classify(dimensions: UVec3, array_layer_count: u32) -> Result<Self> {
        ensure!(
            dimensions.x >= 1 && dimensions.y >= 1 && dimensions.z >= 1,
            "Image dimensions must be at least 1, got {}",
            dimensions
        );
        ensure!(array_layer_count >= 1, "Image needs at least one array layer");

        let texture_type = if dimensions.z >= 2 {
            ensure!(
                array_layer_count == 1,
                "3D images cannot have {} array layers",
                array_layer_count
            );
            Self::Tex3D
        } else if dimensions.y >= 2 {
            if array_layer_count > 1 { Self::Tex2DArray } else { Self::Tex2D }
        } else if array_layer_count > 1 {
            Self::Tex1DArray
        } else {
            Self::Tex1D
        };
        Ok(texture_type)
    }

    pub fn image_type(self) -> vk::ImageType {
        match self {
            Self::Tex1D | Self::Tex1DArray => vk::ImageType::TYPE_1D,
            Self::Tex2D | Self::Tex2DArray | Self::Cube => vk::ImageType::TYPE_2D,
            Self::Tex3D => vk::ImageType::TYPE_3D,
        }
    }

    /// View type of the full-range view
    pub fn view_type(self) -> vk::ImageViewType {
        match self {
            Self::Tex1D => vk::ImageViewType::TYPE_1D,
            Self::Tex1DArray => vk::ImageViewType::TYPE_1D_ARRAY,
            Self::Tex2D => vk::ImageViewType::TYPE_2D,
            Self::Tex2DArray => vk::ImageViewType::TYPE_2D_ARRAY,
            Self::Tex3D => vk::ImageViewType::TYPE_3D,
            Self::Cube => vk::ImageViewType::CUBE,
        }
    }

    /// View type of a single (layer, mip) view
    pub fn sub_resource_view_type(self) -> vk::ImageViewType {
        match self {
            Self::Tex1D | Self::Tex1DArray => vk::ImageViewType::TYPE_1D,
            Self::Tex2D | Self::Tex2DArray | Self::Cube => vk::ImageViewType::TYPE_2D,
            Self::Tex3D => vk::ImageViewType::TYPE_3D,
        }
    }
}

/// Author-provided description of an image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDescriptor {
    pub image_format: Format,
    pub dimensions: UVec3,
    pub image_type: ImageType,
    pub image_flags: ImageFlags,
    pub mip_level_count: u32,
    pub array_layer_count: u32,
    pub memory_pool_type: MemoryPoolType,
    /// Texture file name without directory or extension
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl Default for ImageDescriptor {
    fn default() -> Self {
        Self {
            image_format: Format::R8G8B8A8Unorm,
            dimensions: UVec3::ONE,
            image_type: ImageType::Texture,
            image_flags: ImageFlags::USAGE_SAMPLED,
            mip_level_count: 1,
            array_layer_count: 1,
            memory_pool_type: MemoryPoolType::StaticImages,
            file_name: None,
        }
    }
}

impl ImageDescriptor {
    pub fn texture(format: Format, dimensions: UVec3, flags: ImageFlags) -> Self {
        Self {
            image_format: format,
            dimensions,
            image_flags: flags,
            ..Default::default()
        }
    }

    pub fn texture_from_file(file_name: impl Into<String>) -> Self {
        Self {
            image_type: ImageType::TextureFromFile,
            file_name: Some(file_name.into()),
            ..Default::default()
        }
    }
}

/// Everything the image manager tracks for one image
pub struct ImageRecord {
    pub name: String,
    pub descriptor: ImageDescriptor,

    pub image: Option<vk::Image>,
    /// Survives `destroy_resources` so a re-created image can reuse it
    pub memory_allocation: Option<GpuMemoryAllocation>,
    pub texture_type: Option<ImageTextureType>,
    pub tiling: Option<vk::ImageTiling>,

    /// Indexed `[layer][mip]`
    pub sub_resource_views: Vec<Vec<vk::ImageView>>,
    pub image_view: Option<vk::ImageView>,
    pub image_view_gamma: Option<vk::ImageView>,
    pub image_view_linear: Option<vk::ImageView>,
}

impl ImageRecord {
    pub fn new(name: String, descriptor: ImageDescriptor) -> Self {
        Self {
            name,
            descriptor,
            image: None,
            memory_allocation: None,
            texture_type: None,
            tiling: None,
            sub_resource_views: Vec::new(),
            image_view: None,
            image_view_gamma: None,
            image_view_linear: None,
        }
    }

    pub fn has_resources(&self) -> bool {
        self.image.is_some() || self.image_view.is_some()
    }
}

/// Format features an attachment of `format` needs.
pub fn attachment_features(format: Format) -> vk::FormatFeatureFlags {
    if format.is_depth() {
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
    } else {
        vk::FormatFeatureFlags::COLOR_ATTACHMENT
    }
}

/// Picks linear tiling only when it supports `required` and optimal tiling
/// does not.
pub fn select_tiling(
    properties: &vk::FormatProperties,
    required: vk::FormatFeatureFlags,
) -> Result<vk::ImageTiling> {
    let optimal = properties.optimal_tiling_features.contains(required);
    let linear = properties.linear_tiling_features.contains(required);

    match (optimal, linear) {
        (true, _) => Ok(vk::ImageTiling::OPTIMAL),
        (false, true) => Ok(vk::ImageTiling::LINEAR),
        (false, false) => bail!(
            "Format supports {:?} with neither optimal nor linear tiling",
            required
        ),
    }
}

fn tiling_features(
    properties: &vk::FormatProperties,
    tiling: vk::ImageTiling,
) -> vk::FormatFeatureFlags {
    if tiling == vk::ImageTiling::LINEAR {
        properties.linear_tiling_features
    } else {
        properties.optimal_tiling_features
    }
}

/// Checks the requested usages against the chosen tiling and assembles the
/// final usage mask. Transfer source and destination are always included.
pub fn image_usage(
    format: Format,
    flags: ImageFlags,
    properties: &vk::FormatProperties,
    tiling: vk::ImageTiling,
) -> Result<vk::ImageUsageFlags> {
    let features = tiling_features(properties, tiling);
    let mut usage = vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;

    if flags.contains(ImageFlags::USAGE_ATTACHMENT) {
        usage |= if format.is_depth() {
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
        } else {
            vk::ImageUsageFlags::COLOR_ATTACHMENT
        };
    }
    if flags.contains(ImageFlags::USAGE_SAMPLED) {
        ensure!(
            features.contains(vk::FormatFeatureFlags::SAMPLED_IMAGE),
            "{:?} cannot be sampled with {:?} tiling",
            format,
            tiling
        );
        usage |= vk::ImageUsageFlags::SAMPLED;
    }
    if flags.contains(ImageFlags::USAGE_STORAGE) {
        ensure!(
            features.contains(vk::FormatFeatureFlags::STORAGE_IMAGE),
            "{:?} cannot be used as storage image with {:?} tiling",
            format,
            tiling
        );
        usage |= vk::ImageUsageFlags::STORAGE;
    }

    Ok(usage)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(optimal: vk::FormatFeatureFlags, linear: vk::FormatFeatureFlags) -> vk::FormatProperties {
        vk::FormatProperties {
            linear_tiling_features: linear,
            optimal_tiling_features: optimal,
            buffer_features: vk::FormatFeatureFlags::empty(),
        }
    }

    #[test]
    fn classification_follows_extent_and_layers() {
        for x in [1, 2, 64] {
            for layers in [1, 4] {
                let one_d = ImageTextureType::classify(UVec3::new(x, 1, 1), layers).unwrap();
                let two_d = ImageTextureType::classify(UVec3::new(x, 8, 1), layers).unwrap();
                if layers == 1 {
                    assert_eq!(one_d, ImageTextureType::Tex1D);
                    assert_eq!(two_d, ImageTextureType::Tex2D);
                } else {
                    assert_eq!(one_d, ImageTextureType::Tex1DArray);
                    assert_eq!(two_d, ImageTextureType::Tex2DArray);
                }
            }
            assert_eq!(
                ImageTextureType::classify(UVec3::new(x, 8, 2), 1).unwrap(),
                ImageTextureType::Tex3D
            );
        }
    }

    #[test]
    fn layered_volumes_are_rejected() {
        assert!(ImageTextureType::classify(UVec3::new(16, 16, 16), 2).is_err());
        assert!(ImageTextureType::classify(UVec3::new(16, 0, 1), 1).is_err());
    }

    #[test]
    fn optimal_tiling_wins_when_supported() {
        let required = vk::FormatFeatureFlags::COLOR_ATTACHMENT;
        let both = props(required, required);
        assert_eq!(select_tiling(&both, required).unwrap(), vk::ImageTiling::OPTIMAL);

        let linear_only = props(vk::FormatFeatureFlags::empty(), required);
        assert_eq!(select_tiling(&linear_only, required).unwrap(), vk::ImageTiling::LINEAR);

        let neither = props(vk::FormatFeatureFlags::empty(), vk::FormatFeatureFlags::empty());
        assert!(select_tiling(&neither, required).is_err());
    }

    #[test]
    fn usage_always_carries_transfer_bits() {
        let features = vk::FormatFeatureFlags::SAMPLED_IMAGE | vk::FormatFeatureFlags::COLOR_ATTACHMENT;
        let p = props(features, vk::FormatFeatureFlags::empty());

        let usage = image_usage(
            Format::R8G8B8A8Unorm,
            ImageFlags::USAGE_SAMPLED | ImageFlags::USAGE_ATTACHMENT,
            &p,
            vk::ImageTiling::OPTIMAL,
        ).unwrap();
        assert!(usage.contains(vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST));
        assert!(usage.contains(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::COLOR_ATTACHMENT));

        let depth = image_usage(Format::D32Float, ImageFlags::USAGE_ATTACHMENT, &p, vk::ImageTiling::OPTIMAL).unwrap();
        assert!(depth.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT));

        assert!(image_usage(Format::R8G8B8A8Unorm, ImageFlags::USAGE_STORAGE, &p, vk::ImageTiling::OPTIMAL).is_err());
    }
}
