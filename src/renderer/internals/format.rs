use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::eyre;
use ddsfile::{D3DFormat, Dds, DxgiFormat};
use serde::{Deserialize, Serialize};

macro_rules! impl_format {
    ($($name:ident($vk_format:ident, $block:expr, $bytes:expr),)*) => {
        /// Abstract pixel formats understood by the image manager.
        ///
        /// `$block` is the edge length of a compression block in texels
        /// (1 for uncompressed formats), `$bytes` the size of one block.
        #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
        pub enum Format {
            $($name,)*
        }

        impl Format {
            pub const ALL: &'static [Format] = &[$(Format::$name,)*];

            pub fn to_vk(self) -> vk::Format {
                match self {
                    $(Format::$name => vk::Format::$vk_format,)*
                }
            }

            pub fn block_extent(self) -> u32 {
                match self {
                    $(Format::$name => $block,)*
                }
            }

            pub fn bytes_per_block(self) -> u64 {
                match self {
                    $(Format::$name => $bytes,)*
                }
            }
        }
    }
}

impl_format! {
    R8G8B8A8Unorm(R8G8B8A8_UNORM, 1, 4),
    R8G8B8A8Srgb(R8G8B8A8_SRGB, 1, 4),
    B8G8R8A8Unorm(B8G8R8A8_UNORM, 1, 4),
    B8G8R8A8Srgb(B8G8R8A8_SRGB, 1, 4),
    R16G16B16A16Float(R16G16B16A16_SFLOAT, 1, 8),
    R32G32B32A32Float(R32G32B32A32_SFLOAT, 1, 16),
    R32Float(R32_SFLOAT, 1, 4),
    D16Unorm(D16_UNORM, 1, 2),
    D32Float(D32_SFLOAT, 1, 4),
    D24UnormS8Uint(D24_UNORM_S8_UINT, 1, 4),
    D32FloatS8Uint(D32_SFLOAT_S8_UINT, 1, 5),
    Bc1RgbUnorm(BC1_RGB_UNORM_BLOCK, 4, 8),
    Bc1RgbSrgb(BC1_RGB_SRGB_BLOCK, 4, 8),
    Bc3Unorm(BC3_UNORM_BLOCK, 4, 16),
    Bc3Srgb(BC3_SRGB_BLOCK, 4, 16),
    Bc5Unorm(BC5_UNORM_BLOCK, 4, 16),
    Bc6hUfloat(BC6H_UFLOAT_BLOCK, 4, 16),
    Bc7Unorm(BC7_UNORM_BLOCK, 4, 16),
    Bc7Srgb(BC7_SRGB_BLOCK, 4, 16),
}

impl Format {
    pub fn is_depth(self) -> bool {
        matches!(
            self,
            Format::D16Unorm | Format::D32Float | Format::D24UnormS8Uint | Format::D32FloatS8Uint
        )
    }

    pub fn is_depth_stencil(self) -> bool {
        matches!(self, Format::D24UnormS8Uint | Format::D32FloatS8Uint)
    }

    /// Views over depth/stencil images only ever expose the depth aspect.
    pub fn aspect(self) -> vk::ImageAspectFlags {
        if self.is_depth() {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        }
    }

    /// The `(gamma, linear)` reinterpretations for formats that are created
    /// with `MUTABLE_FORMAT` so both can be sampled from the same memory.
    pub fn mutable_views(self) -> Option<(vk::Format, vk::Format)> {
        match self {
            Format::B8G8R8A8Unorm | Format::B8G8R8A8Srgb => {
                Some((vk::Format::B8G8R8A8_SRGB, vk::Format::B8G8R8A8_UNORM))
            }
            Format::R8G8B8A8Unorm | Format::R8G8B8A8Srgb => {
                Some((vk::Format::R8G8B8A8_SRGB, vk::Format::R8G8B8A8_UNORM))
            }
            _ => None,
        }
    }

    /// Byte size of one tightly packed `width` x `height` slice.
    pub fn level_size(self, width: u32, height: u32) -> u64 {
        let block = self.block_extent();
        let blocks_x = width.div_ceil(block).max(1) as u64;
        let blocks_y = height.div_ceil(block).max(1) as u64;
        blocks_x * blocks_y * self.bytes_per_block()
    }

    pub fn from_dds(dds: &Dds) -> Result<Self> {
        if let Some(format) = dds.get_dxgi_format() {
            return match format {
                DxgiFormat::R8G8B8A8_UNorm => Ok(Format::R8G8B8A8Unorm),
                DxgiFormat::R8G8B8A8_UNorm_sRGB => Ok(Format::R8G8B8A8Srgb),
                DxgiFormat::B8G8R8A8_UNorm => Ok(Format::B8G8R8A8Unorm),
                DxgiFormat::B8G8R8A8_UNorm_sRGB => Ok(Format::B8G8R8A8Srgb),
                DxgiFormat::R16G16B16A16_Float => Ok(Format::R16G16B16A16Float),
                DxgiFormat::R32G32B32A32_Float => Ok(Format::R32G32B32A32Float),
                DxgiFormat::R32_Float => Ok(Format::R32Float),
                DxgiFormat::BC1_UNorm => Ok(Format::Bc1RgbUnorm),
                DxgiFormat::BC1_UNorm_sRGB => Ok(Format::Bc1RgbSrgb),
                DxgiFormat::BC3_UNorm => Ok(Format::Bc3Unorm),
                DxgiFormat::BC3_UNorm_sRGB => Ok(Format::Bc3Srgb),
                DxgiFormat::BC5_UNorm => Ok(Format::Bc5Unorm),
                DxgiFormat::BC6H_UF16 => Ok(Format::Bc6hUfloat),
                DxgiFormat::BC7_UNorm => Ok(Format::Bc7Unorm),
                DxgiFormat::BC7_UNorm_sRGB => Ok(Format::Bc7Srgb),
                other => Err(eyre!("Unsupported DXGI texture format {:?}", other)),
            };
        }

        match dds.get_d3d_format() {
            Some(D3DFormat::A8B8G8R8) => Ok(Format::R8G8B8A8Unorm),
            Some(D3DFormat::A8R8G8B8) => Ok(Format::B8G8R8A8Unorm),
            Some(D3DFormat::A16B16G16R16F) => Ok(Format::R16G16B16A16Float),
            Some(D3DFormat::A32B32G32R32F) => Ok(Format::R32G32B32A32Float),
            Some(D3DFormat::DXT1) => Ok(Format::Bc1RgbUnorm),
            Some(D3DFormat::DXT5) => Ok(Format::Bc3Unorm),
            Some(other) => Err(eyre!("Unsupported D3D texture format {:?}", other)),
            None => Err(eyre!("DDS file does not describe a known pixel format")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_compressed_levels_round_up_to_whole_blocks() {
        assert_eq!(Format::Bc1RgbUnorm.level_size(1, 1), 8);
        assert_eq!(Format::Bc1RgbUnorm.level_size(5, 4), 16);
        assert_eq!(Format::Bc7Unorm.level_size(256, 256), 64 * 64 * 16);
        assert_eq!(Format::R8G8B8A8Unorm.level_size(3, 2), 24);
    }

    #[test]
    fn only_8bit_rgba_formats_are_mutable() {
        for format in Format::ALL {
            let mutable = format.mutable_views().is_some();
            let expected = matches!(
                format,
                Format::R8G8B8A8Unorm
                    | Format::R8G8B8A8Srgb
                    | Format::B8G8R8A8Unorm
                    | Format::B8G8R8A8Srgb
            );
            assert_eq!(mutable, expected, "{:?}", format);
        }
        assert_eq!(
            Format::B8G8R8A8Unorm.mutable_views(),
            Some((vk::Format::B8G8R8A8_SRGB, vk::Format::B8G8R8A8_UNORM))
        );
    }

    #[test]
    fn depth_stencil_is_a_subset_of_depth() {
        for format in Format::ALL {
            if format.is_depth_stencil() {
                assert!(format.is_depth());
            }
        }
        assert_eq!(Format::D32Float.aspect(), vk::ImageAspectFlags::DEPTH);
        assert_eq!(Format::Bc3Srgb.aspect(), vk::ImageAspectFlags::COLOR);
    }
}
