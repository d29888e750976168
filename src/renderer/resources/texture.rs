use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::{bail, ensure, eyre, WrapErr};
use ddsfile::Dds;
use crate::renderer::internals::format::Format;

const DDS_CAPS2_CUBEMAP: u32 = 0x200;
const DDS_CAPS2_CUBEMAP_ALL_FACES: u32 = 0xFC00;
const DDS_RESOURCE_MISC_TEXTURECUBE: u32 = 0x4;

const CHECKERBOARD_SIZE: u32 = 64;
const CHECKERBOARD_CELL: u32 = 8;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TextureTarget {
    Texture2D,
    Cube,
}

/// Pixel data of a texture file, laid out face by face with each face
/// holding its complete mip chain.
pub struct TextureContainer {
    pub target: TextureTarget,
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub faces: u32,
    pub mip_levels: u32,
    pub data: Vec<u8>,
}

impl TextureContainer {
    /// Loads `.dds` files through `ddsfile` and `.png`/`.jpg` files through `image`.
    pub fn load(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        match extension.as_deref() {
            Some("dds") => {
                let file = File::open(path)
                    .wrap_err_with(|| format!("Failed to open {}", path.display()))?;
                let dds = Dds::read(BufReader::new(file))
                    .map_err(|e| eyre!("Failed to parse {}: {}", path.display(), e))?;
                Self::from_dds(&dds)
            }
            Some("png") | Some("jpg") | Some("jpeg") => {
                let image = image::open(path)
                    .wrap_err_with(|| format!("Failed to decode {}", path.display()))?
                    .to_rgba8();
                let (width, height) = image.dimensions();
                Self::from_rgba8(width, height, image.into_raw())
            }
            _ => bail!("Unsupported texture file {}", path.display()),
        }
    }

    pub fn from_dds(dds: &Dds) -> Result<Self> {
        let header = &dds.header;
        let depth = header.depth.unwrap_or(1);
        ensure!(depth <= 1, "Volume textures are not supported");

        let caps2 = header.caps2.bits();
        let (array_size, misc_flag) = dds
            .header10
            .as_ref()
            .map(|h| (h.array_size, h.misc_flag.bits()))
            .unwrap_or((1, 0));
        let is_cube = (caps2 & DDS_CAPS2_CUBEMAP != 0
            && caps2 & DDS_CAPS2_CUBEMAP_ALL_FACES == DDS_CAPS2_CUBEMAP_ALL_FACES)
            || misc_flag & DDS_RESOURCE_MISC_TEXTURECUBE != 0;
        ensure!(array_size <= 1, "Texture arrays are not supported");

        let container = Self {
            target: if is_cube { TextureTarget::Cube } else { TextureTarget::Texture2D },
            format: Format::from_dds(dds)?,
            width: header.width,
            height: header.height,
            faces: if is_cube { 6 } else { 1 },
            mip_levels: header.mip_map_count.unwrap_or(1).max(1),
            data: dds.data.clone(),
        };
        container.validate()?;
        Ok(container)
    }

    pub fn from_rgba8(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let container = Self {
            target: TextureTarget::Texture2D,
            format: Format::R8G8B8A8Srgb,
            width,
            height,
            faces: 1,
            mip_levels: 1,
            data,
        };
        container.validate()?;
        Ok(container)
    }

    /// A magenta and white checkerboard, with every face identical for cubes.
    pub fn checkerboard(target: TextureTarget) -> Self {
        let face = image::RgbaImage::from_fn(CHECKERBOARD_SIZE, CHECKERBOARD_SIZE, |x, y| {
            if (x / CHECKERBOARD_CELL + y / CHECKERBOARD_CELL) % 2 == 0 {
                image::Rgba([255, 255, 255, 255])
            } else {
                image::Rgba([255, 0, 255, 255])
            }
        })
        .into_raw();

        let faces = match target {
            TextureTarget::Texture2D => 1,
            TextureTarget::Cube => 6,
        };

        Self {
            target,
            format: Format::R8G8B8A8Srgb,
            width: CHECKERBOARD_SIZE,
            height: CHECKERBOARD_SIZE,
            faces,
            mip_levels: 1,
            data: face.repeat(faces as usize),
        }
    }

    pub fn level_extent(&self, mip: u32) -> (u32, u32) {
        let shrink = |size: u32| size.checked_shr(mip).unwrap_or(0).max(1);
        (shrink(self.width), shrink(self.height))
    }

    pub fn level_size(&self, mip: u32) -> u64 {
        let (width, height) = self.level_extent(mip);
        self.format.level_size(width, height)
    }

    pub fn packed_size(&self) -> u64 {
        let face_size: u64 = (0..self.mip_levels).map(|mip| self.level_size(mip)).sum();
        face_size * self.faces as u64
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.width >= 1 && self.height >= 1, "Texture has no pixels");
        let full_chain = u32::BITS - self.width.max(self.height).leading_zeros();
        ensure!(
            self.mip_levels <= full_chain,
            "Texture of {}x{} declares {} mips, at most {} possible",
            self.width,
            self.height,
            self.mip_levels,
            full_chain
        );
        ensure!(
            (self.data.len() as u64) >= self.packed_size(),
            "Texture data holds {} bytes, {} required",
            self.data.len(),
            self.packed_size()
        );
        Ok(())
    }

    /// One copy region per (face, mip) pair in container order.
    pub fn copy_regions(&self) -> Vec<vk::BufferImageCopy> {
        let mut regions = Vec::with_capacity((self.faces * self.mip_levels) as usize);
        let mut offset = 0;

        for face in 0..self.faces {
            for mip in 0..self.mip_levels {
                let (width, height) = self.level_extent(mip);
                regions.push(
                    vk::BufferImageCopy::default()
                        .buffer_offset(offset)
                        .image_subresource(vk::ImageSubresourceLayers {
                            aspect_mask: vk::ImageAspectFlags::COLOR,
                            mip_level: mip,
                            base_array_layer: face,
                            layer_count: 1,
                        })
                        .image_extent(vk::Extent3D {
                            width,
                            height,
                            depth: 1,
                        }),
                );
                offset += self.level_size(mip);
            }
        }

        regions
    }
}
