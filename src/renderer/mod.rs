pub mod config;
pub mod contexts;
pub mod internals;
pub mod resources;

#[cfg(test)]
pub(crate) mod testing;

use color_eyre::Result;
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::device_ctx::RenderDeviceContext;
use crate::renderer::contexts::resource_ctx::RenderResourceContext;
use crate::renderer::resources::image::{ImageDescriptor, ImageHandle};

pub struct Renderer {
    // Resources go before the device they were created on
    res: RenderResourceContext,
    dev: RenderDeviceContext,
}

impl Renderer {
    pub fn new(config: RenderConfig) -> Result<Self> {
        let dev = RenderDeviceContext::new(&config)?;
        let mut res = RenderResourceContext::new(&dev.device, &config)?;
        res.with_registry(&dev.device, |registry, ctx| registry.create_all(ctx))?;

        Ok(Self {
            res,
            dev,
        })
    }

    /// Registers and uploads the named textures, then rebuilds the global
    /// texture table. Names that are already loaded are returned as is.
    pub fn load_textures(&mut self, names: &[String]) -> Result<Vec<ImageHandle>> {
        let mut handles = Vec::with_capacity(names.len());
        let mut created = Vec::new();
        for name in names {
            let handle = match self.res.images.resource_by_name(name) {
                Some(handle) => handle,
                None => {
                    let handle = self.res.images.create_image(
                        name,
                        ImageDescriptor::texture_from_file(name.as_str()),
                    )?;
                    created.push(handle);
                    handle
                }
            };
            handles.push(handle);
        }

        self.res.create_resources(&self.dev.device, &created)?;
        self.res.update_global_descriptor_sets(&self.dev.device)?;
        Ok(handles)
    }

    pub fn unload_textures(&mut self, handles: &[ImageHandle]) -> Result<()> {
        self.res.destroy_resources(&self.dev.device, handles)?;
        for handle in handles {
            self.res.images.destroy_image(*handle)?;
        }
        self.res.update_global_descriptor_sets(&self.dev.device)
    }

    pub fn texture_id(&self, handle: ImageHandle) -> u32 {
        self.res.texture_id(handle)
    }

    pub fn resources(&self) -> &RenderResourceContext {
        &self.res
    }

    pub fn resources_mut(&mut self) -> &mut RenderResourceContext {
        &mut self.res
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(err) = self.res.destroy(&self.dev.device) {
            log::error!("Failed to release renderer resources: {:?}", err);
        }
    }
}
