use color_eyre::Result;
use intrinsic_images::renderer::config::RenderConfig;
use intrinsic_images::renderer::Renderer;

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let names: Vec<String> = std::env::args().skip(1).collect();

    let mut renderer = Renderer::new(RenderConfig::default())?;
    let handles = renderer.load_textures(&names)?;

    for (name, handle) in names.iter().zip(handles) {
        log::info!("{} -> global texture id {}", name, renderer.texture_id(handle));
    }

    Ok(())
}
