use color_eyre::Result;
use color_eyre::eyre::ensure;
use serde_json::{Map, Value};
use crate::renderer::contexts::resource_ctx::GpuContext;

/// One kind of resource the renderer can create, destroy and persist.
pub trait ResourceKind {
    fn kind_name(&self) -> &'static str;

    fn active_resource_count(&self) -> usize;

    fn create_all_resources(&mut self, ctx: &mut GpuContext<'_>) -> Result<()>;

    fn destroy_all_resources(&mut self, ctx: &mut GpuContext<'_>) -> Result<()>;

    fn save_descriptors(&self) -> Result<Value>;

    fn load_descriptors(&mut self, value: &Value) -> Result<()>;
}

/// The resource kinds taking part in one save, load or (re)creation pass,
/// in the order they were registered.
#[derive(Default)]
pub struct ResourceRegistry<'a> {
    kinds: Vec<&'a mut dyn ResourceKind>,
}

impl<'a> ResourceRegistry<'a> {
    pub fn new() -> Self {
        Self { kinds: Vec::new() }
    }

    pub fn register(&mut self, kind: &'a mut dyn ResourceKind) -> Result<()> {
        ensure!(
            self.kinds.iter().all(|k| k.kind_name() != kind.kind_name()),
            "Resource kind {} registered twice",
            kind.kind_name()
        );
        self.kinds.push(kind);
        Ok(())
    }

    pub fn get(&mut self, kind_name: &str) -> Option<&mut (dyn ResourceKind + 'a)> {
        self.kinds
            .iter_mut()
            .find(|k| k.kind_name() == kind_name)
            .map(|k| &mut **k)
    }

    pub fn kind_names(&self) -> Vec<&'static str> {
        self.kinds.iter().map(|k| k.kind_name()).collect()
    }

    /// Saves every kind into one object keyed by kind name.
    pub fn save_all(&self) -> Result<Value> {
        let mut map = Map::new();
        for kind in &self.kinds {
            map.insert(kind.kind_name().to_owned(), kind.save_descriptors()?);
        }
        Ok(Value::Object(map))
    }

    /// Kinds missing from `value` are left untouched.
    pub fn load_all(&mut self, value: &Value) -> Result<()> {
        for kind in self.kinds.iter_mut() {
            if let Some(descriptors) = value.get(kind.kind_name()) {
                kind.load_descriptors(descriptors)?;
            }
        }
        Ok(())
    }

    pub fn create_all(&mut self, ctx: &mut GpuContext<'_>) -> Result<()> {
        for kind in self.kinds.iter_mut() {
            log::debug!(
                "Creating {} {} resources",
                kind.active_resource_count(),
                kind.kind_name()
            );
            kind.create_all_resources(ctx)?;
        }
        Ok(())
    }

    /// Destroys in reverse registration order.
    pub fn destroy_all(&mut self, ctx: &mut GpuContext<'_>) -> Result<()> {
        for kind in self.kinds.iter_mut().rev() {
            kind.destroy_all_resources(ctx)?;
        }
        Ok(())
    }
}
