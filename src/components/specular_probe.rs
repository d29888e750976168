use bitflags::bitflags;
use color_eyre::Result;
use color_eyre::eyre::{eyre, WrapErr};
use glam::Vec3;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use slotmap::SlotMap;
use crate::renderer::contexts::resource_ctx::GpuContext;
use crate::renderer::contexts::resource_ctx::registry::ResourceKind;

slotmap::new_key_type! {
    pub struct SpecularProbeRef;
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct SpecularProbeFlags: u32 {
        const PARALLAX_CORRECTED = 0x01;
    }
}

const CATEGORY: &str = "SpecularProbe";
const FLAG_NAMES: &[(&str, SpecularProbeFlags)] = &[
    ("ParallaxCorrected", SpecularProbeFlags::PARALLAX_CORRECTED),
];

const RADIUS_RANGE: (f32, f32) = (1.0, 500.0);
const FALLOFF_RANGE_PERC_RANGE: (f32, f32) = (0.01, 1.0);
const FALLOFF_EXP_RANGE: (f32, f32) = (0.1, 10.0);

/// A reflection volume sampling one of the specular cube maps.
#[derive(Clone, Debug, PartialEq)]
pub struct SpecularProbe {
    pub radius: f32,
    pub falloff_range_perc: f32,
    pub falloff_exp: f32,
    pub priority: u32,
    pub min_extent: Vec3,
    pub max_extent: Vec3,
    /// Flags as named in the descriptor
    pub flag_names: Vec<String>,
    pub specular_texture_names: Vec<String>,

    /// Resolved from `flag_names` by `create_resources`
    pub flags: SpecularProbeFlags,
}

impl Default for SpecularProbe {
    fn default() -> Self {
        Self {
            radius: 20.0,
            falloff_range_perc: 0.2,
            falloff_exp: 1.0,
            priority: 0,
            min_extent: Vec3::new(10.0, 10.0, 10.0),
            max_extent: Vec3::new(-10.0, 0.0, -10.0),
            flag_names: Vec::new(),
            specular_texture_names: Vec::new(),
            flags: SpecularProbeFlags::empty(),
        }
    }
}

impl SpecularProbe {
    fn reset_to_default(&mut self) {
        let defaults = Self::default();
        self.radius = defaults.radius;
        self.falloff_range_perc = defaults.falloff_range_perc;
        self.falloff_exp = defaults.falloff_exp;
        self.min_extent = defaults.min_extent;
        self.max_extent = defaults.max_extent;
        self.flag_names.clear();
    }
}

/// Wraps `value` the way descriptor properties are stored. Generated
/// descriptors also carry editor metadata and the allowed range.
fn property<T: Serialize>(
    value: T,
    generate_desc: bool,
    ty: &str,
) -> Result<Value> {
    let mut prop = Map::new();
    prop.insert("value".into(), serde_json::to_value(value)?);
    if generate_desc {
        prop.insert("category".into(), json!(CATEGORY));
        prop.insert("type".into(), json!(ty));
        prop.insert("readOnly".into(), json!(false));
        prop.insert("internal".into(), json!(false));
    }
    Ok(Value::Object(prop))
}

fn ranged_property(
    value: f32,
    generate_desc: bool,
    (min, max): (f32, f32),
) -> Result<Value> {
    if !generate_desc {
        return property(value, false, "float");
    }
    let mut prop = property(value.clamp(min, max), true, "float")?;
    prop["min"] = json!(min);
    prop["max"] = json!(max);
    Ok(prop)
}

fn read_property<T: DeserializeOwned>(properties: &Value, key: &str) -> Result<Option<T>> {
    let Some(prop) = properties.get(key) else {
        return Ok(None);
    };
    let value = prop
        .get("value")
        .ok_or_else(|| eyre!("Property {} has no value", key))?;
    let value = serde_json::from_value(value.clone())
        .wrap_err_with(|| format!("Invalid value for property {}", key))?;
    Ok(Some(value))
}

pub struct SpecularProbeManager {
    probes: SlotMap<SpecularProbeRef, SpecularProbe>,
    active: Vec<SpecularProbeRef>,
}

impl Default for SpecularProbeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SpecularProbeManager {
    pub fn new() -> Self {
        Self {
            probes: SlotMap::with_key(),
            active: Vec::new(),
        }
    }

    pub fn create_specular_probe(&mut self) -> SpecularProbeRef {
        let probe = self.probes.insert(SpecularProbe::default());
        self.active.push(probe);
        probe
    }

    pub fn destroy_specular_probe(&mut self, probe: SpecularProbeRef) {
        if self.probes.remove(probe).is_some() {
            self.active.retain(|p| *p != probe);
        }
    }

    pub fn active_probes(&self) -> &[SpecularProbeRef] {
        &self.active
    }

    pub fn get(&self, probe: SpecularProbeRef) -> Option<&SpecularProbe> {
        self.probes.get(probe)
    }

    pub fn get_mut(&mut self, probe: SpecularProbeRef) -> Option<&mut SpecularProbe> {
        self.probes.get_mut(probe)
    }

    fn probe(&self, probe: SpecularProbeRef) -> Result<&SpecularProbe> {
        self.get(probe)
            .ok_or_else(|| eyre!("Stale specular probe {:?}", probe))
    }

    fn probe_mut(&mut self, probe: SpecularProbeRef) -> Result<&mut SpecularProbe> {
        self.get_mut(probe)
            .ok_or_else(|| eyre!("Stale specular probe {:?}", probe))
    }

    /// Restores the descriptor defaults. Priority and texture names are kept.
    pub fn reset_to_default(&mut self, probe: SpecularProbeRef) -> Result<()> {
        self.probe_mut(probe)?.reset_to_default();
        Ok(())
    }

    pub fn compile_descriptor(
        &self,
        probe: SpecularProbeRef,
        generate_desc: bool,
    ) -> Result<Value> {
        let p = self.probe(probe)?;

        let mut properties = Map::new();
        properties.insert("radius".into(), ranged_property(p.radius, generate_desc, RADIUS_RANGE)?);
        properties.insert(
            "falloffRangePerc".into(),
            ranged_property(p.falloff_range_perc, generate_desc, FALLOFF_RANGE_PERC_RANGE)?,
        );
        properties.insert(
            "falloffExp".into(),
            ranged_property(p.falloff_exp, generate_desc, FALLOFF_EXP_RANGE)?,
        );
        properties.insert("priority".into(), property(p.priority, generate_desc, "uint")?);

        let mut flags = property(&p.flag_names, generate_desc, "flags")?;
        if generate_desc {
            flags["values"] = json!(FLAG_NAMES.iter().map(|(name, _)| *name).collect::<Vec<_>>());
        }
        properties.insert("flags".into(), flags);

        properties.insert("minExtent".into(), property(p.min_extent, generate_desc, "vec3")?);
        properties.insert("maxExtent".into(), property(p.max_extent, generate_desc, "vec3")?);

        if !generate_desc {
            let names = p.specular_texture_names
                .iter()
                .map(|name| property(name, false, "string"))
                .collect::<Result<Vec<_>>>()?;
            properties.insert("specularTextureNames".into(), Value::Array(names));
        }

        Ok(Value::Object(properties))
    }

    /// Applies every property present in `properties`; missing ones keep
    /// their current value.
    pub fn init_from_descriptor(
        &mut self,
        probe: SpecularProbeRef,
        generate_desc: bool,
        properties: &Value,
    ) -> Result<()> {
        let p = self.probe_mut(probe)?;

        if let Some(radius) = read_property(properties, "radius")? {
            p.radius = radius;
        }
        if let Some(perc) = read_property(properties, "falloffRangePerc")? {
            p.falloff_range_perc = perc;
        }
        if let Some(exp) = read_property(properties, "falloffExp")? {
            p.falloff_exp = exp;
        }
        if let Some(priority) = read_property(properties, "priority")? {
            p.priority = priority;
        }
        if let Some(min_extent) = read_property(properties, "minExtent")? {
            p.min_extent = min_extent;
        }
        if let Some(max_extent) = read_property(properties, "maxExtent")? {
            p.max_extent = max_extent;
        }
        if let Some(flag_names) = read_property(properties, "flags")? {
            p.flag_names = flag_names;
        }

        if !generate_desc {
            if let Some(names) = properties.get("specularTextureNames").and_then(Value::as_array) {
                p.specular_texture_names = names
                    .iter()
                    .map(|name| {
                        name.get("value")
                            .and_then(Value::as_str)
                            .map(str::to_owned)
                            .ok_or_else(|| eyre!("Invalid specular texture name {}", name))
                    })
                    .collect::<Result<Vec<_>>>()?;
            }
        }

        Ok(())
    }

    /// Resolves the descriptor flag names.
    pub fn create_resources(&mut self, probes: &[SpecularProbeRef]) -> Result<()> {
        for probe in probes {
            let p = self.probe_mut(*probe)?;
            p.flags = SpecularProbeFlags::empty();
            for name in &p.flag_names {
                match FLAG_NAMES.iter().find(|(n, _)| n == name) {
                    Some((_, flag)) => p.flags |= *flag,
                    None => log::warn!("Unknown specular probe flag {}", name),
                }
            }
        }
        Ok(())
    }

    pub fn destroy_resources(&mut self, probes: &[SpecularProbeRef]) -> Result<()> {
        for probe in probes {
            self.probe_mut(*probe)?.flags = SpecularProbeFlags::empty();
        }
        Ok(())
    }

    /// Stable sort by ascending priority.
    pub fn sort_by_priority(&self, probes: &mut [SpecularProbeRef]) {
        probes.sort_by_key(|probe| self.get(*probe).map_or(u32::MAX, |p| p.priority));
    }
}

impl ResourceKind for SpecularProbeManager {
    fn kind_name(&self) -> &'static str {
        "SpecularProbe"
    }

    fn active_resource_count(&self) -> usize {
        self.active.len()
    }

    fn create_all_resources(&mut self, _ctx: &mut GpuContext<'_>) -> Result<()> {
        let active = self.active.clone();
        self.create_resources(&active)
    }

    fn destroy_all_resources(&mut self, _ctx: &mut GpuContext<'_>) -> Result<()> {
        let active = self.active.clone();
        self.destroy_resources(&active)
    }

    fn save_descriptors(&self) -> Result<Value> {
        let descriptors = self.active
            .iter()
            .map(|probe| self.compile_descriptor(*probe, false))
            .collect::<Result<Vec<_>>>()?;
        Ok(Value::Array(descriptors))
    }

    fn load_descriptors(&mut self, value: &Value) -> Result<()> {
        let descriptors = value
            .as_array()
            .ok_or_else(|| eyre!("Specular probe descriptors must be an array"))?;
        for descriptor in descriptors {
            let probe = self.create_specular_probe();
            self.init_from_descriptor(probe, false, descriptor)?;
        }
        Ok(())
    }
}
