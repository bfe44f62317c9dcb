use serde::Deserialize;

/// Tunables for the engine, read from the `[engine]` table of `decor.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    /// Ticks between a viewer starting to track a proxy and the first sync.
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ticks: u64,
    /// Ticks between a proxy loading and the broadcast of its illusion.
    #[serde(default = "default_load_settle_delay")]
    pub load_settle_delay_ticks: u64,
    /// Radius in blocks within which viewers receive broadcasts.
    #[serde(default = "default_view_radius")]
    pub view_radius: f32,
    #[serde(default = "default_barrier_runtime_id")]
    pub barrier_runtime_id: u32,
    /// Runtime id of `light_block` level 0; level N is `base + N`.
    #[serde(default = "default_light_runtime_id_base")]
    pub light_runtime_id_base: u32,
    #[serde(default = "default_interaction_entity")]
    pub interaction_entity: String,
    /// First synthetic id handed to interaction hitboxes.
    #[serde(default = "default_synthetic_id_start")]
    pub synthetic_id_start: i64,
}

fn default_settle_delay() -> u64 {
    4
}

fn default_load_settle_delay() -> u64 {
    2
}

fn default_view_radius() -> f32 {
    48.0
}

fn default_barrier_runtime_id() -> u32 {
    10390
}

fn default_light_runtime_id_base() -> u32 {
    10400
}

fn default_interaction_entity() -> String {
    "minecraft:interaction".into()
}

fn default_synthetic_id_start() -> i64 {
    1 << 40
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            settle_delay_ticks: default_settle_delay(),
            load_settle_delay_ticks: default_load_settle_delay(),
            view_radius: default_view_radius(),
            barrier_runtime_id: default_barrier_runtime_id(),
            light_runtime_id_base: default_light_runtime_id_base(),
            interaction_entity: default_interaction_entity(),
            synthetic_id_start: default_synthetic_id_start(),
        }
    }
}

impl EngineSettings {
    pub fn light_runtime_id(&self, level: u8) -> u32 {
        self.light_runtime_id_base + u32::from(level.min(15))
    }
}
