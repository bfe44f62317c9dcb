//! Mechanic descriptors and the catalog that owns them.
//!
//! A mechanic is loaded once per type id from the mechanics file and never
//! mutated afterwards. Reloading swaps the whole catalog snapshot, so any
//! `Arc<Mechanic>` handed out earlier stays valid until it is dropped.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use decor_proto::types::{BlockPos, Vec3};
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::CatalogError;
use crate::geometry::{normalize_yaw, BlockFace, Transform};
use crate::hitbox::{HitboxSet, LightBlock, SeatOffset};

// ---------------------------------------------------------------------------
// Rotation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationPolicy {
    /// Fixed to a cardinal direction; rotate requests are refused.
    None,
    Free,
    /// 22.5 degree steps.
    #[default]
    Strict,
    /// 45 degree steps.
    VeryStrict,
}

impl RotationPolicy {
    pub fn rotatable(&self) -> bool {
        !matches!(self, RotationPolicy::None)
    }

    /// Yaw added by a single rotate-step interaction.
    pub fn step(&self) -> Option<f32> {
        match self {
            RotationPolicy::None => None,
            RotationPolicy::Free | RotationPolicy::Strict => Some(22.5),
            RotationPolicy::VeryStrict => Some(45.0),
        }
    }

    /// Snap a requested yaw onto the grid this policy allows.
    pub fn snap(&self, yaw: f32) -> f32 {
        let grid = match self {
            RotationPolicy::None => 90.0,
            RotationPolicy::Free => return normalize_yaw(yaw),
            RotationPolicy::Strict => 22.5,
            RotationPolicy::VeryStrict => 45.0,
        };
        normalize_yaw((yaw / grid).round() * grid)
    }
}

// ---------------------------------------------------------------------------
// Placement rules
// ---------------------------------------------------------------------------

/// Which faces an object may be placed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LimitedPlacing {
    #[serde(default = "default_true")]
    pub floor: bool,
    #[serde(default)]
    pub wall: bool,
    #[serde(default)]
    pub roof: bool,
}

fn default_true() -> bool {
    true
}

impl Default for LimitedPlacing {
    fn default() -> Self {
        Self {
            floor: true,
            wall: false,
            roof: false,
        }
    }
}

impl LimitedPlacing {
    pub fn allows(&self, facing: BlockFace) -> bool {
        match facing {
            BlockFace::Up => self.floor,
            BlockFace::Down => self.roof,
            _ => self.wall || self.floor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayTransform {
    None,
    #[default]
    Fixed,
    Head,
    Gui,
    Ground,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DisplayProperties {
    #[serde(default)]
    pub transform: DisplayTransform,
    #[serde(default = "default_scale")]
    pub scale: Vec3,
}

fn default_scale() -> Vec3 {
    Vec3::ONE
}

impl Default for DisplayProperties {
    fn default() -> Self {
        Self {
            transform: DisplayTransform::default(),
            scale: default_scale(),
        }
    }
}

impl DisplayProperties {
    pub fn is_fixed(&self) -> bool {
        self.transform == DisplayTransform::Fixed
    }
}

/// Break behaviour. Break timing is left to the host; a `hardness` key in
/// the mechanics file is accepted and ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Breakable {
    /// Overrides the number of items handed to the drop handler.
    #[serde(default)]
    pub drop_amount: Option<u32>,
}

// ---------------------------------------------------------------------------
// Mechanic
// ---------------------------------------------------------------------------

/// Immutable behaviour and geometry shared by every object of one type.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Mechanic {
    #[serde(skip)]
    pub type_id: String,
    #[serde(default)]
    pub hitbox: HitboxSet,
    #[serde(default)]
    pub lights: Vec<LightBlock>,
    #[serde(default)]
    pub light_toggleable: bool,
    #[serde(default)]
    pub seats: Vec<SeatOffset>,
    #[serde(default)]
    pub rotation: RotationPolicy,
    /// Absent means the object may be placed against any face.
    #[serde(default)]
    pub limited_placing: Option<LimitedPlacing>,
    #[serde(default)]
    pub properties: DisplayProperties,
    #[serde(default)]
    pub breakable: Breakable,
    #[serde(default)]
    pub model_engine_id: Option<String>,
}

impl Mechanic {
    pub fn new(type_id: impl Into<String>) -> Self {
        Self {
            type_id: type_id.into(),
            hitbox: HitboxSet::default(),
            lights: Vec::new(),
            light_toggleable: false,
            seats: Vec::new(),
            rotation: RotationPolicy::default(),
            limited_placing: None,
            properties: DisplayProperties::default(),
            breakable: Breakable::default(),
            model_engine_id: None,
        }
    }

    pub fn allows_face(&self, facing: BlockFace) -> bool {
        self.limited_placing.map_or(true, |lp| lp.allows(facing))
    }

    pub fn is_floor(&self) -> bool {
        self.limited_placing.is_some_and(|lp| lp.floor)
    }

    pub fn is_wall(&self) -> bool {
        self.limited_placing.is_some_and(|lp| lp.wall)
    }

    pub fn is_roof(&self) -> bool {
        self.limited_placing.is_some_and(|lp| lp.roof)
    }

    /// Distinct absolute light cells and their levels for a transform.
    pub fn light_cells(&self, transform: &Transform) -> Vec<(BlockPos, u8)> {
        let anchor = transform.anchor_cell();
        let mut cells: Vec<(BlockPos, u8)> = Vec::with_capacity(self.lights.len());
        for light in &self.lights {
            let cell = light.cell(anchor, transform.yaw);
            if !cells.iter().any(|(c, _)| *c == cell) {
                cells.push((cell, light.level));
            }
        }
        cells
    }

    /// Whether objects of this type claim their anchor cell as a footprint.
    ///
    /// Only objects without barrier or interaction hitboxes do, and only if
    /// no light already sits in the anchor cell.
    pub fn claims_footprint(&self, transform: &Transform) -> bool {
        let anchor = transform.anchor_cell();
        self.hitbox.is_empty() && !self.light_cells(transform).iter().any(|(c, _)| *c == anchor)
    }

    /// Every cell an object of this type holds exclusively at `transform`:
    /// barrier cells, light cells and the footprint.
    pub fn claimed_cells(&self, transform: &Transform) -> Vec<BlockPos> {
        let mut cells = self.hitbox.barrier_cells(transform);
        if self.claims_footprint(transform) {
            cells.push(transform.anchor_cell());
        }
        for (cell, _) in self.light_cells(transform) {
            if !cells.contains(&cell) {
                cells.push(cell);
            }
        }
        cells
    }

    /// Check descriptors and drop lights that would sit inside a barrier.
    fn validate(&mut self) -> Result<(), CatalogError> {
        for hitbox in &self.hitbox.interactions {
            if hitbox.width <= 0.0 || hitbox.height <= 0.0 {
                return Err(CatalogError::InvalidHitbox {
                    type_id: self.type_id.clone(),
                    reason: format!("non-positive size {}x{}", hitbox.width, hitbox.height),
                });
            }
        }
        let barriers = &self.hitbox.barriers;
        let before = self.lights.len();
        self.lights
            .retain(|light| !barriers.iter().any(|b| b.offset == light.offset));
        if self.lights.len() != before {
            warn!(
                "Mechanic '{}' has {} light(s) overlapping barrier hitboxes; ignoring them",
                self.type_id,
                before - self.lights.len()
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct MechanicsFile {
    #[serde(default)]
    mechanics: HashMap<String, Mechanic>,
}

pub type MechanicMap = HashMap<String, Arc<Mechanic>>;

/// Parse a mechanics file body into a validated map.
pub fn parse_mechanics(text: &str) -> Result<MechanicMap, CatalogError> {
    let file: MechanicsFile = toml::from_str(text)?;
    let mut out = HashMap::with_capacity(file.mechanics.len());
    for (type_id, mut mechanic) in file.mechanics {
        mechanic.type_id = type_id.clone();
        mechanic.validate()?;
        out.insert(type_id, Arc::new(mechanic));
    }
    Ok(out)
}

pub fn load_mechanics<P: AsRef<Path>>(path: P) -> Result<MechanicMap, CatalogError> {
    let text = std::fs::read_to_string(path.as_ref())?;
    let map = parse_mechanics(&text)?;
    info!(
        "Loaded {} mechanic(s) from {}",
        map.len(),
        path.as_ref().display()
    );
    Ok(map)
}

/// Process-wide mechanic lookup, replaced wholesale on reload.
#[derive(Debug, Default)]
pub struct MechanicCatalog {
    snapshot: RwLock<Arc<MechanicMap>>,
}

impl MechanicCatalog {
    pub fn new(mechanics: MechanicMap) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(mechanics)),
        }
    }

    pub fn from_mechanics(mechanics: impl IntoIterator<Item = Mechanic>) -> Self {
        Self::new(
            mechanics
                .into_iter()
                .map(|m| (m.type_id.clone(), Arc::new(m)))
                .collect(),
        )
    }

    pub fn get(&self, type_id: &str) -> Option<Arc<Mechanic>> {
        self.snapshot.read().get(type_id).cloned()
    }

    pub fn contains(&self, type_id: &str) -> bool {
        self.snapshot.read().contains_key(type_id)
    }

    /// Swap in a new set of mechanics. Returns the previous snapshot.
    pub fn replace(&self, mechanics: MechanicMap) -> Arc<MechanicMap> {
        let mut guard = self.snapshot.write();
        std::mem::replace(&mut *guard, Arc::new(mechanics))
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.snapshot.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [mechanics.chair]
        rotation = "very_strict"
        seats = ["0,0.4,0"]

        [mechanics.chair.hitbox]
        barriers = ["0,0,0"]
        interactions = ["0,0.5,0 1,1"]

        [mechanics.lamp]
        lights = ["0,0,0 12", "0,1,0"]
        light_toggleable = true
        limited_placing = { floor = true, wall = true, roof = true }

        [mechanics.lamp.hitbox]
        barriers = ["0,0,0"]

        [mechanics.painting]
        rotation = "none"
        properties = { transform = "fixed", scale = { x = 2.0, y = 1.0, z = 0.1 } }
        breakable = { hardness = 0.5, drop_amount = 2 }
    "#;

    #[test]
    fn parse_sample_file() {
        let map = parse_mechanics(SAMPLE).unwrap();
        assert_eq!(map.len(), 3);

        let chair = &map["chair"];
        assert_eq!(chair.type_id, "chair");
        assert_eq!(chair.rotation, RotationPolicy::VeryStrict);
        assert_eq!(chair.seats.len(), 1);
        assert_eq!(chair.hitbox.barriers[0].offset, BlockPos::new(0, 0, 0));
        assert_eq!(chair.hitbox.interactions[0].height, 1.0);
        assert!(chair.limited_placing.is_none());
        assert!(chair.allows_face(BlockFace::Down));
        assert!(!chair.is_floor());

        let lamp = &map["lamp"];
        assert!(lamp.is_floor() && lamp.is_wall() && lamp.is_roof());

        let painting = &map["painting"];
        assert!(painting.properties.is_fixed());
        assert_eq!(painting.properties.scale, Vec3::new(2.0, 1.0, 0.1));
        assert_eq!(painting.breakable.drop_amount, Some(2));
    }

    #[test]
    fn lights_overlapping_barriers_are_dropped() {
        let map = parse_mechanics(SAMPLE).unwrap();
        let lamp = &map["lamp"];
        assert_eq!(lamp.lights.len(), 1);
        assert_eq!(lamp.lights[0].offset, BlockPos::new(0, 1, 0));
        assert_eq!(lamp.lights[0].level, 15);
    }

    #[test]
    fn zero_sized_interaction_is_rejected() {
        let text = r#"
            [mechanics.bad.hitbox]
            interactions = ["0,0,0 0,1"]
        "#;
        assert!(matches!(
            parse_mechanics(text),
            Err(CatalogError::InvalidHitbox { .. })
        ));
    }

    #[test]
    fn malformed_hitbox_is_a_parse_error() {
        let text = r#"
            [mechanics.bad.hitbox]
            barriers = ["x,y"]
        "#;
        assert!(matches!(parse_mechanics(text), Err(CatalogError::Parse(_))));
    }

    #[test]
    fn rotation_snapping() {
        assert_eq!(RotationPolicy::Strict.snap(30.0), 22.5);
        assert_eq!(RotationPolicy::VeryStrict.snap(30.0), 45.0);
        assert_eq!(RotationPolicy::None.snap(100.0), 90.0);
        assert_eq!(RotationPolicy::Free.snap(-10.0), 350.0);
        assert_eq!(RotationPolicy::None.step(), None);
        assert_eq!(RotationPolicy::VeryStrict.step(), Some(45.0));
    }

    #[test]
    fn limited_placing_faces() {
        let floor_only = LimitedPlacing::default();
        assert!(floor_only.allows(BlockFace::Up));
        assert!(!floor_only.allows(BlockFace::Down));
        let roof = LimitedPlacing {
            floor: false,
            wall: false,
            roof: true,
        };
        assert!(roof.allows(BlockFace::Down));
        assert!(!roof.allows(BlockFace::North));
    }

    #[test]
    fn catalog_replace_keeps_old_arcs_alive() {
        let catalog = MechanicCatalog::from_mechanics([Mechanic::new("chair")]);
        let held = catalog.get("chair").unwrap();
        catalog.replace(parse_mechanics(SAMPLE).unwrap());
        assert_eq!(held.type_id, "chair");
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.type_ids(), vec!["chair", "lamp", "painting"]);
        assert!(catalog.get("missing").is_none());
    }

    #[test]
    fn claimed_cells_include_lights() {
        let map = parse_mechanics(
            r#"
            [mechanics.street_lamp]
            lights = ["0,3,0 15"]

            [mechanics.street_lamp.hitbox]
            barriers = ["0,0,0", "0,1,0", "0,2,0"]

            [mechanics.glow]
            lights = ["0,0,0 9"]

            [mechanics.sconce]
            lights = ["1,0,0 9"]
        "#,
        )
        .unwrap();
        let at = Transform::new(Vec3::new(0.5, 64.0, 0.5), 0.0);

        assert_eq!(
            map["street_lamp"].claimed_cells(&at),
            vec![
                BlockPos::new(0, 64, 0),
                BlockPos::new(0, 65, 0),
                BlockPos::new(0, 66, 0),
                BlockPos::new(0, 67, 0),
            ]
        );
        assert_eq!(map["street_lamp"].light_cells(&at), vec![(BlockPos::new(0, 67, 0), 15)]);

        // A light in the anchor cell stands in for the footprint.
        assert!(!map["glow"].claims_footprint(&at));
        assert_eq!(map["glow"].claimed_cells(&at), vec![BlockPos::new(0, 64, 0)]);

        assert!(map["sconce"].claims_footprint(&at));
        assert_eq!(
            map["sconce"].claimed_cells(&at),
            vec![BlockPos::new(0, 64, 0), BlockPos::new(1, 64, 0)]
        );
        assert_eq!(Mechanic::new("empty").claimed_cells(&at), vec![BlockPos::new(0, 64, 0)]);
    }
}
