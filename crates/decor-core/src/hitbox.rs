//! Hitbox and light descriptors parsed from mechanic configuration.
//!
//! Descriptors are immutable values shared by every placed instance of a
//! mechanic. All geometry is computed on demand from a transform.

use decor_proto::types::{BlockPos, Vec3};
use serde::Deserialize;

use crate::error::HitboxParseError;
use crate::geometry::{rotate_cell_offset, rotate_offset, Aabb, Transform};

/// Parse `"x,y,z"` into three floats. Missing components default to `0`.
fn parse_vector(s: &str) -> Result<Vec3, HitboxParseError> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(Vec3::ZERO);
    }
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() > 3 {
        return Err(HitboxParseError::BadVector(s.to_string()));
    }
    let mut out = [0.0f32; 3];
    for (slot, part) in out.iter_mut().zip(&parts) {
        *slot = part
            .parse()
            .map_err(|_| HitboxParseError::BadNumber(part.to_string()))?;
    }
    Ok(Vec3::new(out[0], out[1], out[2]))
}

fn parse_cell(s: &str) -> Result<BlockPos, HitboxParseError> {
    let v = parse_vector(s)?;
    Ok(BlockPos::new(
        v.x.floor() as i32,
        v.y.floor() as i32,
        v.z.floor() as i32,
    ))
}

// ---------------------------------------------------------------------------
// BarrierHitbox
// ---------------------------------------------------------------------------

/// A solid cell, relative to the object's anchor cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct BarrierHitbox {
    pub offset: BlockPos,
}

impl BarrierHitbox {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self {
            offset: BlockPos::new(x, y, z),
        }
    }

    /// Absolute cell for an anchor and yaw.
    pub fn cell(&self, anchor: BlockPos, yaw: f32) -> BlockPos {
        let r = rotate_cell_offset(self.offset, yaw);
        anchor.offset(r.x, r.y, r.z)
    }
}

impl TryFrom<String> for BarrierHitbox {
    type Error = HitboxParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Ok(Self {
            offset: parse_cell(&s)?,
        })
    }
}

// ---------------------------------------------------------------------------
// InteractionHitbox
// ---------------------------------------------------------------------------

/// An entity-shaped, intangible but clickable box: `"x,y,z width,height"`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "String")]
pub struct InteractionHitbox {
    pub offset: Vec3,
    pub width: f32,
    pub height: f32,
}

impl Default for InteractionHitbox {
    fn default() -> Self {
        Self {
            offset: Vec3::ZERO,
            width: 1.0,
            height: 1.0,
        }
    }
}

impl InteractionHitbox {
    pub fn new(offset: Vec3, width: f32, height: f32) -> Self {
        Self {
            offset,
            width,
            height,
        }
    }

    /// Offset rotated by the object's yaw.
    pub fn offset(&self, yaw: f32) -> Vec3 {
        rotate_offset(self.offset, yaw)
    }

    /// World-space centre for a transform.
    pub fn center(&self, transform: &Transform) -> Vec3 {
        transform.position + self.offset(transform.yaw)
    }

    pub fn bounding_box(&self, center: Vec3) -> Aabb {
        Aabb::around(
            center,
            Vec3::new(self.width / 2.0, self.height / 2.0, self.width / 2.0),
        )
    }
}

impl TryFrom<String> for InteractionHitbox {
    type Error = HitboxParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let mut parts = s.trim().splitn(2, ' ');
        let offset = parse_vector(parts.next().unwrap_or("0,0,0"))?;
        let (width, height) = match parts.next().map(str::trim) {
            None | Some("") => (1.0, 1.0),
            Some(size) => {
                let (w, h) = size.split_once(',').unwrap_or((size, "1"));
                let w = w
                    .trim()
                    .parse::<f32>()
                    .map_err(|_| HitboxParseError::BadSize(size.to_string()))?;
                let h = h
                    .trim()
                    .parse::<f32>()
                    .map_err(|_| HitboxParseError::BadSize(size.to_string()))?;
                (w, h)
            }
        };
        Ok(Self {
            offset,
            width,
            height,
        })
    }
}

// ---------------------------------------------------------------------------
// LightBlock
// ---------------------------------------------------------------------------

/// A fake light-emitting cell: `"x,y,z level"` (level defaults to 15).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct LightBlock {
    pub offset: BlockPos,
    pub level: u8,
}

impl LightBlock {
    pub const MAX_LEVEL: u8 = 15;

    pub fn cell(&self, anchor: BlockPos, yaw: f32) -> BlockPos {
        let r = rotate_cell_offset(self.offset, yaw);
        anchor.offset(r.x, r.y, r.z)
    }
}

impl TryFrom<String> for LightBlock {
    type Error = HitboxParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let s = s.trim();
        let (pos, level) = s.split_once(' ').unwrap_or((s, ""));
        let level = level
            .trim()
            .parse::<i32>()
            .map(|l| l.clamp(0, Self::MAX_LEVEL as i32) as u8)
            .unwrap_or(Self::MAX_LEVEL);
        Ok(Self {
            offset: parse_cell(pos)?,
            level,
        })
    }
}

// ---------------------------------------------------------------------------
// SeatOffset
// ---------------------------------------------------------------------------

/// Where a seat dependent sits relative to the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "String")]
pub struct SeatOffset(pub Vec3);

impl SeatOffset {
    pub fn position(&self, transform: &Transform) -> Vec3 {
        transform.position + rotate_offset(self.0, transform.yaw)
    }
}

impl TryFrom<String> for SeatOffset {
    type Error = HitboxParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        parse_vector(&s).map(SeatOffset)
    }
}

// ---------------------------------------------------------------------------
// HitboxSet
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HitboxSet {
    #[serde(default)]
    pub barriers: Vec<BarrierHitbox>,
    #[serde(default)]
    pub interactions: Vec<InteractionHitbox>,
}

impl HitboxSet {
    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty() && self.interactions.is_empty()
    }

    /// Distinct absolute barrier cells for a transform, in config order.
    pub fn barrier_cells(&self, transform: &Transform) -> Vec<BlockPos> {
        let anchor = transform.anchor_cell();
        let mut cells: Vec<BlockPos> = Vec::with_capacity(self.barriers.len());
        for barrier in &self.barriers {
            let cell = barrier.cell(anchor, transform.yaw);
            if !cells.contains(&cell) {
                cells.push(cell);
            }
        }
        cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_barrier() {
        let b = BarrierHitbox::try_from("1, 0,-2".to_string()).unwrap();
        assert_eq!(b.offset, BlockPos::new(1, 0, -2));
    }

    #[test]
    fn parse_barrier_rejects_garbage() {
        assert!(BarrierHitbox::try_from("a,b,c".to_string()).is_err());
        assert!(BarrierHitbox::try_from("1,2,3,4".to_string()).is_err());
    }

    #[test]
    fn parse_interaction_with_size() {
        let h = InteractionHitbox::try_from("0.5,0,0 2,1.5".to_string()).unwrap();
        assert_eq!(h.offset, Vec3::new(0.5, 0.0, 0.0));
        assert_eq!(h.width, 2.0);
        assert_eq!(h.height, 1.5);
    }

    #[test]
    fn parse_interaction_defaults_size() {
        let h = InteractionHitbox::try_from("0,1,0".to_string()).unwrap();
        assert_eq!(h.width, 1.0);
        assert_eq!(h.height, 1.0);
    }

    #[test]
    fn parse_interaction_bad_size() {
        assert!(InteractionHitbox::try_from("0,0,0 wide,1".to_string()).is_err());
    }

    #[test]
    fn parse_light_level_clamps_and_defaults() {
        let l = LightBlock::try_from("0,1,0 20".to_string()).unwrap();
        assert_eq!(l.level, 15);
        let l = LightBlock::try_from("0,1,0 7".to_string()).unwrap();
        assert_eq!(l.level, 7);
        let l = LightBlock::try_from("0,1,0".to_string()).unwrap();
        assert_eq!(l.level, 15);
    }

    #[test]
    fn interaction_box_is_centered() {
        let h = InteractionHitbox::new(Vec3::new(0.5, 0.0, 0.0), 1.0, 1.0);
        let t = Transform::new(Vec3::new(10.5, 64.0, 10.5), 0.0);
        let center = h.center(&t);
        assert_eq!(center, Vec3::new(11.0, 64.0, 10.5));
        let bb = h.bounding_box(center);
        assert_eq!(bb.min, Vec3::new(10.5, 63.5, 10.0));
        assert_eq!(bb.max, Vec3::new(11.5, 64.5, 11.0));
    }

    #[test]
    fn barrier_cells_follow_yaw() {
        let set = HitboxSet {
            barriers: vec![BarrierHitbox::new(0, 0, 0), BarrierHitbox::new(1, 0, 0)],
            interactions: vec![],
        };
        let t = Transform::new(Vec3::new(0.5, 64.0, 0.5), 90.0);
        assert_eq!(
            set.barrier_cells(&t),
            vec![BlockPos::new(0, 64, 0), BlockPos::new(0, 64, 1)]
        );
    }

    #[test]
    fn barrier_cells_are_deduplicated() {
        let set = HitboxSet {
            barriers: vec![BarrierHitbox::new(0, 0, 0), BarrierHitbox::new(0, 0, 0)],
            interactions: vec![],
        };
        let t = Transform::new(Vec3::new(0.5, 64.0, 0.5), 0.0);
        assert_eq!(set.barrier_cells(&t).len(), 1);
    }

    #[test]
    fn seat_offset_rotates_with_object() {
        let seat = SeatOffset(Vec3::new(1.0, 0.5, 0.0));
        let t = Transform::new(Vec3::new(0.0, 0.0, 0.0), 90.0);
        let p = seat.position(&t);
        assert!(p.x.abs() < 1e-5);
        assert!((p.z - 1.0).abs() < 1e-5);
        assert_eq!(p.y, 0.5);
    }
}
