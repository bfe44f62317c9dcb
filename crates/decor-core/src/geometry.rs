//! Offset rotation, block faces, transforms and axis-aligned boxes.

use decor_proto::types::{BlockPos, Vec3};
use serde::{Deserialize, Serialize};

/// Normalise a yaw angle into `[0, 360)`.
pub fn normalize_yaw(yaw: f32) -> f32 {
    let y = yaw % 360.0;
    if y < 0.0 {
        y + 360.0
    } else {
        y
    }
}

/// Rotate a local offset around the vertical axis by `yaw` degrees.
///
/// Standard 2D rotation of the `(x, z)` pair; `y` is untouched.
pub fn rotate_offset(offset: Vec3, yaw: f32) -> Vec3 {
    let radians = normalize_yaw(yaw).to_radians();
    let (sin, cos) = radians.sin_cos();
    Vec3::new(
        offset.x * cos - offset.z * sin,
        offset.y,
        offset.x * sin + offset.z * cos,
    )
}

/// Rotate an integer cell offset, rounding back onto the grid.
pub fn rotate_cell_offset(offset: BlockPos, yaw: f32) -> BlockPos {
    let rotated = rotate_offset(offset.corner(), yaw);
    BlockPos::new(
        rotated.x.round() as i32,
        offset.y,
        rotated.z.round() as i32,
    )
}

// ---------------------------------------------------------------------------
// BlockFace
// ---------------------------------------------------------------------------

/// The face of a block an object was placed against.
///
/// Declaration order matters: horizontal faces map to a wall yaw through
/// their position in the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockFace {
    North,
    East,
    South,
    West,
    Up,
    Down,
}

impl BlockFace {
    pub fn mod_x(&self) -> i32 {
        match self {
            BlockFace::East => 1,
            BlockFace::West => -1,
            _ => 0,
        }
    }

    pub fn mod_y(&self) -> i32 {
        match self {
            BlockFace::Up => 1,
            BlockFace::Down => -1,
            _ => 0,
        }
    }

    pub fn mod_z(&self) -> i32 {
        match self {
            BlockFace::South => 1,
            BlockFace::North => -1,
            _ => 0,
        }
    }

    pub fn is_horizontal(&self) -> bool {
        self.mod_y() == 0
    }

    pub fn opposite(&self) -> BlockFace {
        match self {
            BlockFace::North => BlockFace::South,
            BlockFace::South => BlockFace::North,
            BlockFace::East => BlockFace::West,
            BlockFace::West => BlockFace::East,
            BlockFace::Up => BlockFace::Down,
            BlockFace::Down => BlockFace::Up,
        }
    }

    /// Yaw an object mounted on this face looks towards.
    pub fn wall_yaw(&self) -> f32 {
        normalize_yaw(90.0 * (*self as u8) as f32 - 180.0)
    }

    pub fn parse(s: &str) -> Option<BlockFace> {
        match s.to_ascii_lowercase().as_str() {
            "north" => Some(BlockFace::North),
            "east" => Some(BlockFace::East),
            "south" => Some(BlockFace::South),
            "west" => Some(BlockFace::West),
            "up" => Some(BlockFace::Up),
            "down" => Some(BlockFace::Down),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Transform
// ---------------------------------------------------------------------------

/// Placement transform of a renderable proxy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub scale: Vec3,
}

impl Transform {
    pub fn new(position: Vec3, yaw: f32) -> Self {
        Self {
            position,
            yaw: normalize_yaw(yaw),
            pitch: 0.0,
            scale: Vec3::ONE,
        }
    }

    /// The cell the proxy stands in; barrier offsets are relative to it.
    pub fn anchor_cell(&self) -> BlockPos {
        BlockPos::from_vec3(&self.position)
    }

    pub fn with_yaw(mut self, yaw: f32) -> Self {
        self.yaw = normalize_yaw(yaw);
        self
    }
}

// ---------------------------------------------------------------------------
// Aabb
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Build from two corners in any order.
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: Vec3::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: Vec3::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        }
    }

    /// Box extending `half` in each direction from `center`.
    pub fn around(center: Vec3, half: Vec3) -> Self {
        Self::new(center - half, center + half)
    }

    /// The unit box occupied by a block cell.
    pub fn of_block(cell: BlockPos) -> Self {
        Self::new(cell.corner(), cell.corner() + Vec3::ONE)
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Strict overlap: boxes that only share a face do not intersect.
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
            && self.min.z < other.max.z
            && self.max.z > other.min.z
    }
}
