use std::ops;

/// Inspector motion vectors are stored in 1/8 pel units.
pub const MV_UNITS_PER_PIXEL: f32 = 8.0;

/// A 2-D displacement in pixels.
///
/// Points from a block in the current frame to the matching position in its
/// reference frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MotionVector {
    /// Vertical component, positive downwards
    pub row: f32,
    /// Horizontal component, positive to the right
    pub col: f32,
}

impl MotionVector {
    /// The zero vector.
    pub const ZERO: MotionVector = MotionVector { row: 0.0, col: 0.0 };

    /// Builds a vector from pixel components.
    #[inline]
    pub const fn new(row: f32, col: f32) -> Self {
        Self { row, col }
    }

    /// Converts a 1/8 pel vector as written by the inspector.
    #[inline]
    pub fn from_eighth_pel(row: i32, col: i32) -> Self {
        Self {
            row: row as f32 / MV_UNITS_PER_PIXEL,
            col: col as f32 / MV_UNITS_PER_PIXEL,
        }
    }

    /// Euclidean length.
    #[inline]
    pub fn magnitude(self) -> f32 {
        self.row.hypot(self.col)
    }

    /// Whether both components are exactly zero.
    #[inline]
    pub fn is_zero(self) -> bool {
        self.row == 0.0 && self.col == 0.0
    }
}

impl ops::Add<MotionVector> for MotionVector {
    type Output = MotionVector;

    #[inline]
    fn add(self, rhs: MotionVector) -> MotionVector {
        MotionVector {
            row: self.row + rhs.row,
            col: self.col + rhs.col,
        }
    }
}

impl ops::Sub<MotionVector> for MotionVector {
    type Output = MotionVector;

    #[inline]
    fn sub(self, rhs: MotionVector) -> MotionVector {
        MotionVector {
            row: self.row - rhs.row,
            col: self.col - rhs.col,
        }
    }
}

impl ops::Mul<f32> for MotionVector {
    type Output = MotionVector;

    #[inline]
    fn mul(self, rhs: f32) -> MotionVector {
        MotionVector {
            row: self.row * rhs,
            col: self.col * rhs,
        }
    }
}
