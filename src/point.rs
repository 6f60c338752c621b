use nalgebra::{Point3, Vector3};

/// Coordinate access for arbitrary point types.
///
/// The octree is generic over anything that can expose three `f32`
/// coordinates, so callers can index their own point types without
/// converting the whole cloud.
pub trait PointAccess {
    fn x(&self) -> f32;
    fn y(&self) -> f32;
    fn z(&self) -> f32;

    /// Coordinate by axis index, 0 = x, 1 = y, 2 = z.
    fn get(&self, axis: usize) -> f32 {
        match axis {
            0 => self.x(),
            1 => self.y(),
            2 => self.z(),
            _ => panic!("axis index out of range: {axis}"),
        }
    }
}

impl PointAccess for Point3<f32> {
    fn x(&self) -> f32 {
        self.coords.x
    }

    fn y(&self) -> f32 {
        self.coords.y
    }

    fn z(&self) -> f32 {
        self.coords.z
    }
}

impl PointAccess for Vector3<f32> {
    fn x(&self) -> f32 {
        self[0]
    }

    fn y(&self) -> f32 {
        self[1]
    }

    fn z(&self) -> f32 {
        self[2]
    }
}

impl PointAccess for [f32; 3] {
    fn x(&self) -> f32 {
        self[0]
    }

    fn y(&self) -> f32 {
        self[1]
    }

    fn z(&self) -> f32 {
        self[2]
    }
}

pub(crate) fn squared_distance<A: PointAccess, B: PointAccess>(a: &A, b: &B) -> f32 {
    let dx = a.x() - b.x();
    let dy = a.y() - b.y();
    let dz = a.z() - b.z();
    dx * dx + dy * dy + dz * dz
}
