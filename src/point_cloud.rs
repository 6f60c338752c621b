use nalgebra::Point3;

use crate::point::PointAccess;

/// Random access over point storage.
///
/// The container must hand out points by index and report its size; the
/// octree never needs anything else from it.
pub trait PointContainer {
    type Point: PointAccess;

    fn point(&self, index: usize) -> &Self::Point;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<P: PointAccess> PointContainer for Vec<P> {
    type Point = P;

    fn point(&self, index: usize) -> &P {
        &self[index]
    }

    fn len(&self) -> usize {
        Vec::len(self)
    }
}

#[derive(Clone, Default)]
pub struct PointCloud {
    pub points: Vec<Point3<f32>>,
}

impl PointCloud {
    pub fn new() -> Self {
        PointCloud { points: Vec::new() }
    }

    pub fn from_points(points: Vec<Point3<f32>>) -> Self {
        PointCloud { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl PointContainer for PointCloud {
    type Point = Point3<f32>;

    fn point(&self, index: usize) -> &Point3<f32> {
        &self.points[index]
    }

    fn len(&self) -> usize {
        self.points.len()
    }
}
