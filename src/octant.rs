use nalgebra::Point3;

use crate::point::PointAccess;

/// A node of the octree: an axis-aligned cube holding a run of point
/// indices in the shared successor array.
///
/// `start` and `end` are the first and last indices of the run, `size` its
/// length. Children are indexed by the 3-bit Morton code of their position
/// relative to the center.
pub(crate) struct Octant {
    pub is_leaf: bool,
    pub center: Point3<f32>,
    pub extent: f32,
    pub start: u32,
    pub end: u32,
    pub size: u32,
    pub children: [Option<Box<Octant>>; 8],
}

impl Octant {
    pub fn new(center: Point3<f32>, extent: f32, start: u32, end: u32, size: u32) -> Self {
        Octant {
            is_leaf: true,
            center,
            extent,
            start,
            end,
            size,
            children: Default::default(),
        }
    }

    /// True if the search ball S(q, r) is completely inside this octant.
    ///
    /// Boundary contact counts as inside: the test only fails on strict
    /// overshoot past the extent.
    pub fn inside<Q: PointAccess>(&self, query: &Q, radius: f32) -> bool {
        let x = (query.x() - self.center.x).abs() + radius;
        let y = (query.y() - self.center.y).abs() + radius;
        let z = (query.z() - self.center.z).abs() + radius;

        x <= self.extent && y <= self.extent && z <= self.extent
    }

    /// True if the search ball S(q, r) contains this whole octant, i.e. the
    /// corner farthest from the query lies strictly inside the ball.
    pub fn contains<Q: PointAccess>(&self, query: &Q, sqr_radius: f32) -> bool {
        let x = (query.x() - self.center.x).abs() + self.extent;
        let y = (query.y() - self.center.y).abs() + self.extent;
        let z = (query.z() - self.center.z).abs() + self.extent;

        x * x + y * y + z * z < sqr_radius
    }

    /// True if the search ball S(q, r) intersects this octant.
    ///
    /// Symmetry reduces the test to the positive octant: after folding the
    /// offsets with abs(), the ball overlaps iff the folded query lies in
    /// the Minkowski sum of the cube and the ball. A ball that exactly
    /// touches a corner does not overlap (strict corner test).
    pub fn overlaps<Q: PointAccess>(&self, query: &Q, radius: f32, sqr_radius: f32) -> bool {
        let x = (query.x() - self.center.x).abs();
        let y = (query.y() - self.center.y).abs();
        let z = (query.z() - self.center.z).abs();

        let max_dist = radius + self.extent;

        if x > max_dist || y > max_dist || z > max_dist {
            return false;
        }

        let num_less_extent =
            (x < self.extent) as i32 + (y < self.extent) as i32 + (z < self.extent) as i32;

        // inside the face region of the octant
        if num_less_extent > 1 {
            return true;
        }

        // edge and corner regions
        let x = (x - self.extent).max(0.0);
        let y = (y - self.extent).max(0.0);
        let z = (z - self.extent).max(0.0);

        x * x + y * y + z * z < sqr_radius
    }
}

/// Morton code of `p` relative to `center`: bit 0 set when x is strictly
/// greater than the center's, bit 1 for y, bit 2 for z. Points exactly on a
/// separating plane land on the low side.
pub(crate) fn morton_code<Q: PointAccess>(p: &Q, center: &Point3<f32>) -> usize {
    let mut code = 0;
    if p.x() > center.x {
        code |= 1;
    }
    if p.y() > center.y {
        code |= 2;
    }
    if p.z() > center.z {
        code |= 4;
    }
    code
}

pub(crate) fn child_center(center: &Point3<f32>, extent: f32, code: usize) -> Point3<f32> {
    let offset = |bit: usize| {
        if code & bit != 0 {
            0.5 * extent
        } else {
            -0.5 * extent
        }
    };
    Point3::new(
        center.x + offset(1),
        center.y + offset(2),
        center.z + offset(4),
    )
}
