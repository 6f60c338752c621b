pub use crate::octree::{Octree, OctreeParams};
pub use crate::point::PointAccess;
pub use crate::point_cloud::{PointCloud, PointContainer};
