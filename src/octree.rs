use std::borrow::Cow;

use log::debug;
use nalgebra::Point3;
use rayon::prelude::*;

use crate::octant::{child_center, morton_code, Octant};
use crate::point::{squared_distance, PointAccess};
use crate::point_cloud::PointContainer;

#[derive(Debug, Clone, Copy)]
pub struct OctreeParams {
    /// A node with at most this many points stays a leaf.
    pub bucket_size: u32,
    /// Take a deep copy of the container instead of borrowing it.
    pub copy_points: bool,
    /// A node with extent at most twice this value stays a leaf regardless
    /// of size. Zero disables the cutoff.
    pub min_extent: f32,
}

impl Default for OctreeParams {
    fn default() -> Self {
        OctreeParams {
            bucket_size: 32,
            copy_points: false,
            min_extent: 0.0,
        }
    }
}

/// Index-based octree over a point container.
///
/// Construction reorders an index set in place so that the points of each
/// octant form a contiguous singly-linked run in a shared successor array.
/// A ball that fully contains an octant then accepts the octant's whole run
/// without any per-point distance test, which is what makes the radius
/// queries fast.
///
/// The tree either borrows the container or owns a deep copy, depending on
/// [`OctreeParams::copy_points`]. When borrowing, the container must stay
/// live and unchanged for the tree's lifetime; the borrow checker enforces
/// exactly that.
pub struct Octree<'a, C: PointContainer + Clone> {
    params: OctreeParams,
    data: Option<Cow<'a, C>>,
    successors: Vec<u32>,
    root: Option<Box<Octant>>,
    // Morton-slot paths of the octants enumerated by the last
    // octants_at_depth call, in enumeration order.
    enumerated: Vec<Vec<u8>>,
}

impl<'a, C: PointContainer + Clone> Octree<'a, C> {
    /// Build an octree over all points of the container.
    pub fn new(points: &'a C, params: OctreeParams) -> Self {
        let data: Cow<'a, C> = if params.copy_points {
            Cow::Owned(points.clone())
        } else {
            Cow::Borrowed(points)
        };
        let n = data.len();
        assert!(n <= u32::MAX as usize, "point count exceeds index range");

        if n == 0 {
            return Octree {
                params,
                data: Some(data),
                successors: Vec::new(),
                root: None,
                enumerated: Vec::new(),
            };
        }

        // One pass: link every point to the next and grow the bounding box.
        let mut successors = Vec::with_capacity(n);
        let first = data.point(0);
        let mut min = [first.x(), first.y(), first.z()];
        let mut max = min;
        for i in 0..n {
            successors.push(i as u32 + 1);
            let p = data.point(i);
            for axis in 0..3 {
                let v = p.get(axis);
                min[axis] = min[axis].min(v);
                max[axis] = max[axis].max(v);
            }
        }

        let (center, extent) = bounding_cube(&min, &max);
        debug!("building octree over {n} points, root extent {extent}");

        let root = create_octant(
            &params,
            &*data,
            &mut successors,
            center,
            extent,
            0,
            n as u32 - 1,
            n as u32,
        );

        Octree {
            params,
            data: Some(data),
            successors,
            root: Some(root),
            enumerated: Vec::new(),
        }
    }

    /// Build an octree over the subset of points named by `indices`, in
    /// that order. All other indices stay inactive and are never reported
    /// by queries.
    ///
    /// Panics if an index is out of range for the container.
    pub fn with_indices(points: &'a C, indices: &[u32], params: OctreeParams) -> Self {
        let data: Cow<'a, C> = if params.copy_points {
            Cow::Owned(points.clone())
        } else {
            Cow::Borrowed(points)
        };
        let n = data.len();
        assert!(n <= u32::MAX as usize, "point count exceeds index range");

        let mut successors = vec![0u32; n];
        if indices.is_empty() {
            return Octree {
                params,
                data: Some(data),
                successors,
                root: None,
                enumerated: Vec::new(),
            };
        }

        // Imprint the caller's order into the successor array and compute
        // the bounds over the subset only.
        let mut last = indices[0];
        let first = data.point(last as usize);
        let mut min = [first.x(), first.y(), first.z()];
        let mut max = min;
        for &idx in &indices[1..] {
            successors[last as usize] = idx;
            let p = data.point(idx as usize);
            for axis in 0..3 {
                let v = p.get(axis);
                min[axis] = min[axis].min(v);
                max[axis] = max[axis].max(v);
            }
            last = idx;
        }

        let (center, extent) = bounding_cube(&min, &max);
        debug!(
            "building octree over {} of {n} points, root extent {extent}",
            indices.len()
        );

        let root = create_octant(
            &params,
            &*data,
            &mut successors,
            center,
            extent,
            indices[0],
            last,
            indices.len() as u32,
        );

        Octree {
            params,
            data: Some(data),
            successors,
            root: Some(root),
            enumerated: Vec::new(),
        }
    }

    /// Release the tree, the successor array and the container (the owned
    /// copy when `copy_points` was set, the borrow otherwise). Queries on a
    /// cleared tree report no results.
    pub fn clear(&mut self) {
        self.root = None;
        self.data = None;
        self.successors = Vec::new();
        self.enumerated.clear();
    }

    /// The parameters the tree was built with.
    pub fn params(&self) -> &OctreeParams {
        &self.params
    }

    /// Number of points in the active set.
    pub fn num_points(&self) -> usize {
        self.root.as_ref().map_or(0, |root| root.size as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Indices of all points within `radius` of `query` (strictly less
    /// than, in Euclidean distance). Output order follows tree traversal
    /// and is deterministic, but not sorted by distance.
    pub fn radius_neighbors<Q: PointAccess>(&self, query: &Q, radius: f32) -> Vec<u32> {
        let mut indices = Vec::new();
        let (Some(root), Some(points)) = (self.root.as_deref(), self.points()) else {
            return indices;
        };
        self.radius_neighbors_rec(
            root,
            points,
            query,
            radius,
            radius * radius,
            &mut indices,
            None,
        );
        indices
    }

    /// Like [`radius_neighbors`](Self::radius_neighbors), additionally
    /// returning the squared distance of every reported point.
    pub fn radius_neighbors_with_distances<Q: PointAccess>(
        &self,
        query: &Q,
        radius: f32,
    ) -> (Vec<u32>, Vec<f32>) {
        let mut indices = Vec::new();
        let mut distances = Vec::new();
        if let (Some(root), Some(points)) = (self.root.as_deref(), self.points()) {
            self.radius_neighbors_rec(
                root,
                points,
                query,
                radius,
                radius * radius,
                &mut indices,
                Some(&mut distances),
            );
        }
        (indices, distances)
    }

    /// Index of the point closest to `query`, or `None` on an empty tree.
    ///
    /// With `min_distance` set, only points strictly farther than that
    /// distance qualify; `Some(0.0)` therefore suppresses self-matches when
    /// the query is itself a point of the cloud. Among equidistant
    /// candidates the first one reached in traversal order wins.
    pub fn find_neighbor<Q: PointAccess>(
        &self,
        query: &Q,
        min_distance: Option<f32>,
    ) -> Option<u32> {
        let root = self.root.as_deref()?;
        let points = self.points()?;
        let sqr_min = min_distance.filter(|d| *d >= 0.0).map(|d| d * d);

        let mut max_distance = f32::INFINITY;
        let mut result = None;
        self.find_neighbor_rec(root, points, query, sqr_min, &mut max_distance, &mut result);
        result
    }

    /// Point-index lists of all non-empty octants at the given tree depth
    /// (the root's children are depth 1). Returns `None` when the depth is
    /// zero, the tree is empty, or no octant exists at that depth.
    ///
    /// The enumerated octants are retained, in order, as the targets for
    /// subsequent [`radius_search_limited`](Self::radius_search_limited)
    /// calls.
    pub fn octants_at_depth(&mut self, depth: usize) -> Option<Vec<Vec<u32>>> {
        self.enumerated.clear();
        if depth < 1 {
            return None;
        }

        let mut paths = Vec::new();
        {
            let root = self.root.as_deref()?;
            let mut path = Vec::new();
            collect_octant_paths(root, 1, depth, &mut path, &mut paths);
        }
        self.enumerated = paths;

        let root = self.root.as_deref()?;
        let successors = &self.successors;
        // The runs of the enumerated octants are disjoint, so extraction
        // parallelizes over them with read-only shared state.
        let lists: Vec<Vec<u32>> = self
            .enumerated
            .par_iter()
            .map(|path| match resolve_path(root, path) {
                Some(node) => collect_run(successors, node),
                None => Vec::new(),
            })
            .collect();

        (!lists.is_empty()).then_some(lists)
    }

    /// Radius query restricted to one octant of the last
    /// [`octants_at_depth`](Self::octants_at_depth) enumeration.
    ///
    /// Succeeds when that octant alone can account for every neighbor: the
    /// ball lies inside it, or no other enumerated octant overlaps the
    /// ball. Returns `None` when the index is out of range or the caller
    /// must fall back to a full query.
    pub fn radius_search_limited<Q: PointAccess>(
        &self,
        octant_index: usize,
        query: &Q,
        radius: f32,
    ) -> Option<Vec<u32>> {
        let mut indices = Vec::new();
        self.radius_search_limited_impl(octant_index, query, radius, &mut indices, None)
            .then_some(indices)
    }

    /// Like [`radius_search_limited`](Self::radius_search_limited), with
    /// squared distances.
    pub fn radius_search_limited_with_distances<Q: PointAccess>(
        &self,
        octant_index: usize,
        query: &Q,
        radius: f32,
    ) -> Option<(Vec<u32>, Vec<f32>)> {
        let mut indices = Vec::new();
        let mut distances = Vec::new();
        self.radius_search_limited_impl(
            octant_index,
            query,
            radius,
            &mut indices,
            Some(&mut distances),
        )
        .then_some((indices, distances))
    }

    fn points(&self) -> Option<&C> {
        self.data.as_deref()
    }

    #[allow(clippy::too_many_arguments)]
    fn radius_neighbors_rec<Q: PointAccess>(
        &self,
        octant: &Octant,
        points: &C,
        query: &Q,
        radius: f32,
        sqr_radius: f32,
        indices: &mut Vec<u32>,
        mut distances: Option<&mut Vec<f32>>,
    ) {
        // If the ball contains the whole octant, take its run as-is.
        if octant.contains(query, sqr_radius) {
            let mut idx = octant.start;
            for _ in 0..octant.size {
                indices.push(idx);
                if let Some(distances) = distances.as_deref_mut() {
                    distances.push(squared_distance(query, points.point(idx as usize)));
                }
                idx = self.successors[idx as usize];
            }
            return;
        }

        if octant.is_leaf {
            let mut idx = octant.start;
            for _ in 0..octant.size {
                let dist = squared_distance(query, points.point(idx as usize));
                if dist < sqr_radius {
                    indices.push(idx);
                    if let Some(distances) = distances.as_deref_mut() {
                        distances.push(dist);
                    }
                }
                idx = self.successors[idx as usize];
            }
            return;
        }

        for child in octant.children.iter().flatten() {
            if child.overlaps(query, radius, sqr_radius) {
                self.radius_neighbors_rec(
                    child,
                    points,
                    query,
                    radius,
                    sqr_radius,
                    indices,
                    distances.as_deref_mut(),
                );
            }
        }
    }

    /// Returns true once the ball around the current best is completely
    /// inside `octant`, which lets every caller up the stack stop early.
    fn find_neighbor_rec<Q: PointAccess>(
        &self,
        octant: &Octant,
        points: &C,
        query: &Q,
        sqr_min: Option<f32>,
        max_distance: &mut f32,
        result: &mut Option<u32>,
    ) -> bool {
        if octant.is_leaf {
            let mut sqr_max = *max_distance * *max_distance;
            let mut idx = octant.start;
            for _ in 0..octant.size {
                let dist = squared_distance(query, points.point(idx as usize));
                if sqr_min.map_or(true, |m| dist > m) && dist < sqr_max {
                    *result = Some(idx);
                    sqr_max = dist;
                }
                idx = self.successors[idx as usize];
            }
            *max_distance = sqr_max.sqrt();
            return octant.inside(query, *max_distance);
        }

        // Descend into the child the query falls into first.
        let code = morton_code(query, &octant.center);
        if let Some(child) = octant.children[code].as_deref() {
            if self.find_neighbor_rec(child, points, query, sqr_min, max_distance, result) {
                return true;
            }
        }

        // Then the remaining children whose cubes still overlap the
        // current best ball.
        let sqr_max = *max_distance * *max_distance;
        for (slot, child) in octant.children.iter().enumerate() {
            if slot == code {
                continue;
            }
            let Some(child) = child else {
                continue;
            };
            if !child.overlaps(query, *max_distance, sqr_max) {
                continue;
            }
            if self.find_neighbor_rec(child, points, query, sqr_min, max_distance, result) {
                return true;
            }
        }

        octant.inside(query, *max_distance)
    }

    fn radius_search_limited_impl<Q: PointAccess>(
        &self,
        octant_index: usize,
        query: &Q,
        radius: f32,
        indices: &mut Vec<u32>,
        distances: Option<&mut Vec<f32>>,
    ) -> bool {
        let (Some(root), Some(points)) = (self.root.as_deref(), self.points()) else {
            return false;
        };
        let Some(path) = self.enumerated.get(octant_index) else {
            return false;
        };
        let Some(target) = resolve_path(root, path) else {
            return false;
        };

        let sqr_radius = radius * radius;
        if !target.inside(query, radius) {
            // The ball escapes the octant; any other enumerated octant
            // overlapping it could hold neighbors we would miss.
            for (i, other) in self.enumerated.iter().enumerate() {
                if i == octant_index {
                    continue;
                }
                let overlapping = resolve_path(root, other)
                    .map_or(false, |o| o.overlaps(query, radius, sqr_radius));
                if overlapping {
                    return false;
                }
            }
        }

        self.radius_neighbors_rec(target, points, query, radius, sqr_radius, indices, distances);
        true
    }
}

fn bounding_cube(min: &[f32; 3], max: &[f32; 3]) -> (Point3<f32>, f32) {
    let mut center = [0.0f32; 3];
    let mut extent = 0.0f32;
    for axis in 0..3 {
        let half = 0.5 * (max[axis] - min[axis]);
        center[axis] = min[axis] + half;
        extent = extent.max(half);
    }
    (Point3::from(center), extent)
}

/// Build the octant covering the run of `size` points starting at `start`,
/// relinking the successor array so that every child's points form their
/// own contiguous run.
#[allow(clippy::too_many_arguments)]
fn create_octant<C: PointContainer>(
    params: &OctreeParams,
    points: &C,
    successors: &mut [u32],
    center: Point3<f32>,
    extent: f32,
    start: u32,
    end: u32,
    size: u32,
) -> Box<Octant> {
    let mut octant = Box::new(Octant::new(center, extent, start, end, size));

    // For a leaf nothing changes; the run is already correctly linked.
    if size <= params.bucket_size || extent <= 2.0 * params.min_extent {
        return octant;
    }
    octant.is_leaf = false;

    let mut child_starts = [0u32; 8];
    let mut child_ends = [0u32; 8];
    let mut child_sizes = [0u32; 8];

    // Walk the run once, splicing each point onto the tail of its Morton
    // bucket. Links inside a bucket stay intact; only bucket tails are
    // rewritten.
    let mut idx = start;
    for _ in 0..size {
        let code = morton_code(points.point(idx as usize), &center);

        if child_sizes[code] == 0 {
            child_starts[code] = idx;
        } else {
            successors[child_ends[code] as usize] = idx;
        }
        child_sizes[code] += 1;

        child_ends[code] = idx;
        idx = successors[idx as usize];
    }

    // Build the children in fixed slot order and concatenate their runs:
    // each child's end links to the next child's start.
    let child_extent = 0.5 * extent;
    let mut first_child = true;
    let mut last_child_end = 0u32;
    for code in 0..8 {
        if child_sizes[code] == 0 {
            continue;
        }

        let child = create_octant(
            params,
            points,
            successors,
            child_center(&center, extent, code),
            child_extent,
            child_starts[code],
            child_ends[code],
            child_sizes[code],
        );

        if first_child {
            octant.start = child.start;
        } else {
            successors[last_child_end as usize] = child.start;
        }
        last_child_end = child.end;
        octant.end = child.end;
        first_child = false;

        octant.children[code] = Some(child);
    }

    octant
}

fn collect_octant_paths(
    node: &Octant,
    depth: usize,
    target_depth: usize,
    path: &mut Vec<u8>,
    out: &mut Vec<Vec<u8>>,
) {
    for (slot, child) in node.children.iter().enumerate() {
        let Some(child) = child else {
            continue;
        };
        if depth == target_depth {
            if child.size > 0 {
                path.push(slot as u8);
                out.push(path.clone());
                path.pop();
            }
        } else {
            path.push(slot as u8);
            collect_octant_paths(child, depth + 1, target_depth, path, out);
            path.pop();
        }
    }
}

fn resolve_path<'t>(root: &'t Octant, path: &[u8]) -> Option<&'t Octant> {
    let mut node = root;
    for &slot in path {
        node = node.children[slot as usize].as_deref()?;
    }
    Some(node)
}

fn collect_run(successors: &[u32], octant: &Octant) -> Vec<u32> {
    let mut indices = Vec::with_capacity(octant.size as usize);
    let mut idx = octant.start;
    for _ in 0..octant.size {
        indices.push(idx);
        idx = successors[idx as usize];
    }
    indices
}
