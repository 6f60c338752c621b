//! Public API integration tests for cloud_octree, checked against
//! brute-force oracles on a dense integer grid.

use ahash::HashSet;
use all_asserts::assert_lt;
use cloud_octree::prelude::*;
use nalgebra::Point3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// 1000 points on the integer grid [0, 10)^3.
fn grid_cloud() -> PointCloud {
    let mut points = Vec::with_capacity(1000);
    for x in 0..10 {
        for y in 0..10 {
            for z in 0..10 {
                points.push(Point3::new(x as f32, y as f32, z as f32));
            }
        }
    }
    PointCloud::from_points(points)
}

fn random_queries(n: usize, seed: u64) -> Vec<Point3<f32>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            Point3::new(
                rng.random_range(-1.0..11.0),
                rng.random_range(-1.0..11.0),
                rng.random_range(-1.0..11.0),
            )
        })
        .collect()
}

// Same expression as the library's distance loop, so oracle comparisons
// are exact.
fn sqr_dist(a: &Point3<f32>, b: &Point3<f32>) -> f32 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    let dz = a.z - b.z;
    dx * dx + dy * dy + dz * dz
}

fn brute_force_radius(cloud: &PointCloud, query: &Point3<f32>, radius: f32) -> Vec<u32> {
    let sqr_radius = radius * radius;
    cloud
        .points
        .iter()
        .enumerate()
        .filter(|(_, p)| sqr_dist(query, p) < sqr_radius)
        .map(|(i, _)| i as u32)
        .collect()
}

fn brute_force_nearest_sqr(cloud: &PointCloud, query: &Point3<f32>) -> f32 {
    cloud
        .points
        .iter()
        .map(|p| sqr_dist(query, p))
        .fold(f32::INFINITY, f32::min)
}

#[test]
fn test_radius_neighbors_matches_brute_force() {
    let cloud = grid_cloud();
    let params = OctreeParams {
        bucket_size: 8,
        ..Default::default()
    };
    let tree = Octree::new(&cloud, params);

    let mut rng = ChaCha8Rng::seed_from_u64(7);
    for query in random_queries(100, 42) {
        let radius = rng.random_range(0.5..3.5);

        let mut found = tree.radius_neighbors(&query, radius);
        found.sort_unstable();
        assert_eq!(found, brute_force_radius(&cloud, &query, radius));
    }
}

#[test]
fn test_radius_neighbors_distances_are_consistent() {
    let cloud = grid_cloud();
    let params = OctreeParams {
        bucket_size: 8,
        ..Default::default()
    };
    let tree = Octree::new(&cloud, params);

    for query in random_queries(20, 99) {
        let radius = 2.0;
        let (indices, distances) = tree.radius_neighbors_with_distances(&query, radius);
        assert_eq!(indices.len(), distances.len());
        for (&idx, &dist) in indices.iter().zip(&distances) {
            assert_eq!(dist, sqr_dist(&query, &cloud.points[idx as usize]));
            assert_lt!(dist, radius * radius);
        }

        let mut found = indices;
        found.sort_unstable();
        assert_eq!(found, brute_force_radius(&cloud, &query, radius));
    }
}

#[test]
fn test_find_neighbor_matches_brute_force() {
    let cloud = grid_cloud();
    let params = OctreeParams {
        bucket_size: 8,
        ..Default::default()
    };
    let tree = Octree::new(&cloud, params);

    for query in random_queries(100, 1234) {
        let found = tree.find_neighbor(&query, None).unwrap();
        let found_sqr = sqr_dist(&query, &cloud.points[found as usize]);
        assert_eq!(found_sqr, brute_force_nearest_sqr(&cloud, &query));
    }
}

#[test]
fn test_find_neighbor_suppresses_self_matches() {
    let cloud = grid_cloud();
    let params = OctreeParams {
        bucket_size: 8,
        ..Default::default()
    };
    let tree = Octree::new(&cloud, params);

    let mut rng = ChaCha8Rng::seed_from_u64(5);
    for _ in 0..50 {
        let i = rng.random_range(0..cloud.len());
        let query = cloud.points[i];
        let found = tree.find_neighbor(&query, Some(0.0)).unwrap();

        assert_ne!(found as usize, i);
        // on the unit grid the nearest other point is at distance 1
        assert_eq!(sqr_dist(&query, &cloud.points[found as usize]), 1.0);
    }
}

#[test]
fn test_parameter_equivalence() {
    let cloud = grid_cloud();
    let queries = random_queries(20, 77);

    for bucket_size in [1, 4, 32] {
        for min_extent in [0.0, 0.5] {
            let params = OctreeParams {
                bucket_size,
                min_extent,
                ..Default::default()
            };
            let tree = Octree::new(&cloud, params);

            for query in &queries {
                let mut found = tree.radius_neighbors(query, 2.0);
                found.sort_unstable();
                assert_eq!(
                    found,
                    brute_force_radius(&cloud, query, 2.0),
                    "radius mismatch with bucket_size {bucket_size}, min_extent {min_extent}"
                );

                let found = tree.find_neighbor(query, None).unwrap();
                assert_eq!(
                    sqr_dist(query, &cloud.points[found as usize]),
                    brute_force_nearest_sqr(&cloud, query),
                    "nearest mismatch with bucket_size {bucket_size}, min_extent {min_extent}"
                );
            }
        }
    }
}

#[test]
fn test_octant_enumeration_partitions_points() {
    let cloud = grid_cloud();
    let params = OctreeParams {
        bucket_size: 8,
        ..Default::default()
    };
    let mut tree = Octree::new(&cloud, params);

    // with bucket_size 8 every node above depth 2 is split, so both depths
    // partition the full point set
    for depth in [1, 2] {
        let lists = tree.octants_at_depth(depth).unwrap();
        let total: usize = lists.iter().map(Vec::len).sum();
        assert_eq!(total, cloud.len(), "depth {depth}");

        let seen: HashSet<u32> = lists.iter().flatten().copied().collect();
        assert_eq!(seen.len(), cloud.len(), "duplicate indices at depth {depth}");
        assert!(seen.iter().all(|&i| (i as usize) < cloud.len()));
    }
}

/// Octant cube of the grid cloud holding `p` at the given depth, derived
/// from the known bounding cube (center 4.5 per axis, extent 4.5).
fn grid_octant_cube(p: &Point3<f32>, depth: usize) -> (Point3<f32>, f32) {
    let mut center = Point3::new(4.5_f32, 4.5, 4.5);
    let mut extent = 4.5_f32;
    for _ in 0..depth {
        for axis in 0..3 {
            if p[axis] > center[axis] {
                center[axis] += 0.5 * extent;
            } else {
                center[axis] -= 0.5 * extent;
            }
        }
        extent *= 0.5;
    }
    (center, extent)
}

#[test]
fn test_radius_search_limited_in_enumerated_octants() {
    let cloud = grid_cloud();
    let params = OctreeParams {
        bucket_size: 8,
        ..Default::default()
    };
    let mut tree = Octree::new(&cloud, params);

    let lists = tree.octants_at_depth(2).unwrap();
    assert!(!lists.is_empty());

    for (octant_index, list) in lists.iter().enumerate() {
        let sample = &cloud.points[list[0] as usize];
        let (center, extent) = grid_octant_cube(sample, 2);

        // a tiny ball at the octant's center cannot escape it
        let found = tree
            .radius_search_limited(octant_index, &center, 0.01)
            .unwrap();

        let members: HashSet<u32> = list.iter().copied().collect();
        for &idx in &found {
            assert!(members.contains(&idx));
            let p = &cloud.points[idx as usize];
            for axis in 0..3 {
                assert!((p[axis] - center[axis]).abs() <= extent);
            }
        }
    }

    // a ball spilling into sibling octants must force a full query
    let (center, _) = grid_octant_cube(&cloud.points[0], 2);
    assert_eq!(tree.radius_search_limited(0, &center, 10.0), None);

    // out-of-range octant index
    assert_eq!(tree.radius_search_limited(lists.len(), &center, 0.01), None);
}

#[test]
fn test_subset_build_matches_brute_force() {
    let cloud = grid_cloud();
    let subset: Vec<u32> = (0..cloud.len() as u32).step_by(3).collect();
    let params = OctreeParams {
        bucket_size: 8,
        ..Default::default()
    };
    let tree = Octree::with_indices(&cloud, &subset, params);
    assert_eq!(tree.num_points(), subset.len());

    let active: HashSet<u32> = subset.iter().copied().collect();
    for query in random_queries(20, 2024) {
        let mut found = tree.radius_neighbors(&query, 2.0);
        found.sort_unstable();

        let expected: Vec<u32> = brute_force_radius(&cloud, &query, 2.0)
            .into_iter()
            .filter(|i| active.contains(i))
            .collect();
        assert_eq!(found, expected);
    }
}

#[test]
fn test_copy_points_matches_borrowed() {
    let cloud = grid_cloud();
    let borrowed = Octree::new(
        &cloud,
        OctreeParams {
            bucket_size: 8,
            ..Default::default()
        },
    );
    let copied = Octree::new(
        &cloud,
        OctreeParams {
            bucket_size: 8,
            copy_points: true,
            ..Default::default()
        },
    );

    for query in random_queries(10, 31) {
        let mut a = borrowed.radius_neighbors(&query, 2.5);
        let mut b = copied.radius_neighbors(&query, 2.5);
        a.sort_unstable();
        b.sort_unstable();
        assert_eq!(a, b);
        assert_eq!(
            borrowed.find_neighbor(&query, None),
            copied.find_neighbor(&query, None)
        );
    }
}
