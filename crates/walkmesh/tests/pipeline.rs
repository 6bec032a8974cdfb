//! Runs the whole pipeline on small hand-made scenes.

use std::collections::HashSet;

use glam::{U16Vec3, UVec3, Vec3A};
use walkmesh::{
    Aabb3d, AreaType, BuildContoursFlags, CompactHeightfield, HeightfieldBuilder, NavmeshConfig,
    NavmeshConfigBuilder, PolygonMesh, RC_MESH_NULL_IDX, RegionId, TriMesh,
};

fn quad(min: [f32; 2], max: [f32; 2], y: f32) -> TriMesh {
    TriMesh::new(
        vec![
            Vec3A::new(min[0], y, min[1]),
            Vec3A::new(min[0], y, max[1]),
            Vec3A::new(max[0], y, max[1]),
            Vec3A::new(max[0], y, min[1]),
        ],
        vec![UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)],
    )
}

/// A floor with a raised platform hovering over it and a pillar top smaller than one cell.
fn layered_scene() -> TriMesh {
    let mut trimesh = quad([0.0, 0.0], [20.0, 20.0], 0.0);
    trimesh.extend(quad([6.0, 6.0], [12.0, 12.0], 3.0));
    trimesh.extend(quad([15.1, 15.1], [15.4, 15.4], 2.0));
    trimesh
}

fn layered_config() -> NavmeshConfig {
    NavmeshConfigBuilder {
        cell_size: 0.5,
        cell_height: 0.25,
        agent_height: 1.0,
        agent_radius: 0.5,
        agent_max_climb: 0.5,
        region_min_size: 2.0,
        region_merge_size: 4.0,
        edge_max_len: 6.0,
        aabb: Aabb3d::from_min_max([0.0, -1.0, 0.0], [20.0, 5.0, 20.0]),
        ..Default::default()
    }
    .build()
}

/// Rasterizes the scene and runs the filters that keep the outer ring of the field intact.
fn compact_layered_scene(config: &NavmeshConfig) -> (CompactHeightfield, usize) {
    let mut trimesh = layered_scene();
    trimesh.mark_walkable_triangles(config.walkable_slope_angle);
    let mut heightfield = HeightfieldBuilder {
        aabb: config.aabb,
        cell_size: config.cell_size,
        cell_height: config.cell_height,
    }
    .build()
    .unwrap();
    heightfield
        .rasterize_triangles(&trimesh, config.walkable_climb)
        .unwrap();
    heightfield.filter_low_hanging_walkable_obstacles(config.walkable_climb);
    heightfield.filter_walkable_low_height_spans(config.walkable_height);
    let walkable_spans = heightfield.walkable_span_count();
    let compact = heightfield
        .into_compact(config.walkable_height, config.walkable_climb)
        .unwrap();
    (compact, walkable_spans)
}

#[test]
fn four_by_four_platform_yields_one_rectangle() {
    let mut trimesh = quad([0.0, 0.0], [4.0, 4.0], 0.5);
    trimesh.mark_walkable_triangles(45.0_f32.to_radians());
    let mut heightfield = HeightfieldBuilder {
        aabb: Aabb3d::from_min_max(Vec3A::ZERO, [4.0, 4.0, 4.0]),
        cell_size: 1.0,
        cell_height: 1.0,
    }
    .build()
    .unwrap();
    heightfield.rasterize_triangles(&trimesh, 1).unwrap();
    heightfield.filter_low_hanging_walkable_obstacles(1);
    heightfield.filter_walkable_low_height_spans(2);
    assert_eq!(heightfield.span_count(), 16);

    let mut compact = heightfield.into_compact(2, 1).unwrap();
    assert_eq!(compact.spans.len(), 16);

    compact.build_distance_field();
    compact.build_regions(0, 1, 0).unwrap();
    assert_eq!(compact.max_region, RegionId(1));
    assert!(compact.spans.iter().all(|span| span.region == RegionId(1)));

    let contours = compact.build_contours(1.3, 12, BuildContoursFlags::DEFAULT);
    assert_eq!(contours.contours.len(), 1);
    let contour = &contours.contours[0];
    assert_eq!(contour.region, RegionId(1));
    assert_eq!(contour.area, AreaType::DEFAULT_WALKABLE);
    let corners: Vec<_> = contour.vertices.iter().map(|v| v.position).collect();
    assert_eq!(
        corners,
        vec![
            U16Vec3::new(0, 1, 0),
            U16Vec3::new(0, 1, 4),
            U16Vec3::new(4, 1, 4),
            U16Vec3::new(4, 1, 0),
        ]
    );

    let mesh = contours.into_polygon_mesh(6).unwrap();
    assert_eq!(mesh.vertices.len(), 4);
    assert_eq!(mesh.polygon_count(), 2);
    assert_eq!(covered_area_times_two(&mesh), 32);
    assert_eq!(mesh.bounding_box.min, Vec3A::new(0.0, 1.0, 0.0));
    assert_eq!(mesh.bounding_box.max, Vec3A::new(4.0, 1.0, 4.0));
}

#[test]
fn building_twice_gives_identical_meshes() {
    let config = layered_config();
    let first = config.build_polygon_mesh(&layered_scene()).unwrap();
    let second = config.build_polygon_mesh(&layered_scene()).unwrap();
    assert!(first.polygon_count() > 0);
    assert_eq!(first, second);
}

#[test]
fn polygon_adjacency_is_symmetric() {
    let mesh = layered_config()
        .build_polygon_mesh(&layered_scene())
        .unwrap();

    let mut links = 0;
    for polygon in 0..mesh.polygon_count() {
        for &neighbor in mesh.polygon_neighbors(polygon) {
            if neighbor == RC_MESH_NULL_IDX {
                continue;
            }
            links += 1;
            assert!(
                mesh.polygon_neighbors(neighbor as usize)
                    .contains(&(polygon as u16)),
                "polygon {polygon} links to {neighbor}, but not the other way around"
            );
        }
    }
    assert!(links > 0);
}

#[test]
fn layers_become_separate_regions() {
    let mesh = layered_config()
        .build_polygon_mesh(&layered_scene())
        .unwrap();
    let regions: HashSet<_> = mesh.regions.iter().copied().collect();
    // At least the floor and the platform above it.
    assert!(regions.len() >= 2);
    assert!(!regions.contains(&RegionId::NONE));

    let heights: HashSet<_> = mesh.vertices.iter().map(|v| v.y).collect();
    assert!(heights.len() >= 2);
}

#[test]
fn compact_span_count_matches_walkable_spans() {
    let config = layered_config();
    let (compact, walkable_spans) = compact_layered_scene(&config);
    // Cells are 0.5 wide and the rasterizer is conservative: a quad spanning [a, b] touches
    // the cells floor(2a)..=floor(2b), clamped to the field.
    // Floor [0, 20]: 0..=39, 40x40 cells.
    // Platform [6, 12]: 12..=24, 13x13 cells, since its far edges lie on cell boundaries.
    // Pillar [15.1, 15.4]: 30..=30, a single cell.
    assert_eq!(walkable_spans, 40 * 40 + 13 * 13 + 1);
    assert_eq!(compact.spans.len(), walkable_spans);
    assert_eq!(compact.areas.len(), walkable_spans);
    let counted: usize = compact.cells.iter().map(|cell| cell.count() as usize).sum();
    assert_eq!(counted, walkable_spans);
}

#[test]
fn every_region_is_large_enough() {
    let config = layered_config();
    let (mut compact, _) = compact_layered_scene(&config);
    compact.build_distance_field();
    compact
        .build_regions(0, config.min_region_area, config.merge_region_area)
        .unwrap();

    let mut span_counts = vec![0_usize; compact.max_region.0 as usize + 1];
    for span in &compact.spans {
        assert!(!span.region.is_border());
        span_counts[span.region.0 as usize] += 1;
    }
    for (region, count) in span_counts.iter().enumerate().skip(1) {
        assert!(
            *count >= config.min_region_area as usize,
            "region {region} has only {count} spans"
        );
    }

    // The isolated pillar top is a single span, below the minimum region area of 4.
    assert_eq!(config.min_region_area, 4);
    let pillar = compact.cell_at(30, 30);
    let pillar_span = &compact.spans[pillar.span_range().last().unwrap()];
    assert_eq!(pillar_span.region, RegionId::NONE);
}

#[test]
fn unblurred_distance_grows_by_two_per_hop() {
    let config = layered_config();
    let (mut compact, _) = compact_layered_scene(&config);
    compact.calculate_distance_field();

    for z in 0..compact.height {
        for x in 0..compact.width {
            for i in compact.cell_at(x, z).span_range() {
                let neighbors: Vec<_> = (0..4)
                    .filter_map(|dir| compact.neighbor_index(x, z, i, dir))
                    .filter(|&n| compact.areas[n] == compact.areas[i])
                    .collect();
                let distance = compact.dist[i];
                if neighbors.len() < 4 {
                    assert_eq!(distance, 0, "boundary span at ({x}, {z})");
                    continue;
                }
                assert!(distance > 0);
                assert!(
                    neighbors
                        .iter()
                        .any(|&n| compact.dist[n] + 2 == distance),
                    "span at ({x}, {z}) has no neighbor one hop closer to the boundary"
                );
                for &n in &neighbors {
                    assert!(compact.dist[n].abs_diff(distance) <= 2);
                }
            }
        }
    }
    assert_eq!(compact.max_distance, compact.dist.iter().copied().max().unwrap());
}

fn covered_area_times_two(mesh: &PolygonMesh) -> i32 {
    (0..mesh.polygon_count())
        .map(|polygon| {
            let [a, b, c] = [0, 1, 2].map(|i| {
                let v = mesh.vertices[mesh.polygon_vertices(polygon)[i] as usize];
                (v.x as i32, v.z as i32)
            });
            ((b.0 - a.0) * (c.1 - a.1) - (c.0 - a.0) * (b.1 - a.1)).abs()
        })
        .sum()
}
