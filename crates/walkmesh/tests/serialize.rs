#![cfg(feature = "serialize")]
//! The build artifacts survive a trip through JSON.

use glam::{UVec3, Vec3A};
use serde::{Serialize, de::DeserializeOwned};
use walkmesh::{Aabb3d, NavmeshConfig, NavmeshConfigBuilder, PolygonMesh, TriMesh};

#[track_caller]
fn assert_json_round_trip<T>(value: &T)
where
    T: Serialize + DeserializeOwned + PartialEq + std::fmt::Debug,
{
    let json = serde_json::to_string(value).unwrap();
    let restored: T = serde_json::from_str(&json).unwrap();
    assert_eq!(&restored, value);
}

fn config() -> NavmeshConfig {
    NavmeshConfigBuilder {
        cell_size: 0.5,
        cell_height: 0.25,
        edge_max_error: 1.25,
        region_min_size: 2.0,
        aabb: Aabb3d::from_min_max([0.0, -1.0, 0.0], [8.0, 3.0, 8.0]),
        ..Default::default()
    }
    .build()
}

fn floor() -> TriMesh {
    TriMesh::new(
        vec![
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(0.0, 0.0, 8.0),
            Vec3A::new(8.0, 0.0, 8.0),
            Vec3A::new(8.0, 0.0, 0.0),
        ],
        vec![UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)],
    )
}

#[test]
fn config_and_input_round_trip() {
    assert_json_round_trip(&config());
    assert_json_round_trip(&floor());
}

#[test]
fn polygon_mesh_round_trips() {
    let mesh: PolygonMesh = config().build_polygon_mesh(&floor()).unwrap();
    assert!(mesh.polygon_count() > 0);
    assert_json_round_trip(&mesh);
}
