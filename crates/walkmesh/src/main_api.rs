use anyhow::Context as _;
use tracing::{error, info};

use crate::{
    NavmeshConfig, PolygonMesh,
    context::{TimerLabel, timer},
    heightfield::{Heightfield, HeightfieldBuilder},
    rasterize::RasterizationError,
    trimesh::TriMesh,
};

impl Heightfield {
    /// Rasterizes the walkable triangles of a [`TriMesh`] into a [`Heightfield`] and
    /// filters out the spans an agent described by `config` cannot stand on.
    ///
    /// The trimesh is expected to already carry its area types, e.g. from [`TriMesh::mark_walkable_triangles`].
    ///
    /// # Arguments
    ///
    /// - `trimesh` - The [`TriMesh`] to rasterize.
    /// - `config` - Provides `walkable_height`, `walkable_climb` and the ledge filter settings.
    pub fn populate_from_trimesh(
        &mut self,
        trimesh: &TriMesh,
        config: &NavmeshConfig,
    ) -> Result<(), RasterizationError> {
        // The flag merge threshold and the walkable climb are the same thing in practice.
        self.rasterize_triangles(trimesh, config.walkable_climb)?;

        // Remove overhangs caused by the conservative rasterization
        // and spans where the character cannot possibly stand.
        self.filter_low_hanging_walkable_obstacles(config.walkable_climb);
        self.filter_ledge_spans_with_slope(
            config.walkable_height,
            config.walkable_climb,
            config.ledge_slope_filter_mode,
            config.max_step_from_walkable_slope,
        );
        self.filter_walkable_low_height_spans(config.walkable_height);
        Ok(())
    }
}

impl NavmeshConfig {
    /// Runs the whole pipeline on `trimesh`: rasterization, filtering, compaction,
    /// region partitioning, contour tracing and polygon mesh generation.
    ///
    /// Triangles are classified by [`NavmeshConfig::walkable_slope_angle`] before rasterization.
    /// Triangles already tagged with a walkable area keep it.
    ///
    /// # Errors
    ///
    /// Fails if any stage fails. The error carries the name of the failing stage.
    pub fn build_polygon_mesh(&self, trimesh: &TriMesh) -> anyhow::Result<PolygonMesh> {
        let _timer = timer(TimerLabel::Total);

        trimesh
            .validate()
            .inspect_err(|e| error!("Could not use input trimesh: {e}"))
            .context("Invalid input trimesh")?;
        let mut trimesh = trimesh.clone();
        trimesh.mark_walkable_triangles(self.walkable_slope_angle);

        let mut heightfield = HeightfieldBuilder {
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
        }
        .build()
        .inspect_err(|e| error!("Could not create heightfield: {e}"))
        .context("Failed to create heightfield")?;
        info!(
            "Building navmesh on a {}x{} grid from {} triangles",
            heightfield.width,
            heightfield.height,
            trimesh.indices.len()
        );

        heightfield
            .populate_from_trimesh(&trimesh, self)
            .inspect_err(|e| error!("Could not rasterize triangles: {e}"))
            .context("Failed to rasterize triangles")?;
        info!(
            "Rasterized {} spans, {} walkable",
            heightfield.span_count(),
            heightfield.walkable_span_count()
        );

        let mut compact_heightfield = heightfield
            .into_compact(self.walkable_height, self.walkable_climb)
            .inspect_err(|e| error!("Could not build compact heightfield: {e}"))
            .context("Failed to build compact heightfield")?;
        info!(
            "Compacted heightfield to {} spans",
            compact_heightfield.spans.len()
        );

        compact_heightfield.build_distance_field();
        compact_heightfield
            .build_regions(
                self.border_size,
                self.min_region_area,
                self.merge_region_area,
            )
            .inspect_err(|e| error!("Could not build regions: {e}"))
            .context("Failed to build regions")?;
        info!("Partitioned into {} regions", compact_heightfield.max_region.0);

        let contours = compact_heightfield.build_contours(
            self.max_simplification_error,
            self.max_edge_len,
            self.contour_flags,
        );
        info!("Traced {} contours", contours.contours.len());

        let poly_mesh = contours
            .into_polygon_mesh(self.max_vertices_per_polygon as usize)
            .inspect_err(|e| error!("Could not build polygon mesh: {e}"))
            .context("Failed to build polygon mesh")?;
        info!(
            "Built polygon mesh with {} vertices and {} polygons",
            poly_mesh.vertices.len(),
            poly_mesh.polygon_count()
        );
        Ok(poly_mesh)
    }
}
