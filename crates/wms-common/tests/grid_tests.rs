//! Integration tests for target grid sampling.

use wms_common::{BoundingBox, CrsCode, TargetGrid};

#[test]
fn sample_points_cover_the_bbox_symmetrically() {
    let grid = TargetGrid::new(
        CrsCode::Epsg4326,
        BoundingBox::new(-180.0, -90.0, 180.0, 90.0),
        360,
        180,
    )
    .unwrap();

    let xs = grid.x_values();
    let ys = grid.y_values();
    assert_eq!(xs.len(), 360);
    assert_eq!(ys.len(), 180);

    // Centres sit half a pixel in from each edge.
    assert!((xs[0] - (-179.5)).abs() < 1e-12);
    assert!((xs[359] - 179.5).abs() < 1e-12);
    assert!((ys[0] - 89.5).abs() < 1e-12);
    assert!((ys[179] - (-89.5)).abs() < 1e-12);
}

#[test]
fn projected_grid_uses_metres_unchanged() {
    let max_extent = 20037508.342789244;
    let grid = TargetGrid::new(
        CrsCode::Epsg3857,
        BoundingBox::new(-max_extent, -max_extent, max_extent, max_extent),
        2,
        2,
    )
    .unwrap();

    assert!(!grid.is_geographic());
    let xs = grid.x_values();
    assert!((xs[0] + max_extent / 2.0).abs() < 1e-6);
    assert!((xs[1] - max_extent / 2.0).abs() < 1e-6);
}
