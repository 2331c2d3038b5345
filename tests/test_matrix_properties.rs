use ndarray::Array2;
use sargeo::core::forward_matrix::{build_area_matrix, ForwardMatrixBuilder};
use sargeo::core::inverse_matrix::InverseMatrixBuilder;
use sargeo::core::parallel::WorkerPool;
use sargeo::io::{MatrixStore, TranslationTable};
use sargeo::types::{Coordinate, Grid, GridRegistration, IndexMatrix, MatrixKind, Subswath};

const RADAR_SHAPE: (usize, usize) = (12, 16);
const TABLE_SHAPE: (usize, usize) = (24, 32);

/// Table at half the radar spacing, lat running against azimuth, slightly skewed in range
fn scene_table(block_shape: (usize, usize)) -> TranslationTable {
    let (n_lat, n_lon) = TABLE_SHAPE;
    let azimuth = Array2::from_shape_fn(TABLE_SHAPE, |(i, j)| {
        (n_lat - 1 - i) as f64 * 0.5 + 0.02 * j as f64
    });
    let range = Array2::from_shape_fn(TABLE_SHAPE, |(_, j)| j as f64 * 0.5);
    let elevation = Array2::from_shape_fn(TABLE_SHAPE, |(i, j)| (i + j) as f64);
    TranslationTable::from_arrays(
        &azimuth,
        &range,
        &elevation,
        Coordinate::regular("lat", 45.0, 0.001, n_lat),
        Coordinate::regular("lon", 7.0, 0.001, n_lon),
        block_shape,
    )
    .expect("Failed to build translation table")
}

fn radar_reference() -> Grid {
    Grid::new(
        Array2::zeros(RADAR_SHAPE),
        Coordinate::regular("y", 0.0, 1.0, RADAR_SHAPE.0),
        Coordinate::regular("x", 0.0, 1.0, RADAR_SHAPE.1),
    )
    .expect("Failed to build radar grid")
}

fn build_both(pool: &WorkerPool) -> (IndexMatrix, IndexMatrix) {
    let table = scene_table((8, 8));
    let reference = radar_reference();
    let area = build_area_matrix(table.lat(), table.lon(), &table, 1e-6, pool)
        .expect("Failed to build area matrix");
    let forward = ForwardMatrixBuilder::default()
        .build(&reference, &table, &area, pool)
        .expect("Failed to build forward matrix");
    let inverse = InverseMatrixBuilder::new(5)
        .build(&reference, &table, &table.compute_block_extents(), pool, None)
        .expect("Failed to build inverse matrix");
    (forward, inverse)
}

#[test]
fn test_round_trip_returns_to_neighbouring_cell() {
    let _ = env_logger::builder().is_test(true).try_init();
    let pool = WorkerPool::new(Some(2)).expect("Failed to start pool");
    let (forward, inverse) = build_both(&pool);

    assert_eq!(forward.shape(), TABLE_SHAPE);
    assert_eq!(inverse.shape(), RADAR_SHAPE);

    let mut exact = 0;
    for y in 0..RADAR_SHAPE.0 {
        for x in 0..RADAR_SHAPE.1 {
            let label = inverse.get(y, x).expect("Radar cell without table record");
            let (i, j) = (label / TABLE_SHAPE.1, label % TABLE_SHAPE.1);
            let radar = forward.get(i, j).expect("Table record without radar cell");
            let (ry, rx) = (radar / RADAR_SHAPE.1, radar % RADAR_SHAPE.1);
            assert!(
                ry.abs_diff(y) <= 1 && rx.abs_diff(x) <= 1,
                "({}, {}) returned to ({}, {})",
                y,
                x,
                ry,
                rx
            );
            if (ry, rx) == (y, x) {
                exact += 1;
            }
        }
    }
    println!("Exact round trips: {} of {}", exact, RADAR_SHAPE.0 * RADAR_SHAPE.1);
    assert!(exact * 10 >= RADAR_SHAPE.0 * RADAR_SHAPE.1 * 9);
}

/// Table on whole range columns, two azimuth samples per radar line
fn column_table() -> TranslationTable {
    let shape = (24, 16);
    let azimuth = Array2::from_shape_fn(shape, |(i, j)| (23 - i) as f64 * 0.5 + 0.02 * j as f64);
    let range = Array2::from_shape_fn(shape, |(_, j)| j as f64);
    TranslationTable::from_arrays(
        &azimuth,
        &range,
        &Array2::zeros(shape),
        Coordinate::regular("lat", 45.0, 0.001, shape.0),
        Coordinate::regular("lon", 7.0, 0.002, shape.1),
        (6, 6),
    )
    .expect("Failed to build translation table")
}

#[test]
fn test_geographic_round_trip_within_tolerance() {
    let _ = env_logger::builder().is_test(true).try_init();
    let pool = WorkerPool::new(Some(2)).expect("Failed to start pool");
    let table = column_table();
    let reference = radar_reference();
    let builder = ForwardMatrixBuilder::default();
    let tolerance = builder.tolerance(&reference).expect("Failed to compute tolerance");

    let area = build_area_matrix(table.lat(), table.lon(), &table, 1e-6, &pool)
        .expect("Failed to build area matrix");
    let forward = builder
        .build(&reference, &table, &area, &pool)
        .expect("Failed to build forward matrix");
    let inverse = InverseMatrixBuilder::new(5)
        .build(&reference, &table, &table.compute_block_extents(), &pool, None)
        .expect("Failed to build inverse matrix");

    let records = table.records();
    let cols = table.lon().len();
    let mut checked = 0;
    for ((i, j), cell) in forward.indices.indexed_iter() {
        let Some(radar) = cell.get() else {
            continue;
        };
        let label = inverse
            .get(radar / RADAR_SHAPE.1, radar % RADAR_SHAPE.1)
            .expect("Matched radar cell without table record");
        let start = &records[i * cols + j];
        let back = &records[label];
        let distance = ((start.azimuth - back.azimuth).powi(2) + (start.range - back.range).powi(2)).sqrt();
        assert!(
            distance <= tolerance,
            "cell ({}, {}) came back {:.3} away, tolerance {:.3}",
            i,
            j,
            distance,
            tolerance
        );
        checked += 1;
    }
    println!("Checked {} geographic cells against tolerance {:.3}", checked, tolerance);
    assert!(checked > forward.indices.len() / 2);
}

#[test]
fn test_matrices_are_sentinel_consistent() {
    let pool = WorkerPool::sequential().expect("Failed to start pool");
    let (forward, inverse) = build_both(&pool);

    forward.validate().expect("Forward matrix has dangling indices");
    inverse.validate().expect("Inverse matrix has dangling indices");
    assert!(forward.max_index().unwrap() < RADAR_SHAPE.0 * RADAR_SHAPE.1);
    assert!(inverse.max_index().unwrap() < TABLE_SHAPE.0 * TABLE_SHAPE.1);
    // Records skewed past the last azimuth line stay unmatched
    assert!(forward.matched_count() < TABLE_SHAPE.0 * TABLE_SHAPE.1);
    assert_eq!(forward.registration, GridRegistration::CellCentered);
    assert_eq!(inverse.registration, GridRegistration::Gridline);
}

#[test]
fn test_thread_count_does_not_change_matrices() {
    let sequential = build_both(&WorkerPool::sequential().expect("Failed to start pool"));
    let parallel = build_both(&WorkerPool::new(Some(4)).expect("Failed to start pool"));
    assert_eq!(sequential.0, parallel.0);
    assert_eq!(sequential.1, parallel.1);
}

#[test]
fn test_persisted_matrices_reload_unchanged() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let store = MatrixStore::new(dir.path(), 6);
    let subswath = Subswath::new("2").expect("Invalid subswath");
    let (forward, inverse) = build_both(&WorkerPool::sequential().expect("Failed to start pool"));

    let forward_path = store.save(&subswath, &forward).expect("Failed to save forward matrix");
    store.save(&subswath, &inverse).expect("Failed to save inverse matrix");
    assert!(forward_path.ends_with("F2_intf_ra2ll.grd"));

    let loaded = store.load(&subswath, MatrixKind::Forward).expect("Failed to load forward matrix");
    assert_eq!(loaded, forward);
    let loaded = store.load(&subswath, MatrixKind::Inverse).expect("Failed to load inverse matrix");
    assert_eq!(loaded, inverse);

    // Saving again replaces the file in place
    store.save(&subswath, &forward).expect("Failed to overwrite forward matrix");
    let entries = std::fs::read_dir(dir.path()).expect("Failed to list dir").count();
    assert_eq!(entries, 2);
}
