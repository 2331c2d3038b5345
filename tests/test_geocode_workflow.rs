use ndarray::Array2;
use sargeo::core::forward_matrix::ForwardMatrixBuilder;
use sargeo::core::parallel::ProgressReporter;
use sargeo::io::{InMemoryRasterStore, InMemoryTranslationTables, TranslationTable, TranslationTableAccessor};
use sargeo::types::{Coordinate, Grid, MatrixKind, Raster, Subswath};
use sargeo::{GeocodeConfig, GeocodeMode, Geocoder};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const TABLE_SHAPE: (usize, usize) = (24, 32);

fn scene_table() -> TranslationTable {
    let (n_lat, n_lon) = TABLE_SHAPE;
    let azimuth = Array2::from_shape_fn(TABLE_SHAPE, |(i, j)| {
        (n_lat - 1 - i) as f64 * 0.5 + 0.02 * j as f64
    });
    let range = Array2::from_shape_fn(TABLE_SHAPE, |(_, j)| j as f64 * 0.5);
    TranslationTable::from_arrays(
        &azimuth,
        &range,
        &Array2::zeros(TABLE_SHAPE),
        Coordinate::regular("lat", 45.0, 0.001, n_lat),
        Coordinate::regular("lon", 7.0, 0.001, n_lon),
        (8, 8),
    )
    .expect("Failed to build translation table")
}

fn tables(subswath: &str) -> Arc<InMemoryTranslationTables> {
    let mut tables = InMemoryTranslationTables::new();
    tables.insert(Subswath::new(subswath).expect("Invalid subswath"), scene_table());
    Arc::new(tables)
}

/// Radar product whose value encodes its own cell: offset + y * 100 + x
fn radar_product(rows: usize, cols: usize, offset: f32) -> Grid {
    Grid::new(
        Array2::from_shape_fn((rows, cols), |(y, x)| offset + (y * 100 + x) as f32),
        Coordinate::regular("y", 0.0, 1.0, rows),
        Coordinate::regular("x", 0.0, 1.0, cols),
    )
    .expect("Failed to build radar product")
}

fn checkerboard_mask() -> Grid {
    let table = scene_table();
    Grid::new(
        Array2::from_shape_fn(TABLE_SHAPE, |(i, j)| ((i / 4 + j / 4) % 2) as f32),
        table.lat().clone(),
        table.lon().clone(),
    )
    .expect("Failed to build mask")
}

fn pairs() -> Vec<String> {
    vec!["20200101_20200113".to_string(), "20200113_20200125".to_string()]
}

fn rasters(cols: usize) -> Arc<InMemoryRasterStore> {
    let mut store = InMemoryRasterStore::new();
    let pairs = pairs();
    store.insert(&pairs[0], "phasefilt", radar_product(12, cols, 0.0));
    // Second interferogram is one azimuth line short
    store.insert(&pairs[1], "phasefilt", radar_product(11, cols, 1000.0));
    for pair in &pairs {
        store.insert(pair, "mask", checkerboard_mask());
    }
    Arc::new(store)
}

fn geocoder(basedir: &Path, tables: Arc<InMemoryTranslationTables>, cols: usize) -> Geocoder {
    let config = GeocodeConfig::new(basedir).with_chunk_size(5);
    let accessor: Arc<dyn TranslationTableAccessor> = tables;
    Geocoder::new(config, accessor, rasters(cols)).expect("Failed to create geocoder")
}

struct CountingProgress {
    units: AtomicUsize,
}

impl ProgressReporter for CountingProgress {
    fn advance(&self, units: usize) {
        self.units.fetch_add(units, Ordering::SeqCst);
    }
}

#[test]
fn test_forward_geocoding_of_interferogram_stack() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let geocoder = geocoder(dir.path(), tables("1"), 16);

    let subswath = geocoder
        .geocode_parallel(None, &pairs())
        .expect("Failed to build matrices");
    assert_eq!(subswath.as_str(), "1");
    assert!(geocoder.store().path_for(&subswath, MatrixKind::Forward).exists());
    assert!(geocoder.store().path_for(&subswath, MatrixKind::Inverse).exists());

    let forward = geocoder
        .store()
        .load(&subswath, MatrixKind::Forward)
        .expect("Failed to load forward matrix");

    let Raster::Stack(stack) = geocoder
        .open_grids(None, &pairs(), "phasefilt", GeocodeMode::Forward)
        .expect("Failed to geocode stack")
    else {
        panic!("expected a stack");
    };
    assert_eq!(stack.data.dim(), (2, TABLE_SHAPE.0, TABLE_SHAPE.1));
    assert_eq!(stack.rows.name, "lat");
    assert_eq!(stack.cols.name, "lon");
    assert_eq!(stack.layer.labels, pairs());

    for i in 0..TABLE_SHAPE.0 {
        for j in 0..TABLE_SHAPE.1 {
            match forward.get(i, j) {
                Some(radar) => {
                    let (y, x) = (radar / 16, radar % 16);
                    assert_eq!(stack.data[[0, i, j]], (y * 100 + x) as f32);
                    if y < 11 {
                        assert_eq!(stack.data[[1, i, j]], 1000.0 + (y * 100 + x) as f32);
                    } else {
                        assert!(stack.data[[1, i, j]].is_nan());
                    }
                }
                None => {
                    assert!(stack.data[[0, i, j]].is_nan());
                    assert!(stack.data[[1, i, j]].is_nan());
                }
            }
        }
    }
}

#[test]
fn test_inverse_geocoding_preserves_mask() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let geocoder = geocoder(dir.path(), tables("1"), 16);
    geocoder.geocode_parallel(None, &pairs()).expect("Failed to build matrices");

    let Raster::Stack(stack) = geocoder
        .open_grids(None, &pairs(), "mask", GeocodeMode::Inverse)
        .expect("Failed to inverse geocode mask")
    else {
        panic!("expected a stack");
    };
    assert_eq!(stack.data.dim(), (2, 12, 16));
    assert_eq!(stack.rows.name, "y");
    assert!(stack.data.iter().all(|&v| v.is_nan() || v == 0.0 || v == 1.0));
    assert!(stack.data.iter().any(|&v| v == 0.0));
    assert!(stack.data.iter().any(|&v| v == 1.0));

    // Radar data is already in radar coordinates
    let Raster::Stack(radar) = geocoder
        .open_grids(None, &pairs(), "phasefilt", GeocodeMode::Inverse)
        .expect("Failed to open radar stack")
    else {
        panic!("expected a stack");
    };
    assert_eq!(radar.data.dim(), (2, 12, 16));
    assert_eq!(radar.data[[0, 3, 4]], 304.0);
}

#[test]
fn test_stale_matrices_are_rebuilt() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let subswath = Subswath::new("1").expect("Invalid subswath");

    let first = geocoder(dir.path(), tables("1"), 16);
    assert!(first.ensure_matrices(None, &pairs()).expect("Failed to check matrices"));
    assert!(!first.ensure_matrices(None, &pairs()).expect("Failed to check matrices"));

    // Interferograms cut to a different range extent
    let second = geocoder(dir.path(), tables("1"), 14);
    assert!(second.ensure_matrices(Some(&subswath), &pairs()).expect("Failed to check matrices"));
    let forward = second
        .store()
        .load(&subswath, MatrixKind::Forward)
        .expect("Failed to load forward matrix");
    assert_eq!(forward.source_cols.len(), 14);
    let inverse = second
        .store()
        .load(&subswath, MatrixKind::Inverse)
        .expect("Failed to load inverse matrix");
    assert_eq!(inverse.shape(), (12, 14));
}

#[test]
fn test_merged_subswath_requests_table_rebuild() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let tables = tables("12");
    let geocoder = geocoder(dir.path(), Arc::clone(&tables), 16);

    let subswath = geocoder.geocode_parallel(None, &pairs()).expect("Failed to build matrices");
    assert!(subswath.is_merged());
    assert_eq!(tables.rebuild_requests(), vec![subswath.clone()]);
    assert!(geocoder
        .store()
        .path_for(&subswath, MatrixKind::Forward)
        .ends_with("F12_intf_ra2ll.grd"));
}

#[test]
fn test_progress_is_reported_per_tile_and_layer() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let progress = Arc::new(CountingProgress {
        units: AtomicUsize::new(0),
    });
    let geocoder = geocoder(dir.path(), tables("1"), 16).with_progress(progress.clone());

    geocoder.geocode_parallel(None, &pairs()).expect("Failed to build matrices");
    // 12x16 radar grid in 5x5 tiles
    assert_eq!(progress.units.load(Ordering::SeqCst), 3 * 4);

    geocoder
        .open_grids(None, &pairs(), "phasefilt", GeocodeMode::Forward)
        .expect("Failed to geocode stack");
    assert_eq!(progress.units.load(Ordering::SeqCst), 3 * 4 + 2);
}

/// 128x256 radar scene under a 256x256 table on whole range columns
fn full_scene(basedir: &Path) -> (Geocoder, TranslationTable) {
    let shape = (256, 256);
    let table = TranslationTable::from_arrays(
        &Array2::from_shape_fn(shape, |(i, j)| (255 - i) as f64 * 0.5 + 0.01 * j as f64),
        &Array2::from_shape_fn(shape, |(_, j)| j as f64),
        &Array2::zeros(shape),
        Coordinate::regular("lat", 45.0, 0.0005, shape.0),
        Coordinate::regular("lon", 7.0, 0.0005, shape.1),
        (32, 32),
    )
    .expect("Failed to build translation table");
    let mut tables = InMemoryTranslationTables::new();
    tables.insert(Subswath::new("3").expect("Invalid subswath"), table.clone());
    let tables: Arc<dyn TranslationTableAccessor> = Arc::new(tables);

    let mut rasters = InMemoryRasterStore::new();
    let radar = Grid::new(
        Array2::from_shape_fn((128, 256), |(y, x)| (y * 1000 + x) as f32),
        Coordinate::regular("y", 0.0, 1.0, 128),
        Coordinate::regular("x", 0.0, 1.0, 256),
    )
    .expect("Failed to build radar product");
    rasters.insert(&pairs()[0], "phasefilt", radar);

    let config = GeocodeConfig::new(basedir).with_chunk_size(64);
    let geocoder = Geocoder::new(config, tables, Arc::new(rasters)).expect("Failed to create geocoder");
    (geocoder, table)
}

#[test]
fn test_full_scene_geocoding_across_tiles_and_blocks() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let (geocoder, table) = full_scene(dir.path());
    let pairs = &pairs()[..1];

    let subswath = geocoder.geocode_parallel(None, pairs).expect("Failed to build matrices");
    let forward = geocoder
        .store()
        .load(&subswath, MatrixKind::Forward)
        .expect("Failed to load forward matrix");
    let inverse = geocoder
        .store()
        .load(&subswath, MatrixKind::Inverse)
        .expect("Failed to load inverse matrix");
    assert_eq!(forward.shape(), (256, 256));
    assert_eq!(inverse.shape(), (128, 256));
    assert_eq!(inverse.matched_count(), 128 * 256);
    assert!(forward.matched_count() > 256 * 256 / 2);

    let reference = geocoder.reference_grid(pairs).expect("Failed to open reference grid");
    let tolerance = ForwardMatrixBuilder::from_config(geocoder.config())
        .tolerance(&reference)
        .expect("Failed to compute tolerance");
    let records = table.records();
    for ((i, j), cell) in forward.indices.indexed_iter() {
        let Some(radar) = cell.get() else {
            continue;
        };
        let label = inverse
            .get(radar / 256, radar % 256)
            .expect("Matched radar cell without table record");
        let (start, back) = (&records[i * 256 + j], &records[label]);
        let distance = (start.azimuth - back.azimuth).hypot(start.range - back.range);
        assert!(distance <= tolerance, "cell ({}, {}) came back {:.3} away", i, j, distance);
    }

    let Raster::Stack(stack) = geocoder
        .open_grids(None, pairs, "phasefilt", GeocodeMode::Forward)
        .expect("Failed to geocode stack")
    else {
        panic!("expected a stack");
    };
    assert_eq!(stack.data.dim(), (1, 256, 256));
    for ((i, j), cell) in forward.indices.indexed_iter() {
        let value = stack.data[[0, i, j]];
        match cell.get() {
            Some(radar) => assert_eq!(value, ((radar / 256) * 1000 + radar % 256) as f32),
            None => assert!(value.is_nan()),
        }
    }
}
