use ndarray::{Array2, Array3, Axis, Zip};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Real-valued raster sample (phase, coherence, mask value, ...)
pub type SarReal = f32;

/// 2D real raster data (rows x cols)
pub type SarRealImage = Array2<SarReal>;

/// 3D raster stack (layer x rows x cols)
pub type SarRealCube = Array3<SarReal>;

/// Coordinate system of a raster, identified by its two spatial axis names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoordinateSystem {
    /// Radar coordinates (azimuth `y`, range `x`)
    Radar,
    /// Geographic coordinates (`lat`, `lon`)
    Geographic,
}

impl CoordinateSystem {
    /// Names of the (row, column) axes
    pub fn axis_names(&self) -> (&'static str, &'static str) {
        match self {
            CoordinateSystem::Radar => ("y", "x"),
            CoordinateSystem::Geographic => ("lat", "lon"),
        }
    }

    /// Detect the coordinate system from a pair of axis names
    pub fn from_axes(rows: &str, cols: &str) -> Option<Self> {
        match (rows, cols) {
            ("y", "x") => Some(CoordinateSystem::Radar),
            ("lat", "lon") => Some(CoordinateSystem::Geographic),
            _ => None,
        }
    }
}

impl fmt::Display for CoordinateSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinateSystem::Radar => write!(f, "radar"),
            CoordinateSystem::Geographic => write!(f, "geographic"),
        }
    }
}

/// Named 1D axis of cell-center coordinates. Values are monotonic.
#[derive(Debug, Clone, PartialEq)]
pub struct Coordinate {
    pub name: String,
    pub values: Vec<f64>,
}

impl Coordinate {
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Regularly spaced axis: `start, start + step, ...` (`n` values)
    pub fn regular(name: impl Into<String>, start: f64, step: f64, n: usize) -> Self {
        let values = (0..n).map(|i| start + step * i as f64).collect();
        Self::new(name, values)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Spacing between the first two values
    pub fn spacing(&self) -> Option<f64> {
        if self.values.len() < 2 {
            return None;
        }
        Some(self.values[1] - self.values[0])
    }

    /// (min, max) of the axis values
    pub fn bounds(&self) -> Option<(f64, f64)> {
        let first = *self.values.first()?;
        let last = *self.values.last()?;
        Some((first.min(last), first.max(last)))
    }

    fn is_ascending(&self) -> bool {
        match (self.values.first(), self.values.last()) {
            (Some(first), Some(last)) => first <= last,
            _ => true,
        }
    }

    /// Matching tolerance for exact coordinate lookups
    fn tolerance(&self) -> f64 {
        self.spacing()
            .map(|s| (s.abs() * 1e-3).max(1e-9))
            .unwrap_or(1e-6)
    }

    /// Nearest axis position and its distance, ignoring axis bounds
    fn locate(&self, value: f64) -> Option<(usize, f64)> {
        if value.is_nan() || self.values.is_empty() {
            return None;
        }
        let pos = if self.is_ascending() {
            self.values.partition_point(|&v| v < value)
        } else {
            self.values.partition_point(|&v| v > value)
        };

        let mut best: Option<(usize, f64)> = None;
        for candidate in [pos.checked_sub(1), Some(pos)].into_iter().flatten() {
            if let Some(&v) = self.values.get(candidate) {
                let distance = (v - value).abs();
                if best.map_or(true, |(_, d)| distance < d) {
                    best = Some((candidate, distance));
                }
            }
        }
        best
    }

    /// Position of a value present on the axis (exact match within tolerance)
    pub fn position(&self, value: f64) -> Option<usize> {
        let tolerance = self.tolerance();
        self.locate(value)
            .filter(|&(_, distance)| distance <= tolerance)
            .map(|(pos, _)| pos)
    }

    /// Nearest axis position for values inside the axis bounds
    pub fn nearest_position(&self, value: f64) -> Option<usize> {
        let (min, max) = self.bounds()?;
        let tolerance = self.tolerance();
        if value < min - tolerance || value > max + tolerance {
            return None;
        }
        self.locate(value).map(|(pos, _)| pos)
    }

    /// Same name and values within tolerance
    pub fn matches(&self, other: &Coordinate) -> bool {
        let tolerance = self.tolerance();
        self.name == other.name
            && self.len() == other.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(a, b)| (a - b).abs() <= tolerance)
    }

    /// Sorted union of two axes with the same name, keeping this axis' direction
    pub fn union(&self, other: &Coordinate) -> GeoResult<Coordinate> {
        if self.name != other.name {
            return Err(GeoError::ShapeMismatch(format!(
                "cannot align axis '{}' with axis '{}'",
                self.name, other.name
            )));
        }
        let tolerance = self.tolerance();
        let mut values: Vec<f64> = self
            .values
            .iter()
            .chain(&other.values)
            .copied()
            .filter(|v| !v.is_nan())
            .collect();
        values.sort_by(|a, b| a.total_cmp(b));
        values.dedup_by(|a, b| (*a - *b).abs() <= tolerance);
        if !self.is_ascending() {
            values.reverse();
        }
        Ok(Coordinate::new(self.name.clone(), values))
    }
}

/// Single 2D raster addressed by two named axes
#[derive(Debug, Clone)]
pub struct Grid {
    pub data: SarRealImage,
    pub rows: Coordinate,
    pub cols: Coordinate,
}

impl Grid {
    pub fn new(data: SarRealImage, rows: Coordinate, cols: Coordinate) -> GeoResult<Self> {
        if data.dim() != (rows.len(), cols.len()) {
            return Err(GeoError::ShapeMismatch(format!(
                "grid data {:?} does not match axes {}={} x {}={}",
                data.dim(),
                rows.name,
                rows.len(),
                cols.name,
                cols.len()
            )));
        }
        Ok(Self { data, rows, cols })
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Total number of cells
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn coordinate_system(&self) -> Option<CoordinateSystem> {
        CoordinateSystem::from_axes(&self.rows.name, &self.cols.name)
    }

    /// Fail with `WrongCoordinateSystem` unless the grid carries the expected axes
    pub fn require_system(&self, expected: CoordinateSystem) -> GeoResult<()> {
        if self.coordinate_system() == Some(expected) {
            Ok(())
        } else {
            Err(GeoError::WrongCoordinateSystem {
                expected,
                rows: self.rows.name.clone(),
                cols: self.cols.name.clone(),
            })
        }
    }

    /// Flattened row-major cell centers as (row coordinate, column coordinate)
    pub fn cell_centers(&self) -> (Vec<f64>, Vec<f64>) {
        let n = self.size();
        let mut a = Vec::with_capacity(n);
        let mut b = Vec::with_capacity(n);
        for &row in &self.rows.values {
            for &col in &self.cols.values {
                a.push(row);
                b.push(col);
            }
        }
        (a, b)
    }

    /// Reindex onto new axes; cells without an exact counterpart become NaN
    pub fn reindex_like(&self, rows: &Coordinate, cols: &Coordinate) -> Grid {
        let row_map: Vec<Option<usize>> = rows.values.iter().map(|&v| self.rows.position(v)).collect();
        let col_map: Vec<Option<usize>> = cols.values.iter().map(|&v| self.cols.position(v)).collect();
        let data = Array2::from_shape_fn((rows.len(), cols.len()), |(i, j)| {
            match (row_map[i], col_map[j]) {
                (Some(r), Some(c)) => self.data[[r, c]],
                _ => f32::NAN,
            }
        });
        Grid {
            data,
            rows: rows.clone(),
            cols: cols.clone(),
        }
    }

    /// Nearest-neighbour resampling onto new axes. Targets outside the axis
    /// bounds become NaN; values are never blended.
    pub fn interp_nearest(&self, rows: &Coordinate, cols: &Coordinate) -> Grid {
        let row_map: Vec<Option<usize>> =
            rows.values.iter().map(|&v| self.rows.nearest_position(v)).collect();
        let col_map: Vec<Option<usize>> =
            cols.values.iter().map(|&v| self.cols.nearest_position(v)).collect();
        let data = Array2::from_shape_fn((rows.len(), cols.len()), |(i, j)| {
            match (row_map[i], col_map[j]) {
                (Some(r), Some(c)) => self.data[[r, c]],
                _ => f32::NAN,
            }
        });
        Grid {
            data,
            rows: rows.clone(),
            cols: cols.clone(),
        }
    }
}

/// Per-layer labels along the leading axis of a stack (e.g. `pair`)
#[derive(Debug, Clone, PartialEq)]
pub struct LayerLabels {
    pub name: String,
    pub labels: Vec<String>,
}

impl LayerLabels {
    pub fn new(name: impl Into<String>, labels: Vec<String>) -> Self {
        Self {
            name: name.into(),
            labels,
        }
    }
}

/// Stack of 2D rasters sharing the same spatial axes
#[derive(Debug, Clone)]
pub struct GridStack {
    pub data: SarRealCube,
    /// Layer axis labels
    pub layer: LayerLabels,
    /// Extra per-layer labels carried through transforms untouched
    pub passengers: Vec<LayerLabels>,
    pub rows: Coordinate,
    pub cols: Coordinate,
}

impl GridStack {
    pub fn new(
        data: SarRealCube,
        layer: LayerLabels,
        rows: Coordinate,
        cols: Coordinate,
    ) -> GeoResult<Self> {
        let (n, r, c) = data.dim();
        if n != layer.labels.len() || r != rows.len() || c != cols.len() {
            return Err(GeoError::ShapeMismatch(format!(
                "stack data {:?} does not match {}={} x {}={} x {}={}",
                data.dim(),
                layer.name,
                layer.labels.len(),
                rows.name,
                rows.len(),
                cols.name,
                cols.len()
            )));
        }
        Ok(Self {
            data,
            layer,
            passengers: Vec::new(),
            rows,
            cols,
        })
    }

    /// Attach an extra per-layer label set
    pub fn with_passenger(mut self, passenger: LayerLabels) -> GeoResult<Self> {
        if passenger.labels.len() != self.len() {
            return Err(GeoError::ShapeMismatch(format!(
                "passenger '{}' has {} labels for {} layers",
                passenger.name,
                passenger.labels.len(),
                self.len()
            )));
        }
        self.passengers.push(passenger);
        Ok(self)
    }

    /// Build a stack from individual layers, aligning them on the union of
    /// their axes. Cropped layers are padded with NaN.
    pub fn from_layers(layer: LayerLabels, layers: Vec<Grid>) -> GeoResult<Self> {
        let first = layers
            .first()
            .ok_or_else(|| GeoError::EmptyInput("no layers to stack".to_string()))?;
        if layer.labels.len() != layers.len() {
            return Err(GeoError::ShapeMismatch(format!(
                "{} labels for {} layers",
                layer.labels.len(),
                layers.len()
            )));
        }

        let mut rows = first.rows.clone();
        let mut cols = first.cols.clone();
        for grid in &layers[1..] {
            rows = rows.union(&grid.rows)?;
            cols = cols.union(&grid.cols)?;
        }

        let aligned: Vec<Grid> = layers
            .iter()
            .map(|grid| {
                if grid.rows.matches(&rows) && grid.cols.matches(&cols) {
                    grid.clone()
                } else {
                    log::debug!(
                        "Aligning layer {:?} onto {}x{} stack grid",
                        grid.shape(),
                        rows.len(),
                        cols.len()
                    );
                    grid.reindex_like(&rows, &cols)
                }
            })
            .collect();
        let views: Vec<_> = aligned.iter().map(|g| g.data.view()).collect();
        let data = ndarray::stack(Axis(0), &views)
            .map_err(|e| GeoError::ShapeMismatch(format!("failed to stack layers: {}", e)))?;

        Self::new(data, layer, rows, cols)
    }

    pub fn len(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn spatial_shape(&self) -> (usize, usize) {
        (self.rows.len(), self.cols.len())
    }

    pub fn coordinate_system(&self) -> Option<CoordinateSystem> {
        CoordinateSystem::from_axes(&self.rows.name, &self.cols.name)
    }

    /// Copy of a single layer as a standalone grid
    pub fn layer(&self, index: usize) -> Grid {
        Grid {
            data: self.data.index_axis(Axis(0), index).to_owned(),
            rows: self.rows.clone(),
            cols: self.cols.clone(),
        }
    }

    /// Keep only the first `n` layers
    pub fn head(&self, n: usize) -> GridStack {
        let n = n.min(self.len());
        let data = self.data.slice(ndarray::s![..n, .., ..]).to_owned();
        let truncate = |labels: &LayerLabels| LayerLabels {
            name: labels.name.clone(),
            labels: labels.labels[..n].to_vec(),
        };
        GridStack {
            data,
            layer: truncate(&self.layer),
            passengers: self.passengers.iter().map(truncate).collect(),
            rows: self.rows.clone(),
            cols: self.cols.clone(),
        }
    }

    /// Cell-wise minimum across layers; NaN samples are skipped and a cell
    /// that is NaN in every layer stays NaN
    pub fn min_composite(&self) -> GeoResult<Grid> {
        if self.is_empty() {
            return Err(GeoError::EmptyInput(
                "cannot composite an empty stack".to_string(),
            ));
        }
        let mut composite = Array2::from_elem(self.spatial_shape(), f32::NAN);
        for layer in self.data.axis_iter(Axis(0)) {
            Zip::from(&mut composite).and(&layer).for_each(|out, &value| {
                if !value.is_nan() && (out.is_nan() || value < *out) {
                    *out = value;
                }
            });
        }
        Grid::new(composite, self.rows.clone(), self.cols.clone())
    }

    /// Rebuild a stack with new spatial content, keeping every layer label
    pub fn with_layers(
        &self,
        layers: Vec<SarRealImage>,
        rows: Coordinate,
        cols: Coordinate,
    ) -> GeoResult<GridStack> {
        if layers.len() != self.len() {
            return Err(GeoError::ShapeMismatch(format!(
                "{} layers produced for a stack of {}",
                layers.len(),
                self.len()
            )));
        }
        let views: Vec<_> = layers.iter().map(|l| l.view()).collect();
        let data = ndarray::stack(Axis(0), &views)
            .map_err(|e| GeoError::ShapeMismatch(format!("failed to concatenate layers: {}", e)))?;
        let mut stack = GridStack::new(data, self.layer.clone(), rows, cols)?;
        stack.passengers = self.passengers.clone();
        Ok(stack)
    }
}

/// A single layer or a stack of layers
#[derive(Debug, Clone)]
pub enum Raster {
    Layer(Grid),
    Stack(GridStack),
}

impl Raster {
    pub fn coordinate_system(&self) -> Option<CoordinateSystem> {
        match self {
            Raster::Layer(grid) => grid.coordinate_system(),
            Raster::Stack(stack) => stack.coordinate_system(),
        }
    }

    /// Shape of the two spatial axes
    pub fn spatial_shape(&self) -> (usize, usize) {
        match self {
            Raster::Layer(grid) => grid.shape(),
            Raster::Stack(stack) => stack.spatial_shape(),
        }
    }

    pub fn axes(&self) -> (&Coordinate, &Coordinate) {
        match self {
            Raster::Layer(grid) => (&grid.rows, &grid.cols),
            Raster::Stack(stack) => (&stack.rows, &stack.cols),
        }
    }
}

impl From<Grid> for Raster {
    fn from(grid: Grid) -> Self {
        Raster::Layer(grid)
    }
}

impl From<GridStack> for Raster {
    fn from(stack: GridStack) -> Self {
        Raster::Stack(stack)
    }
}

/// Flattened index into a source grid, or the "no match" sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellIndex(u32);

impl CellIndex {
    /// No corresponding source cell within tolerance
    pub const NONE: CellIndex = CellIndex(u32::MAX);

    pub fn new(index: usize) -> GeoResult<Self> {
        if index >= u32::MAX as usize {
            return Err(GeoError::IndexOutOfRange {
                index,
                size: u32::MAX as usize,
            });
        }
        Ok(CellIndex(index as u32))
    }

    pub fn from_raw(raw: u32) -> Self {
        CellIndex(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn get(self) -> Option<usize> {
        if self.is_none() {
            None
        } else {
            Some(self.0 as usize)
        }
    }

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl Default for CellIndex {
    fn default() -> Self {
        Self::NONE
    }
}

/// Which lookup an index matrix implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatrixKind {
    /// Geographic cell -> flattened radar grid index
    Forward,
    /// Radar cell -> flattened translation table index
    Inverse,
    /// Geographic (DEM) cell -> translation table record
    Area,
}

impl MatrixKind {
    /// Name used for persisted files and headers
    pub fn name(&self) -> &'static str {
        match self {
            MatrixKind::Forward => "intf_ra2ll",
            MatrixKind::Inverse => "intf_ll2ra",
            MatrixKind::Area => "trans_ra2ll",
        }
    }
}

impl fmt::Display for MatrixKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for MatrixKind {
    type Err = GeoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "intf_ra2ll" => Ok(MatrixKind::Forward),
            "intf_ll2ra" => Ok(MatrixKind::Inverse),
            "trans_ra2ll" => Ok(MatrixKind::Area),
            other => Err(GeoError::InvalidFormat(format!("unknown matrix kind '{}'", other))),
        }
    }
}

/// Grid registration convention (GMT `node_offset`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridRegistration {
    /// Values sit on grid lines (`node_offset = 0`)
    Gridline,
    /// Values sit at cell centers (`node_offset = 1`)
    CellCentered,
}

impl GridRegistration {
    pub fn node_offset(&self) -> u8 {
        match self {
            GridRegistration::Gridline => 0,
            GridRegistration::CellCentered => 1,
        }
    }

    pub fn from_node_offset(offset: u8) -> GeoResult<Self> {
        match offset {
            0 => Ok(GridRegistration::Gridline),
            1 => Ok(GridRegistration::CellCentered),
            other => Err(GeoError::InvalidFormat(format!("invalid node_offset {}", other))),
        }
    }
}

/// Index matrix shaped like its target grid, pointing into a source grid
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMatrix {
    pub kind: MatrixKind,
    pub indices: Array2<CellIndex>,
    /// Target axes (the matrix shape)
    pub rows: Coordinate,
    pub cols: Coordinate,
    /// Axes of the source grid the indices are flattened over
    pub source_rows: Coordinate,
    pub source_cols: Coordinate,
    pub registration: GridRegistration,
}

impl IndexMatrix {
    pub fn new(
        kind: MatrixKind,
        indices: Array2<CellIndex>,
        rows: Coordinate,
        cols: Coordinate,
        source_rows: Coordinate,
        source_cols: Coordinate,
        registration: GridRegistration,
    ) -> GeoResult<Self> {
        if indices.dim() != (rows.len(), cols.len()) {
            return Err(GeoError::ShapeMismatch(format!(
                "{} matrix {:?} does not match axes {}x{}",
                kind,
                indices.dim(),
                rows.len(),
                cols.len()
            )));
        }
        let matrix = Self {
            kind,
            indices,
            rows,
            cols,
            source_rows,
            source_cols,
            registration,
        };
        matrix.validate()?;
        Ok(matrix)
    }

    pub fn shape(&self) -> (usize, usize) {
        self.indices.dim()
    }

    pub fn source_shape(&self) -> (usize, usize) {
        (self.source_rows.len(), self.source_cols.len())
    }

    /// Number of cells in the source grid
    pub fn source_size(&self) -> usize {
        self.source_rows.len() * self.source_cols.len()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<usize> {
        self.indices.get((row, col)).and_then(|idx| idx.get())
    }

    /// Largest valid index present
    pub fn max_index(&self) -> Option<usize> {
        self.indices.iter().filter_map(|idx| idx.get()).max()
    }

    pub fn matched_count(&self) -> usize {
        self.indices.iter().filter(|idx| !idx.is_none()).count()
    }

    /// Percentage of target cells with a source match
    pub fn coverage(&self) -> f64 {
        if self.indices.is_empty() {
            return 0.0;
        }
        self.matched_count() as f64 / self.indices.len() as f64 * 100.0
    }

    /// Every entry is either the sentinel or a valid source index
    pub fn validate(&self) -> GeoResult<()> {
        let size = self.source_size();
        match self.max_index() {
            Some(index) if index >= size => Err(GeoError::IndexOutOfRange { index, size }),
            _ => Ok(()),
        }
    }
}

/// Subswath identifier; multi-digit ids (e.g. "12") denote merged subswaths
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subswath(String);

impl Subswath {
    pub fn new(id: impl Into<String>) -> GeoResult<Self> {
        let id = id.into();
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit() && c != '0') {
            return Err(GeoError::MissingInput(format!(
                "invalid subswath identifier '{}'",
                id
            )));
        }
        Ok(Subswath(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the id combines several subswaths
    pub fn is_merged(&self) -> bool {
        self.0.len() > 1
    }

    /// Individual subswath numbers
    pub fn components(&self) -> Vec<u32> {
        self.0.chars().filter_map(|c| c.to_digit(10)).collect()
    }
}

impl fmt::Display for Subswath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Subswath {
    type Err = GeoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Subswath::new(s)
    }
}

/// Error types for geocoding
#[derive(Debug, thiserror::Error)]
pub enum GeoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Index {index} out of range for source grid of {size} cells")]
    IndexOutOfRange { index: usize, size: usize },

    #[error("Wrong coordinate system: expected {expected} axes, found ({rows}, {cols})")]
    WrongCoordinateSystem {
        expected: CoordinateSystem,
        rows: String,
        cols: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::de::DeError),

    #[error("Processing error: {0}")]
    Processing(String),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for geocoding operations
pub type GeoResult<T> = Result<T, GeoError>;
