//! Persistence of index matrices
//!
//! One file per (subswath, kind), `F{subswath}_{kind}.grd`:
//! magic, header length (u32 LE), XML header, zlib payload holding the four
//! axes (f64 LE) followed by the indices (u32 LE, `u32::MAX` = no match).

use crate::config::GeocodeConfig;
use crate::types::{
    CellIndex, Coordinate, GeoError, GeoResult, GridRegistration, IndexMatrix, MatrixKind, Subswath,
};
use chrono::{DateTime, Utc};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const MAGIC: &[u8; 8] = b"SARGEOMX";
const FORMAT_VERSION: u32 = 1;
const CODEC: &str = "zlib";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename = "matrix")]
struct MatrixHeader {
    version: u32,
    kind: String,
    subswath: String,
    row_name: String,
    rows: usize,
    col_name: String,
    cols: usize,
    source_row_name: String,
    source_rows: usize,
    source_col_name: String,
    source_cols: usize,
    node_offset: u8,
    codec: String,
    created: DateTime<Utc>,
}

/// File-backed store for forward/inverse matrices
#[derive(Debug, Clone)]
pub struct MatrixStore {
    root: PathBuf,
    compression: Compression,
}

impl MatrixStore {
    pub fn new<P: AsRef<Path>>(root: P, compression_level: u32) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            compression: Compression::new(compression_level.min(9)),
        }
    }

    pub fn from_config(config: &GeocodeConfig) -> Self {
        Self::new(&config.basedir, config.compression_level)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, subswath: &Subswath, kind: MatrixKind) -> PathBuf {
        self.root.join(format!("F{}_{}.grd", subswath, kind.name()))
    }

    pub fn exists(&self, subswath: &Subswath, kind: MatrixKind) -> bool {
        self.path_for(subswath, kind).is_file()
    }

    /// Load a persisted matrix; `NotFound` when it has not been built
    pub fn load(&self, subswath: &Subswath, kind: MatrixKind) -> GeoResult<IndexMatrix> {
        let path = self.path_for(subswath, kind);
        if !path.is_file() {
            return Err(GeoError::NotFound(format!(
                "{} matrix for subswath {} ({})",
                kind,
                subswath,
                path.display()
            )));
        }
        log::debug!("Loading {} matrix: {}", kind, path.display());
        let reader = BufReader::new(File::open(&path)?);
        let matrix = decode_matrix(reader)?;
        if matrix.kind != kind {
            return Err(GeoError::InvalidFormat(format!(
                "{} holds a {} matrix, expected {}",
                path.display(),
                matrix.kind,
                kind
            )));
        }
        Ok(matrix)
    }

    /// Persist a matrix, replacing any previous file.
    ///
    /// The new file is written to a temporary file in the same directory and
    /// renamed into place, so a failed write never leaves a truncated matrix
    /// behind.
    pub fn save(&self, subswath: &Subswath, matrix: &IndexMatrix) -> GeoResult<PathBuf> {
        let staged = self.stage(subswath, matrix)?;
        self.commit(subswath, matrix, staged)
    }

    /// Persist several matrices of one subswath together. Every matrix is
    /// validated and encoded before any existing file is touched.
    pub fn save_all(&self, subswath: &Subswath, matrices: &[&IndexMatrix]) -> GeoResult<Vec<PathBuf>> {
        let staged = matrices
            .iter()
            .map(|matrix| self.stage(subswath, matrix))
            .collect::<GeoResult<Vec<_>>>()?;
        matrices
            .iter()
            .zip(staged)
            .map(|(matrix, tmp)| self.commit(subswath, matrix, tmp))
            .collect()
    }

    /// Encode a matrix into a temporary file next to its final path
    fn stage(&self, subswath: &Subswath, matrix: &IndexMatrix) -> GeoResult<NamedTempFile> {
        matrix.validate()?;
        fs::create_dir_all(&self.root)?;
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            encode_matrix(&mut writer, subswath, matrix, self.compression)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        Ok(tmp)
    }

    /// Replace the old file with a staged one
    fn commit(&self, subswath: &Subswath, matrix: &IndexMatrix, tmp: NamedTempFile) -> GeoResult<PathBuf> {
        let path = self.path_for(subswath, matrix.kind);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        tmp.persist(&path).map_err(|e| GeoError::Io(e.error))?;

        log::info!(
            "💾 Saved {} matrix {:?} for subswath {}: {}",
            matrix.kind,
            matrix.shape(),
            subswath,
            path.display()
        );
        Ok(path)
    }

    /// Delete a persisted matrix; returns whether a file was removed
    pub fn remove(&self, subswath: &Subswath, kind: MatrixKind) -> GeoResult<bool> {
        let path = self.path_for(subswath, kind);
        if path.exists() {
            fs::remove_file(&path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

fn encode_matrix<W: Write>(
    writer: &mut W,
    subswath: &Subswath,
    matrix: &IndexMatrix,
    compression: Compression,
) -> GeoResult<()> {
    let (rows, cols) = matrix.shape();
    let header = MatrixHeader {
        version: FORMAT_VERSION,
        kind: matrix.kind.name().to_string(),
        subswath: subswath.to_string(),
        row_name: matrix.rows.name.clone(),
        rows,
        col_name: matrix.cols.name.clone(),
        cols,
        source_row_name: matrix.source_rows.name.clone(),
        source_rows: matrix.source_rows.len(),
        source_col_name: matrix.source_cols.name.clone(),
        source_cols: matrix.source_cols.len(),
        node_offset: matrix.registration.node_offset(),
        codec: CODEC.to_string(),
        created: Utc::now(),
    };
    let xml = quick_xml::se::to_string(&header)?;
    let header_len = u32::try_from(xml.len())
        .map_err(|_| GeoError::InvalidFormat("matrix header too large".to_string()))?;

    writer.write_all(MAGIC)?;
    writer.write_all(&header_len.to_le_bytes())?;
    writer.write_all(xml.as_bytes())?;

    let mut encoder = ZlibEncoder::new(writer, compression);
    for axis in [&matrix.rows, &matrix.cols, &matrix.source_rows, &matrix.source_cols] {
        for value in &axis.values {
            encoder.write_all(&value.to_le_bytes())?;
        }
    }
    for index in matrix.indices.iter() {
        encoder.write_all(&index.raw().to_le_bytes())?;
    }
    encoder.finish()?;
    Ok(())
}

fn decode_matrix<R: Read>(mut reader: R) -> GeoResult<IndexMatrix> {
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(GeoError::InvalidFormat("not an index matrix file".to_string()));
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let mut xml = vec![0u8; u32::from_le_bytes(len_bytes) as usize];
    reader.read_exact(&mut xml)?;
    let xml = String::from_utf8(xml)
        .map_err(|e| GeoError::InvalidFormat(format!("matrix header is not UTF-8: {}", e)))?;
    let header: MatrixHeader = quick_xml::de::from_str(&xml)?;
    if header.version != FORMAT_VERSION || header.codec != CODEC {
        return Err(GeoError::InvalidFormat(format!(
            "unsupported matrix format version {} codec {}",
            header.version, header.codec
        )));
    }
    let kind: MatrixKind = header.kind.parse()?;
    let registration = GridRegistration::from_node_offset(header.node_offset)?;

    let mut payload = Vec::new();
    ZlibDecoder::new(reader).read_to_end(&mut payload)?;
    let axis_values = header.rows + header.cols + header.source_rows + header.source_cols;
    let expected = axis_values * 8 + header.rows * header.cols * 4;
    if payload.len() != expected {
        return Err(GeoError::InvalidFormat(format!(
            "matrix payload holds {} bytes, expected {}",
            payload.len(),
            expected
        )));
    }

    let mut offset = 0;
    let mut read_axis = |name: &str, n: usize| {
        let values = payload[offset..offset + n * 8]
            .chunks_exact(8)
            .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            .collect();
        offset += n * 8;
        Coordinate::new(name, values)
    };
    let rows = read_axis(&header.row_name, header.rows);
    let cols = read_axis(&header.col_name, header.cols);
    let source_rows = read_axis(&header.source_row_name, header.source_rows);
    let source_cols = read_axis(&header.source_col_name, header.source_cols);

    let indices: Vec<CellIndex> = payload[axis_values * 8..]
        .chunks_exact(4)
        .map(|b| CellIndex::from_raw(u32::from_le_bytes([b[0], b[1], b[2], b[3]])))
        .collect();
    let indices = Array2::from_shape_vec((header.rows, header.cols), indices)
        .map_err(|e| GeoError::InvalidFormat(format!("failed to reshape matrix: {}", e)))?;

    IndexMatrix::new(kind, indices, rows, cols, source_rows, source_cols, registration)
}
