//! External reprojection through a `gdalwarp` executable.
//!
//! Used when the in-memory reprojection cannot handle a grid's spatial
//! reference. The grid is handed over as a raw Float32 file described by a
//! VRT, and read back from the EHdr (`.bil` + `.hdr`) the warper writes.

use bytes::{Buf, BufMut, BytesMut};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use grid_processor::{Grid, InterpolationMethod};
use tile_common::{GeoTransform, SpatialRef};

use crate::error::TransformError;

const INPUT_RAW: &str = "input.bin";
const INPUT_VRT: &str = "input.vrt";
const OUTPUT_BIL: &str = "output.bil";
const OUTPUT_HDR: &str = "output.hdr";

/// A single reprojection into EPSG:3857.
#[derive(Debug, Clone, Copy)]
pub struct WarpRequest<'a> {
    pub grid: &'a Grid,
    pub method: InterpolationMethod,
    /// Output pixel size in meters.
    pub target_resolution: Option<f64>,
}

/// Something that can reproject a grid the in-memory path cannot.
pub trait WarpBackend: Send + Sync {
    fn name(&self) -> &str;

    fn warp(&self, request: &WarpRequest<'_>) -> Result<Grid, TransformError>;
}

/// Runs `gdalwarp` in a scratch directory.
#[derive(Debug, Clone)]
pub struct GdalWarp {
    program: PathBuf,
    scratch_dir: Option<PathBuf>,
}

impl Default for GdalWarp {
    fn default() -> Self {
        Self::new("gdalwarp")
    }
}

impl GdalWarp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            scratch_dir: None,
        }
    }

    /// Create scratch directories under `dir` instead of the system temp dir.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    fn scratch(&self) -> Result<tempfile::TempDir, TransformError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("warp-");
        let dir = match &self.scratch_dir {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        };
        dir.map_err(|e| TransformError::WarpFailed(format!("scratch directory: {}", e)))
    }

    fn args(&self, request: &WarpRequest<'_>, vrt: &Path, out: &Path) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-overwrite".into(),
            "-q".into(),
            "-t_srs".into(),
            "EPSG:3857".into(),
            "-r".into(),
            request.method.as_str().into(),
        ];
        if let Some(res) = request.target_resolution.filter(|r| *r > 0.0) {
            args.extend(["-tr".to_string(), res.to_string(), res.to_string()]);
        }
        args.extend([
            "-of".to_string(),
            "EHdr".to_string(),
            "-ot".to_string(),
            "Float32".to_string(),
            "-dstnodata".to_string(),
            "nan".to_string(),
            vrt.display().to_string(),
            out.display().to_string(),
        ]);
        args
    }
}

impl WarpBackend for GdalWarp {
    fn name(&self) -> &str {
        "gdalwarp"
    }

    fn warp(&self, request: &WarpRequest<'_>) -> Result<Grid, TransformError> {
        let grid = request.grid;
        let srs = source_srs_text(&grid.spatial_ref)?;
        let scratch = self.scratch()?;
        let dir = scratch.path();

        write_raw_input(grid, &dir.join(INPUT_RAW))?;
        fs::write(dir.join(INPUT_VRT), build_vrt(grid, &srs))
            .map_err(|e| TransformError::WarpFailed(format!("writing VRT: {}", e)))?;

        let args = self.args(request, &dir.join(INPUT_VRT), &dir.join(OUTPUT_BIL));
        debug!(program = %self.program.display(), ?args, "Running external warp");

        let output = Command::new(&self.program)
            .args(&args)
            .current_dir(dir)
            .output()
            .map_err(|e| {
                TransformError::WarpFailed(format!("{}: {}", self.program.display(), e))
            })?;
        if !output.status.success() {
            return Err(TransformError::WarpFailed(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let header_text = fs::read_to_string(dir.join(OUTPUT_HDR))
            .map_err(|e| TransformError::WarpFailed(format!("reading header: {}", e)))?;
        let header = EhdrHeader::parse(&header_text)?;
        let raw = fs::read(dir.join(OUTPUT_BIL))
            .map_err(|e| TransformError::WarpFailed(format!("reading output: {}", e)))?;
        let data = header.decode(&raw)?;

        let mut result = Grid::new(
            data,
            header.ncols,
            header.nrows,
            SpatialRef::web_mercator(),
            header.geotransform(),
        )
        .map_err(|e| TransformError::WarpFailed(e.to_string()))?;
        result.metadata = grid.metadata.clone();

        info!(
            width = result.width,
            height = result.height,
            method = %request.method,
            "External warp complete"
        );
        Ok(result)
    }
}

fn source_srs_text(srs: &SpatialRef) -> Result<String, TransformError> {
    match srs {
        SpatialRef::EngineeringUnknown(_) => Err(TransformError::WarpFailed(format!(
            "source spatial reference is not georeferenced: {}",
            srs
        ))),
        other => other.to_attribute().ok_or_else(|| {
            TransformError::WarpFailed("source has no spatial reference".to_string())
        }),
    }
}

/// Missing samples are written as NaN so the VRT nodata value covers them.
fn write_raw_input(grid: &Grid, path: &Path) -> Result<(), TransformError> {
    let mut buf = BytesMut::with_capacity(grid.data.len() * 4);
    for v in &grid.data {
        let v = if grid.is_missing(*v) { f32::NAN } else { *v };
        buf.put_f32_le(v);
    }
    fs::write(path, &buf).map_err(|e| TransformError::WarpFailed(format!("writing input: {}", e)))
}

fn build_vrt(grid: &Grid, srs: &str) -> String {
    let gt = grid.transform.0;
    format!(
        r#"<VRTDataset rasterXSize="{w}" rasterYSize="{h}">
  <SRS>{srs}</SRS>
  <GeoTransform>{g0}, {g1}, {g2}, {g3}, {g4}, {g5}</GeoTransform>
  <VRTRasterBand dataType="Float32" band="1" subClass="VRTRawRasterBand">
    <NoDataValue>nan</NoDataValue>
    <SourceFilename relativeToVRT="1">{raw}</SourceFilename>
    <ImageOffset>0</ImageOffset>
    <PixelOffset>4</PixelOffset>
    <LineOffset>{line}</LineOffset>
    <ByteOrder>LSB</ByteOrder>
  </VRTRasterBand>
</VRTDataset>
"#,
        w = grid.width,
        h = grid.height,
        srs = quick_xml::escape::escape(srs),
        g0 = gt[0],
        g1 = gt[1],
        g2 = gt[2],
        g3 = gt[3],
        g4 = gt[4],
        g5 = gt[5],
        raw = INPUT_RAW,
        line = grid.width * 4,
    )
}

/// The parts of an ESRI `.hdr` the reader needs.
#[derive(Debug, Clone, PartialEq)]
struct EhdrHeader {
    nrows: usize,
    ncols: usize,
    /// Center of the upper-left pixel.
    ulxmap: f64,
    ulymap: f64,
    xdim: f64,
    ydim: f64,
    nodata: Option<f32>,
    big_endian: bool,
}

impl EhdrHeader {
    fn parse(text: &str) -> Result<Self, TransformError> {
        let fields: HashMap<String, &str> = text
            .lines()
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                Some((parts.next()?.to_uppercase(), parts.next()?))
            })
            .collect();

        fn field<T: std::str::FromStr>(
            fields: &HashMap<String, &str>,
            key: &str,
        ) -> Result<T, TransformError> {
            fields
                .get(key)
                .ok_or_else(|| TransformError::WarpFailed(format!("header has no {}", key)))?
                .parse()
                .map_err(|_| TransformError::WarpFailed(format!("header {} is not a number", key)))
        }

        let nodata = match fields.get("NODATA") {
            Some(v) if v.eq_ignore_ascii_case("nan") => None,
            Some(v) => v.parse().ok(),
            None => None,
        };

        Ok(Self {
            nrows: field(&fields, "NROWS")?,
            ncols: field(&fields, "NCOLS")?,
            ulxmap: field(&fields, "ULXMAP")?,
            ulymap: field(&fields, "ULYMAP")?,
            xdim: field(&fields, "XDIM")?,
            ydim: field(&fields, "YDIM")?,
            nodata,
            big_endian: fields
                .get("BYTEORDER")
                .is_some_and(|v| v.eq_ignore_ascii_case("M")),
        })
    }

    fn geotransform(&self) -> GeoTransform {
        GeoTransform([
            self.ulxmap - self.xdim / 2.0,
            self.xdim,
            0.0,
            self.ulymap + self.ydim / 2.0,
            0.0,
            -self.ydim,
        ])
    }

    fn decode(&self, raw: &[u8]) -> Result<Vec<f32>, TransformError> {
        let expected = self.nrows * self.ncols * 4;
        if raw.len() < expected {
            return Err(TransformError::WarpFailed(format!(
                "output has {} bytes, expected {}",
                raw.len(),
                expected
            )));
        }
        let mut buf = &raw[..expected];
        let mut data = Vec::with_capacity(self.nrows * self.ncols);
        while buf.has_remaining() {
            let v = if self.big_endian {
                buf.get_f32()
            } else {
                buf.get_f32_le()
            };
            data.push(match self.nodata {
                Some(nd) if v == nd => f32::NAN,
                _ => v,
            });
        }
        Ok(data)
    }
}
