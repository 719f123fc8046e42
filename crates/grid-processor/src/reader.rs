//! Reading raster stores written by [`RasterWriter`](crate::RasterWriter).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use zarrs::array::Array;
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

use tile_common::SpatialRef;

use crate::downsample::reduced_dims;
use crate::error::{GridProcessorError, Result};
use crate::types::{Grid, RgbaRaster};
use crate::writer::{overview_node, RasterAttributes, DATA_NODE};

/// An opened raster store.
pub struct RasterReader {
    path: PathBuf,
    store: Arc<FilesystemStore>,
    attributes: RasterAttributes,
    width: usize,
    height: usize,
}

impl std::fmt::Debug for RasterReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterReader")
            .field("path", &self.path)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("band_count", &self.attributes.band_count)
            .finish()
    }
}

impl RasterReader {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.join("data").join("zarr.json").exists() {
            return Err(GridProcessorError::open_failed(format!(
                "{} is not a raster store",
                path.display()
            )));
        }
        let store = Arc::new(
            FilesystemStore::new(path).map_err(|e| GridProcessorError::open_failed(e.to_string()))?,
        );
        let array = Array::open(store.clone(), DATA_NODE)
            .map_err(|e| GridProcessorError::open_failed(e.to_string()))?;

        let shape = array.shape();
        if shape.len() < 2 {
            return Err(GridProcessorError::invalid_metadata(
                "Array must have at least 2 dimensions",
            ));
        }
        let attributes = RasterAttributes::from_json_map(array.attributes())?;
        let expected_dims = if attributes.band_count == 1 { 2 } else { 3 };
        if shape.len() != expected_dims {
            return Err(GridProcessorError::invalid_metadata(format!(
                "{} bands stored in a {}-dimensional array",
                attributes.band_count,
                shape.len()
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            height: shape[0] as usize,
            width: shape[1] as usize,
            store,
            attributes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn attributes(&self) -> &RasterAttributes {
        &self.attributes
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn band_count(&self) -> usize {
        self.attributes.band_count
    }

    pub fn spatial_ref(&self) -> Result<SpatialRef> {
        self.attributes.spatial_ref()
    }

    /// Dimensions of the level reduced by `factor` (1 is full resolution).
    pub fn level_dims(&self, factor: u32) -> (usize, usize) {
        reduced_dims(self.width, self.height, factor.max(1) as usize)
    }

    fn level_array(&self, factor: u32) -> Result<Array<FilesystemStore>> {
        let node = if factor <= 1 {
            DATA_NODE.to_string()
        } else if self.attributes.overview_factors.contains(&factor) {
            overview_node(factor)
        } else {
            return Err(GridProcessorError::read_failed(format!(
                "no overview with factor {} in {}",
                factor,
                self.path.display()
            )));
        };
        Array::open(self.store.clone(), &node).map_err(|e| GridProcessorError::open_failed(e.to_string()))
    }

    fn full_subset(array: &Array<FilesystemStore>) -> Result<ArraySubset> {
        let shape = array.shape().to_vec();
        ArraySubset::new_with_start_shape(vec![0; shape.len()], shape)
            .map_err(|e| GridProcessorError::read_failed(e.to_string()))
    }

    /// Samples of a float level, row-major.
    pub fn read_level_f32(&self, factor: u32) -> Result<Vec<f32>> {
        if self.band_count() != 1 {
            return Err(GridProcessorError::read_failed("store does not hold a float grid"));
        }
        let array = self.level_array(factor)?;
        let subset = Self::full_subset(&array)?;
        array
            .retrieve_array_subset_elements::<f32>(&subset)
            .map_err(|e| GridProcessorError::read_failed(e.to_string()))
    }

    /// Interleaved RGBA bytes of a level.
    pub fn read_level_rgba(&self, factor: u32) -> Result<Vec<u8>> {
        if self.band_count() != 4 {
            return Err(GridProcessorError::read_failed("store does not hold an RGBA raster"));
        }
        let array = self.level_array(factor)?;
        let subset = Self::full_subset(&array)?;
        array
            .retrieve_array_subset_elements::<u8>(&subset)
            .map_err(|e| GridProcessorError::read_failed(e.to_string()))
    }

    /// The full-resolution float grid with its georeferencing.
    pub fn read_grid(&self) -> Result<Grid> {
        let data = self.read_level_f32(1)?;
        let grid = Grid::new(data, self.width, self.height, self.spatial_ref()?, self.attributes.geotransform)?;
        Ok(grid
            .with_nodata(self.attributes.nodata)
            .with_metadata(self.attributes.metadata.clone()))
    }

    /// The full-resolution RGBA raster with its georeferencing.
    pub fn read_rgba(&self) -> Result<RgbaRaster> {
        let data = self.read_level_rgba(1)?;
        let mut raster =
            RgbaRaster::new(data, self.width, self.height, self.spatial_ref()?, self.attributes.geotransform)?;
        raster.metadata = self.attributes.metadata.clone();
        Ok(raster)
    }
}

/// Rewrite the attributes of a store in place. Chunk data is untouched.
pub fn update_attributes<F>(path: &Path, update: F) -> Result<RasterAttributes>
where
    F: FnOnce(&mut RasterAttributes),
{
    let store = Arc::new(
        FilesystemStore::new(path).map_err(|e| GridProcessorError::open_failed(e.to_string()))?,
    );
    let mut array = Array::open(store, DATA_NODE).map_err(|e| GridProcessorError::open_failed(e.to_string()))?;

    let mut attributes = RasterAttributes::from_json_map(array.attributes())?;
    update(&mut attributes);
    *array.attributes_mut() = attributes.to_json_map()?;
    array
        .store_metadata()
        .map_err(|e| GridProcessorError::StorageError(e.to_string()))?;
    Ok(attributes)
}
