//! Multi-band view over a GRIB2 file.
//!
//! Every data section (section 7) in the file becomes one band, numbered from
//! 1 in file order. Repeated sections inside a message (submessages) share
//! the sections that came before them, per the GRIB2 repetition rules.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::sections::{
    self, read_u32, Bitmap, DataRepresentation, DataSection, GridDefinition, Identification,
    Indicator, ProductDefinition,
};
use crate::tables::{Grib2Tables, ParameterInfo};
use crate::unpacking::unpack_simple;
use crate::{Grib2Error, Result};

/// Scanning mode flag: points run from east to west.
pub const SCAN_I_NEGATIVE: u8 = 0x80;
/// Scanning mode flag: rows run from south to north.
pub const SCAN_J_POSITIVE: u8 = 0x40;
/// Scanning mode flag: consecutive points run along j.
pub const SCAN_J_CONSECUTIVE: u8 = 0x20;
/// Scanning mode flag: every other row is reversed.
pub const SCAN_BOUSTROPHEDON: u8 = 0x10;

/// One band (GRIB2 field) with the sections that define it.
#[derive(Debug, Clone)]
pub struct Grib2Message {
    /// 0-based message number in the file.
    pub message_index: usize,
    /// 0-based field number inside the message.
    pub submessage_index: usize,
    pub indicator: Indicator,
    pub identification: Identification,
    pub grid_definition: GridDefinition,
    pub product_definition: ProductDefinition,
    pub data_representation: DataRepresentation,
    pub bitmap: Option<Bitmap>,
    pub data_section: DataSection,
    /// Bytes of the whole enclosing message.
    raw: Bytes,
}

impl Grib2Message {
    /// (columns, rows) of the grid.
    pub fn dims(&self) -> (usize, usize) {
        self.grid_definition.dims()
    }

    pub fn scanning_mode(&self) -> u8 {
        self.grid_definition.scanning_mode
    }

    pub fn parameter(&self, tables: &Grib2Tables) -> ParameterInfo {
        tables.parameter(
            self.indicator.discipline,
            self.product_definition.parameter_category,
            self.product_definition.parameter_number,
        )
    }

    /// Level short name, e.g. `2-HTGL`.
    pub fn short_name(&self, tables: &Grib2Tables) -> String {
        let pd = &self.product_definition;
        tables.short_name(pd.level_type, pd.level_value)
    }

    /// Level description, e.g. `2[m] HTGL="Specified height level above ground"`.
    pub fn description(&self, tables: &Grib2Tables) -> String {
        let pd = &self.product_definition;
        tables.level_description(pd.level_type, pd.level_value)
    }

    /// Band metadata in the GRIB driver vocabulary.
    pub fn metadata(&self, tables: &Grib2Tables) -> BTreeMap<String, String> {
        let param = self.parameter(tables);
        let pd = &self.product_definition;
        let mut md = BTreeMap::new();

        md.insert("GRIB_ELEMENT".to_string(), param.element.clone());
        md.insert("GRIB_SHORT_NAME".to_string(), self.short_name(tables));
        md.insert("GRIB_UNIT".to_string(), param.bracketed_unit());
        md.insert("GRIB_COMMENT".to_string(), param.comment());
        md.insert(
            "GRIB_DISCIPLINE".to_string(),
            self.indicator.discipline.to_string(),
        );
        md.insert(
            "GRIB_PDS_TEMPLATE_NUMBERS".to_string(),
            format!("{} {} {}", pd.template_number, pd.parameter_category, pd.parameter_number),
        );
        md.insert(
            "GRIB_REF_TIME".to_string(),
            self.identification.reference_time.timestamp().to_string(),
        );
        if let Some(seconds) = pd.forecast_seconds() {
            md.insert("GRIB_FORECAST_SECONDS".to_string(), seconds.to_string());
            md.insert(
                "GRIB_VALID_TIME".to_string(),
                (self.identification.reference_time.timestamp() + seconds).to_string(),
            );
        }
        md.insert("description".to_string(), self.description(tables));
        md
    }

    /// Decoded values in scan order, `NaN` where the bitmap marks a point missing.
    pub fn values(&self) -> Result<Vec<f32>> {
        let (ni, nj) = self.dims();
        let num_points = self.grid_definition.num_data_points as usize;
        let dr = &self.data_representation;

        let values = match dr.template_number {
            0 => {
                let bitmap = self.bitmap.as_ref().map(|b| b.data.as_ref());
                unpack_simple(
                    &self.data_section.data,
                    num_points,
                    dr.bits_per_value,
                    dr.reference_value,
                    dr.binary_scale_factor,
                    dr.decimal_scale_factor,
                    bitmap,
                )?
            }
            other => {
                debug!(
                    template = other,
                    message = self.message_index,
                    "Delegating data representation template to grib crate"
                );
                self.decode_with_grib_crate()?
            }
        };

        if values.len() != num_points {
            return Err(Grib2Error::UnpackingError(format!(
                "decoded {} values, expected {}",
                values.len(),
                num_points
            )));
        }
        if ni * nj != num_points {
            warn!(ni, nj, num_points, "Grid dimensions disagree with point count");
        }
        Ok(values)
    }

    /// Decoded values reordered to rows north to south, columns west to east.
    pub fn values_north_up(&self) -> Result<(Vec<f32>, usize, usize)> {
        let (ni, nj) = self.dims();
        let raw = self.values()?;
        if ni * nj != raw.len() {
            return Err(Grib2Error::InvalidSection {
                section: 3,
                reason: format!("{}x{} grid but {} values", ni, nj, raw.len()),
            });
        }
        Ok((reorder_north_up(&raw, ni, nj, self.scanning_mode()), ni, nj))
    }

    fn decode_with_grib_crate(&self) -> Result<Vec<f32>> {
        let grib_file = grib::from_reader(Cursor::new(self.raw.to_vec()))
            .map_err(|e| Grib2Error::UnpackingError(format!("grib crate: {}", e)))?;

        for ((_, submessage), submsg) in grib_file.iter() {
            if submessage != self.submessage_index {
                continue;
            }
            let decoder = grib::Grib2SubmessageDecoder::from(submsg)
                .map_err(|e| Grib2Error::UnpackingError(format!("grib crate: {}", e)))?;
            let values = decoder
                .dispatch()
                .map_err(|e| Grib2Error::UnpackingError(format!("grib crate: {}", e)))?;
            return Ok(values.collect());
        }

        Err(Grib2Error::UnpackingError(format!(
            "submessage {} not found in message {}",
            self.submessage_index, self.message_index
        )))
    }
}

/// Reorder scan-order values into north-up, west-to-east rows.
pub fn reorder_north_up(raw: &[f32], ni: usize, nj: usize, scanning_mode: u8) -> Vec<f32> {
    let i_negative = scanning_mode & SCAN_I_NEGATIVE != 0;
    let j_positive = scanning_mode & SCAN_J_POSITIVE != 0;
    let transposed = scanning_mode & SCAN_J_CONSECUTIVE != 0;
    let boustrophedon = scanning_mode & SCAN_BOUSTROPHEDON != 0;

    if !i_negative && !j_positive && !transposed && !boustrophedon {
        return raw.to_vec();
    }

    let inner_len = if transposed { nj } else { ni };
    let mut out = vec![f32::NAN; ni * nj];

    for (k, &v) in raw.iter().enumerate() {
        let outer = k / inner_len;
        let mut inner = k % inner_len;
        if boustrophedon && outer % 2 == 1 {
            inner = inner_len - 1 - inner;
        }
        let (scan_row, scan_col) = if transposed { (inner, outer) } else { (outer, inner) };
        let col = if i_negative { ni - 1 - scan_col } else { scan_col };
        let row = if j_positive { nj - 1 - scan_row } else { scan_row };
        out[row * ni + col] = v;
    }
    out
}

/// A GRIB2 file opened as a list of bands.
#[derive(Debug, Clone)]
pub struct Grib2File {
    messages: Vec<Grib2Message>,
    tables: Grib2Tables,
}

impl Grib2File {
    /// Read and index a GRIB2 file from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::from_bytes(Bytes::from(data))
    }

    /// Index GRIB2 data already in memory, using the NCEP tables.
    pub fn from_bytes(data: Bytes) -> Result<Self> {
        Self::with_tables(data, Grib2Tables::ncep())
    }

    pub fn with_tables(data: Bytes, tables: Grib2Tables) -> Result<Self> {
        let mut messages = Vec::new();
        let mut offset = 0usize;
        let mut message_index = 0usize;

        while let Some(start) = find_magic(&data, offset) {
            let indicator = sections::parse_indicator(&data[start..])?;
            let length = indicator.message_length as usize;
            if length < 16 || start + length > data.len() {
                return Err(Grib2Error::InvalidFormat(format!(
                    "message {} at offset {} claims {} bytes, file has {}",
                    message_index,
                    start,
                    length,
                    data.len() - start
                )));
            }

            let raw = data.slice(start..start + length);
            messages.extend(parse_message(raw, indicator, message_index)?);
            offset = start + length;
            message_index += 1;
        }

        if messages.is_empty() {
            return Err(Grib2Error::InvalidFormat("no GRIB2 messages found".to_string()));
        }

        debug!(
            messages = message_index,
            bands = messages.len(),
            "Indexed GRIB2 data"
        );
        Ok(Self { messages, tables })
    }

    pub fn band_count(&self) -> usize {
        self.messages.len()
    }

    /// Band by 1-based index.
    pub fn band(&self, index: usize) -> Result<&Grib2Message> {
        if index == 0 || index > self.messages.len() {
            return Err(Grib2Error::BandOutOfRange {
                index,
                count: self.messages.len(),
            });
        }
        Ok(&self.messages[index - 1])
    }

    /// Bands with their 1-based indices.
    pub fn bands(&self) -> impl Iterator<Item = (usize, &Grib2Message)> {
        self.messages.iter().enumerate().map(|(i, m)| (i + 1, m))
    }

    pub fn tables(&self) -> &Grib2Tables {
        &self.tables
    }

    /// Metadata of a band by 1-based index.
    pub fn band_metadata(&self, index: usize) -> Result<BTreeMap<String, String>> {
        Ok(self.band(index)?.metadata(&self.tables))
    }
}

fn find_magic(data: &[u8], from: usize) -> Option<usize> {
    if from >= data.len() {
        return None;
    }
    data[from..]
        .windows(4)
        .position(|w| w == b"GRIB")
        .map(|p| from + p)
}

/// Walk the sections of one message, emitting a band at every section 7.
fn parse_message(raw: Bytes, indicator: Indicator, message_index: usize) -> Result<Vec<Grib2Message>> {
    let mut fields = Vec::new();
    let mut pos = 16usize;

    let mut identification: Option<Identification> = None;
    let mut grid: Option<GridDefinition> = None;
    let mut product: Option<ProductDefinition> = None;
    let mut representation: Option<DataRepresentation> = None;
    let mut bitmap: Option<Bitmap> = None;
    let mut last_defined_bitmap: Option<Bitmap> = None;

    while pos + 4 <= raw.len() {
        if &raw[pos..pos + 4] == b"7777" {
            break;
        }
        if pos + 5 > raw.len() {
            return Err(Grib2Error::InvalidFormat(format!(
                "truncated section header at offset {}",
                pos
            )));
        }

        let length = read_u32(&raw, pos) as usize;
        let number = raw[pos + 4];
        if length < 5 || pos + length > raw.len() {
            return Err(Grib2Error::InvalidSection {
                section: number,
                reason: format!("length {} at offset {} overruns message", length, pos),
            });
        }
        let section = &raw[pos..pos + length];

        match number {
            1 => identification = Some(sections::parse_identification(section)?),
            2 => {}
            3 => grid = Some(sections::parse_grid_definition(section)?),
            4 => product = Some(sections::parse_product_definition(section)?),
            5 => representation = Some(sections::parse_data_representation(section)?),
            6 => {
                let parsed = sections::parse_bitmap(section)?;
                bitmap = match parsed.indicator {
                    0 => {
                        last_defined_bitmap = Some(parsed.clone());
                        Some(parsed)
                    }
                    254 => Some(last_defined_bitmap.clone().ok_or_else(|| {
                        Grib2Error::InvalidSection {
                            section: 6,
                            reason: "indicator 254 with no earlier bitmap".to_string(),
                        }
                    })?),
                    255 => None,
                    other => {
                        return Err(Grib2Error::InvalidSection {
                            section: 6,
                            reason: format!("predefined bitmap {} not supported", other),
                        })
                    }
                };
            }
            7 => {
                let field = fields.len();
                let missing = |section: u8| Grib2Error::MissingSection { section, field };
                fields.push(Grib2Message {
                    message_index,
                    submessage_index: field,
                    indicator: indicator.clone(),
                    identification: identification.clone().ok_or_else(|| missing(1))?,
                    grid_definition: grid.clone().ok_or_else(|| missing(3))?,
                    product_definition: product.clone().ok_or_else(|| missing(4))?,
                    data_representation: representation.clone().ok_or_else(|| missing(5))?,
                    bitmap: bitmap.clone(),
                    data_section: sections::parse_data_section(section)?,
                    raw: raw.clone(),
                });
            }
            other => {
                return Err(Grib2Error::InvalidSection {
                    section: other,
                    reason: "unknown section number".to_string(),
                })
            }
        }

        pos += length;
    }

    Ok(fields)
}
