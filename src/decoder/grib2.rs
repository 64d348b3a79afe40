//! Minimal GRIB2 adapter for the [`Decoder`] interface.
//!
//! Walks the section structure of edition 2 messages to expose the index
//! metadata and unpacks simple-packed data (template 5.0) with an optional
//! bitmap. Product definition templates 4.0, 4.1, 4.8 and 4.11 are
//! understood; keys belonging to other templates read as absent. Only the
//! first field of a multi-field message is considered.

use super::{Decoder, MessageStream, RawMessage};
use crate::constants::{MISSING_VALUE, SURFACE_ISOBARIC, keys};
use crate::error::{GridCheckError, Result};
use std::fs::File;
use std::io::{BufReader, Read};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::debug;

const MAGIC: &[u8; 4] = b"GRIB";
const END_MARKER: &[u8; 4] = b"7777";
const INDICATOR_LENGTH: usize = 16;

/// Decoder for GRIB edition 2 files
#[derive(Debug, Default, Clone, Copy)]
pub struct Grib2Decoder;

impl Grib2Decoder {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for Grib2Decoder {
    fn open(&self, path: &Path) -> Result<MessageStream> {
        let file = File::open(path).map_err(|source| GridCheckError::FileOpen {
            path: path.to_path_buf(),
            source,
        })?;

        let file_length = file.metadata()?.len();

        Ok(Box::new(Grib2Stream {
            reader: BufReader::new(file),
            path: path.to_path_buf(),
            file_length,
            offset: 0,
            finished: false,
        }))
    }

    fn parse(&self, bytes: Vec<u8>) -> Result<Box<dyn RawMessage>> {
        let message = Grib2Message::from_bytes(bytes).map_err(GridCheckError::decode)?;
        Ok(Box::new(message))
    }
}

/// Sequential reader over the messages of one file
struct Grib2Stream {
    reader: BufReader<File>,
    path: PathBuf,
    file_length: u64,
    offset: u64,
    finished: bool,
}

impl Grib2Stream {
    fn invalid(&mut self, reason: impl Into<String>) -> Option<Result<Box<dyn RawMessage>>> {
        self.finished = true;
        Some(Err(GridCheckError::InvalidMessage {
            path: self.path.clone(),
            offset: self.offset,
            reason: reason.into(),
        }))
    }

    /// Fill `buf` completely; `Ok(false)` on a clean end of file before the first byte
    fn read_indicator(&mut self, buf: &mut [u8]) -> std::io::Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.reader.read(&mut buf[filled..])?;
            if n == 0 {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "truncated indicator section",
                ));
            }
            filled += n;
        }
        Ok(true)
    }
}

impl Iterator for Grib2Stream {
    type Item = Result<Box<dyn RawMessage>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut indicator = [0u8; INDICATOR_LENGTH];
        match self.read_indicator(&mut indicator) {
            Ok(true) => {}
            Ok(false) => {
                self.finished = true;
                return None;
            }
            Err(e) => return self.invalid(e.to_string()),
        }

        if &indicator[..4] != MAGIC {
            return self.invalid("missing 'GRIB' marker");
        }
        if indicator[7] != 2 {
            return self.invalid(format!("unsupported GRIB edition {}", indicator[7]));
        }

        let total_length = u64::from_be_bytes(indicator[8..16].try_into().unwrap_or([0; 8]));
        if total_length < (INDICATOR_LENGTH + END_MARKER.len()) as u64 {
            return self.invalid(format!("implausible message length {total_length}"));
        }
        let remaining = self.file_length.saturating_sub(self.offset);
        if total_length > remaining {
            return self.invalid(format!(
                "message length {total_length} exceeds the {remaining} bytes left in the file"
            ));
        }

        let mut bytes = vec![0u8; total_length as usize];
        bytes[..INDICATOR_LENGTH].copy_from_slice(&indicator);
        if let Err(e) = self.reader.read_exact(&mut bytes[INDICATOR_LENGTH..]) {
            return self.invalid(format!("truncated message: {e}"));
        }

        let message = match Grib2Message::from_bytes(bytes) {
            Ok(message) => message,
            Err(reason) => return self.invalid(reason),
        };
        self.offset += total_length;

        Some(Ok(Box::new(message)))
    }
}

/// Byte ranges of the sections of the first field in a message
#[derive(Debug, Default, Clone)]
struct Sections {
    identification: Option<Range<usize>>,
    grid: Option<Range<usize>>,
    product: Option<Range<usize>>,
    representation: Option<Range<usize>>,
    bitmap: Option<Range<usize>>,
    data: Option<Range<usize>>,
}

/// A single GRIB2 message held in memory
#[derive(Debug, Clone)]
pub struct Grib2Message {
    bytes: Vec<u8>,
    sections: Sections,
}

impl Grib2Message {
    /// Wrap raw message bytes
    ///
    /// Only the indicator section must be intact; damaged later sections
    /// leave their keys absent.
    pub fn from_bytes(bytes: Vec<u8>) -> std::result::Result<Self, String> {
        if bytes.len() < INDICATOR_LENGTH || &bytes[..4] != MAGIC {
            return Err("missing 'GRIB' marker".to_string());
        }
        if bytes[7] != 2 {
            return Err(format!("unsupported GRIB edition {}", bytes[7]));
        }

        let sections = walk_sections(&bytes);
        Ok(Self { bytes, sections })
    }

    fn octet(&self, section: &Option<Range<usize>>, octet: usize) -> Option<u8> {
        self.octets(section, octet, 1).map(|b| b[0])
    }

    /// `len` bytes starting at 1-based `octet` of a section
    fn octets(&self, section: &Option<Range<usize>>, octet: usize, len: usize) -> Option<&[u8]> {
        let range = section.as_ref()?;
        let start = range.start + octet - 1;
        let end = start + len;
        if end > range.end {
            return None;
        }
        self.bytes.get(start..end)
    }

    fn unsigned(&self, section: &Option<Range<usize>>, octet: usize, len: usize) -> Option<u64> {
        let raw = self.octets(section, octet, len)?;
        Some(raw.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    /// Sign-and-magnitude integer as used throughout GRIB2
    fn signed(&self, section: &Option<Range<usize>>, octet: usize, len: usize) -> Option<i64> {
        let raw = self.unsigned(section, octet, len)?;
        Some(sign_magnitude(raw, len))
    }

    fn product_template(&self) -> Option<u64> {
        self.unsigned(&self.sections.product, 8, 2)
    }

    fn discipline(&self) -> i64 {
        i64::from(self.bytes[6])
    }

    fn data_date(&self) -> Option<i64> {
        let year = self.unsigned(&self.sections.identification, 13, 2)? as i64;
        let month = i64::from(self.octet(&self.sections.identification, 15)?);
        let day = i64::from(self.octet(&self.sections.identification, 16)?);
        Some(year * 10_000 + month * 100 + day)
    }

    fn data_time(&self) -> Option<i64> {
        let hour = i64::from(self.octet(&self.sections.identification, 17)?);
        let minute = i64::from(self.octet(&self.sections.identification, 18)?);
        Some(hour * 100 + minute)
    }

    fn perturbation_number(&self) -> Option<i64> {
        match self.product_template()? {
            1 | 11 => self.octet(&self.sections.product, 36).map(i64::from),
            _ => None,
        }
    }

    fn statistical_processing(&self) -> Option<i64> {
        let octet = match self.product_template()? {
            8 => 47,
            11 => 50,
            _ => return None,
        };
        self.octet(&self.sections.product, octet).map(i64::from)
    }

    fn forecast_time_seconds(&self) -> Option<i64> {
        let unit = self.octet(&self.sections.product, 18)?;
        let value = self.unsigned(&self.sections.product, 19, 4)? as i64;
        Some(value * unit_seconds(unit)?)
    }

    /// End of the forecast interval in hours
    fn end_step(&self) -> Option<i64> {
        if !matches!(self.product_template()?, 0 | 1 | 8 | 11) {
            return None;
        }
        let mut seconds = self.forecast_time_seconds()?;
        let range_octet = match self.product_template()? {
            8 => Some(49),
            11 => Some(52),
            _ => None,
        };
        if let Some(octet) = range_octet {
            let unit = self.octet(&self.sections.product, octet)?;
            let length = self.unsigned(&self.sections.product, octet + 1, 4)? as i64;
            seconds += length * unit_seconds(unit)?;
        }
        Some(seconds / 3600)
    }

    fn level(&self) -> Option<i64> {
        if !matches!(self.product_template()?, 0 | 1 | 8 | 11) {
            return None;
        }
        let surface = self.octet(&self.sections.product, 23)?;
        let scale = self.octet(&self.sections.product, 24)?;
        let raw = self.unsigned(&self.sections.product, 25, 4)?;
        if scale == 0xFF || raw == 0xFFFF_FFFF {
            return Some(0);
        }
        let value = sign_magnitude(raw, 4) as f64 / 10f64.powi(sign_magnitude(u64::from(scale), 1) as i32);
        let value = if i64::from(surface) == SURFACE_ISOBARIC {
            value / 100.0
        } else {
            value
        };
        Some(value.round() as i64)
    }

    fn template_octet(&self, octet: usize) -> Option<i64> {
        if !matches!(self.product_template()?, 0 | 1 | 8 | 11) {
            return None;
        }
        self.octet(&self.sections.product, octet).map(i64::from)
    }

    fn point_count(&self) -> Option<usize> {
        self.unsigned(&self.sections.grid, 7, 4)
            .or_else(|| self.unsigned(&self.sections.representation, 6, 4))
            .map(|n| n as usize)
    }
}

impl RawMessage for Grib2Message {
    fn scalar(&self, key: &str) -> Option<i64> {
        match key {
            keys::DISCIPLINE => Some(self.discipline()),
            keys::TYPE_OF_PROCESSED_DATA => self
                .octet(&self.sections.identification, 21)
                .map(i64::from),
            keys::PARAMETER_CATEGORY => self.template_octet(10),
            keys::PARAMETER_NUMBER => self.template_octet(11),
            keys::TYPE_OF_FIRST_FIXED_SURFACE => self.template_octet(23),
            keys::LEVEL => self.level(),
            keys::TYPE_OF_STATISTICAL_PROCESSING => self.statistical_processing(),
            keys::END_STEP => self.end_step(),
            keys::FORECAST_TIME => self.forecast_time_seconds().map(|s| s / 3600),
            keys::PERTURBATION_NUMBER => self.perturbation_number(),
            keys::DATA_DATE => self.data_date(),
            keys::DATA_TIME => self.data_time(),
            _ => None,
        }
    }

    fn values(&self) -> Result<Vec<f64>> {
        let template = self
            .unsigned(&self.sections.representation, 10, 2)
            .ok_or_else(|| GridCheckError::decode("missing data representation section"))?;
        if template != 0 {
            return Err(GridCheckError::decode(format!(
                "unsupported data representation template 5.{template}"
            )));
        }

        let section = &self.sections.representation;
        let reference = self
            .octets(section, 12, 4)
            .map(|b| f32::from_be_bytes([b[0], b[1], b[2], b[3]]) as f64)
            .ok_or_else(|| GridCheckError::decode("truncated data representation section"))?;
        let binary_scale = self.signed(section, 16, 2).unwrap_or(0) as i32;
        let decimal_scale = self.signed(section, 18, 2).unwrap_or(0) as i32;
        let bits = self.octet(section, 20).unwrap_or(0) as usize;
        if bits > 64 {
            return Err(GridCheckError::decode(format!("{bits} bits per value")));
        }

        let points = self
            .point_count()
            .ok_or_else(|| GridCheckError::decode("unknown number of grid points"))?;
        let data = self
            .sections
            .data
            .as_ref()
            .and_then(|r| self.bytes.get(r.start + 5..r.end))
            .ok_or_else(|| GridCheckError::decode("missing data section"))?;

        let bitmap = match self.octet(&self.sections.bitmap, 6) {
            None | Some(255) => None,
            Some(0) => self
                .sections
                .bitmap
                .as_ref()
                .and_then(|r| self.bytes.get(r.start + 6..r.end)),
            Some(indicator) => {
                return Err(GridCheckError::decode(format!(
                    "unsupported bitmap indicator {indicator}"
                )));
            }
        };

        let binary_factor = 2f64.powi(binary_scale);
        let decimal_factor = 10f64.powi(-decimal_scale);

        let mut values = Vec::with_capacity(points);
        let mut packed_index = 0usize;
        for point in 0..points {
            if let Some(bitmap) = bitmap {
                let present = read_bits(bitmap, point, 1)
                    .ok_or_else(|| GridCheckError::decode("truncated bitmap"))?;
                if present == 0 {
                    values.push(MISSING_VALUE);
                    continue;
                }
            }

            let packed = if bits == 0 {
                0
            } else {
                read_bits(data, packed_index, bits)
                    .ok_or_else(|| GridCheckError::decode("truncated data section"))?
            };
            packed_index += 1;
            values.push((reference + packed as f64 * binary_factor) * decimal_factor);
        }

        Ok(values)
    }

    fn total_length(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Locate sections 1-7 of the first field, tolerating damaged tails
fn walk_sections(bytes: &[u8]) -> Sections {
    let mut sections = Sections::default();
    let mut pos = INDICATOR_LENGTH;

    while pos + 5 <= bytes.len() {
        if &bytes[pos..pos + 4] == END_MARKER {
            break;
        }
        let length = u32::from_be_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
            as usize;
        let number = bytes[pos + 4];
        if length < 5 || pos + length > bytes.len() {
            debug!("Damaged section {} at byte {}", number, pos);
            break;
        }

        let range = Some(pos..pos + length);
        let slot = match number {
            1 => &mut sections.identification,
            3 => &mut sections.grid,
            4 => &mut sections.product,
            5 => &mut sections.representation,
            6 => &mut sections.bitmap,
            7 => &mut sections.data,
            _ => {
                pos += length;
                continue;
            }
        };
        if slot.is_none() {
            *slot = range;
        }
        if number == 7 {
            break;
        }
        pos += length;
    }

    sections
}

/// Code table 4.4 unit of time in seconds
fn unit_seconds(unit: u8) -> Option<i64> {
    match unit {
        0 => Some(60),
        1 => Some(3600),
        2 => Some(86_400),
        10 => Some(3 * 3600),
        11 => Some(6 * 3600),
        12 => Some(12 * 3600),
        13 => Some(1),
        _ => None,
    }
}

fn sign_magnitude(raw: u64, len: usize) -> i64 {
    let sign_bit = 1u64 << (len * 8 - 1);
    let magnitude = (raw & (sign_bit - 1)) as i64;
    if raw & sign_bit != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Read `nbits` big-endian bits starting at element `index` of width `nbits`
fn read_bits(data: &[u8], index: usize, nbits: usize) -> Option<u64> {
    let start = index * nbits;
    let mut value = 0u64;
    for i in 0..nbits {
        let bit = start + i;
        let byte = *data.get(bit / 8)?;
        value = (value << 1) | u64::from((byte >> (7 - bit % 8)) & 1);
    }
    Some(value)
}
