//! Test-only GRIB2 writer used to build fixture files
//!
//! Produces edition 2 messages with product definition templates 4.0, 4.1,
//! 4.8 or 4.11 and simple packing (template 5.0) at 24 bits per value with
//! two decimal digits kept. Masked points go through a section 6 bitmap.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

const BITS_PER_VALUE: u32 = 24;
const DECIMAL_SCALE: i32 = 2;

/// One forecast field to be written as a GRIB2 message
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub discipline: u8,
    pub category: u8,
    pub number: u8,
    pub processed_data: u8,
    pub surface: u8,
    pub level: u32,
    pub forecast_hours: u32,
    /// Statistical processing type and interval length in hours
    pub statistics: Option<(u8, u32)>,
    pub perturbation: Option<u8>,
    /// Analysis time as (year, month, day, hour)
    pub analysis: (u16, u8, u8, u8),
    /// Data representation template number written to section 5
    pub representation: u16,
    pub values: Vec<Option<f64>>,
}

impl FieldSpec {
    pub fn new(discipline: u8, category: u8, number: u8, values: Vec<Option<f64>>) -> Self {
        Self {
            discipline,
            category,
            number,
            processed_data: 1,
            surface: 103,
            level: 0,
            forecast_hours: 0,
            statistics: None,
            perturbation: None,
            analysis: (2024, 7, 15, 0),
            representation: 0,
            values,
        }
    }

    pub fn surface(mut self, surface: u8, level: u32) -> Self {
        self.surface = surface;
        self.level = level;
        self
    }

    pub fn step(mut self, hours: u32) -> Self {
        self.forecast_hours = hours;
        self
    }

    /// Accumulation-style field covering `[0, hours]`
    pub fn accumulated(mut self, kind: u8, hours: u32) -> Self {
        self.forecast_hours = 0;
        self.statistics = Some((kind, hours));
        self
    }

    pub fn member(mut self, processed_data: u8, perturbation: u8) -> Self {
        self.processed_data = processed_data;
        self.perturbation = Some(perturbation);
        self
    }

    /// Label the data section with another packing scheme
    pub fn packing(mut self, template: u16) -> Self {
        self.representation = template;
        self
    }

    fn template(&self) -> u16 {
        match (self.perturbation.is_some(), self.statistics.is_some()) {
            (false, false) => 0,
            (true, false) => 1,
            (false, true) => 8,
            (true, true) => 11,
        }
    }
}

fn section(number: u8, body: &[u8]) -> Vec<u8> {
    let mut out = ((body.len() + 5) as u32).to_be_bytes().to_vec();
    out.push(number);
    out.extend_from_slice(body);
    out
}

fn identification(spec: &FieldSpec) -> Vec<u8> {
    let (year, month, day, hour) = spec.analysis;
    let mut body = vec![0, 98, 0, 0, 2, 0, 1];
    body.extend_from_slice(&year.to_be_bytes());
    body.extend_from_slice(&[month, day, hour, 0, 0, 0, spec.processed_data]);
    body
}

fn grid(points: usize) -> Vec<u8> {
    let mut body = vec![0];
    body.extend_from_slice(&(points as u32).to_be_bytes());
    body.extend_from_slice(&[0, 0, 0, 0]);
    body
}

/// End of the overall time interval followed by a single time range
fn interval(spec: &FieldSpec, kind: u8, hours: u32) -> Vec<u8> {
    let (year, month, day, hour) = spec.analysis;
    let end_hour = u32::from(hour) + hours;
    let mut body = year.to_be_bytes().to_vec();
    body.extend_from_slice(&[
        month,
        day + (end_hour / 24) as u8,
        (end_hour % 24) as u8,
        0,
        0,
    ]);
    body.push(1);
    body.extend_from_slice(&0u32.to_be_bytes());
    body.extend_from_slice(&[kind, 2, 1]);
    body.extend_from_slice(&hours.to_be_bytes());
    body.push(1);
    body.extend_from_slice(&0u32.to_be_bytes());
    body
}

fn product(spec: &FieldSpec) -> Vec<u8> {
    let mut body = vec![0, 0];
    body.extend_from_slice(&spec.template().to_be_bytes());
    body.extend_from_slice(&[spec.category, spec.number, 2, 0, 0, 0, 0, 0, 1]);
    body.extend_from_slice(&spec.forecast_hours.to_be_bytes());
    body.extend_from_slice(&[spec.surface, 0]);
    body.extend_from_slice(&spec.level.to_be_bytes());
    body.extend_from_slice(&[255, 0, 0, 0, 0, 0]);

    if let Some(member) = spec.perturbation {
        body.extend_from_slice(&[3, member, 10]);
    }
    if let Some((kind, hours)) = spec.statistics {
        body.extend(interval(spec, kind, hours));
    }
    body
}

fn write_bits(out: &mut Vec<u8>, index: usize, value: u64) {
    let start = index * BITS_PER_VALUE as usize;
    for i in 0..BITS_PER_VALUE as usize {
        let bit = start + i;
        if out.len() <= bit / 8 {
            out.resize(bit / 8 + 1, 0);
        }
        if (value >> (BITS_PER_VALUE as usize - 1 - i)) & 1 == 1 {
            out[bit / 8] |= 0x80 >> (bit % 8);
        }
    }
}

fn sign_magnitude(value: i32) -> [u8; 2] {
    let magnitude = value.unsigned_abs() as u16;
    let raw = if value < 0 { magnitude | 0x8000 } else { magnitude };
    raw.to_be_bytes()
}

/// Encode a single field as a complete GRIB2 message
pub fn encode(spec: &FieldSpec) -> Vec<u8> {
    let factor = 10f64.powi(DECIMAL_SCALE);
    let scaled: Vec<i64> = spec
        .values
        .iter()
        .flatten()
        .map(|v| (v * factor).round() as i64)
        .collect();
    let reference = scaled.iter().copied().min().unwrap_or(0);

    let mut representation = (scaled.len() as u32).to_be_bytes().to_vec();
    representation.extend_from_slice(&spec.representation.to_be_bytes());
    representation.extend_from_slice(&(reference as f32).to_be_bytes());
    representation.extend_from_slice(&sign_magnitude(0));
    representation.extend_from_slice(&sign_magnitude(DECIMAL_SCALE));
    representation.extend_from_slice(&[BITS_PER_VALUE as u8, 0]);

    let bitmap = if spec.values.iter().any(Option::is_none) {
        let mut body = vec![0u8; 1 + spec.values.len().div_ceil(8)];
        for (i, value) in spec.values.iter().enumerate() {
            if value.is_some() {
                body[1 + i / 8] |= 0x80 >> (i % 8);
            }
        }
        body
    } else {
        vec![255]
    };

    let mut data = Vec::new();
    for (i, value) in scaled.iter().enumerate() {
        write_bits(&mut data, i, (value - reference) as u64);
    }

    let mut body = Vec::new();
    body.extend(section(1, &identification(spec)));
    body.extend(section(3, &grid(spec.values.len())));
    body.extend(section(4, &product(spec)));
    body.extend(section(5, &representation));
    body.extend(section(6, &bitmap));
    body.extend(section(7, &data));
    body.extend_from_slice(b"7777");

    let total = (16 + body.len()) as u64;
    let mut out = b"GRIB".to_vec();
    out.extend_from_slice(&[0, 0, spec.discipline, 2]);
    out.extend_from_slice(&total.to_be_bytes());
    out.extend(body);
    out
}

/// Write all fields into one file, in order
pub fn write_grib(dir: &Path, name: &str, fields: &[FieldSpec]) -> PathBuf {
    let path = dir.join(name);
    let bytes: Vec<u8> = fields.iter().flat_map(encode).collect();
    fs::write(&path, bytes).expect("write fixture");
    path
}

/// Write a YAML file next to the fixtures
pub fn write_yaml(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, text).expect("write configuration");
    path
}

/// `n` grid values spread evenly over `[low, high]`
pub fn ramp(n: usize, low: f64, high: f64) -> Vec<Option<f64>> {
    (0..n)
        .map(|i| {
            let t = if n > 1 { i as f64 / (n - 1) as f64 } else { 0.0 };
            Some(((low + t * (high - low)) * 100.0).round() / 100.0)
        })
        .collect()
}
