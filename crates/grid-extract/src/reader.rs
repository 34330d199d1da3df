//! Source access traits and raw-value unpacking.
//!
//! Reading strategies see sources through two small traits: an
//! [`ArrayReader`] opens a source by location, and the resulting
//! [`ArraySource`] serves rectangular slices of one variable. Backends
//! (file formats, object stores, test fixtures) live behind these
//! traits; the extraction path never names a format.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by source backends.
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("source not found: {0}")]
    NotFound(String),

    #[error("variable {variable} not present in {location}")]
    MissingVariable { variable: String, location: String },

    #[error("requested slice out of range: {0}")]
    SliceOutOfRange(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReadError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Opens sources by location string.
pub trait ArrayReader: Send + Sync {
    fn open(&self, location: &str) -> Result<Box<dyn ArraySource + '_>, ReadError>;
}

/// One opened source. Slices are addressed by inclusive index ranges
/// per dimension; the source is closed by dropping it, so every exit
/// path from a strategy releases it.
pub trait ArraySource {
    /// Read a rectangular slab of raw (packed) values for one variable
    /// at fixed time and vertical indices. Values come back row-major,
    /// rows ascending then columns ascending, as f64 before unpacking.
    fn read_slab(
        &mut self,
        variable: &str,
        t_index: Option<usize>,
        z_index: Option<usize>,
        j_range: RangeInclusive<usize>,
        i_range: RangeInclusive<usize>,
    ) -> Result<Vec<f64>, ReadError>;
}

/// Packing and validity attributes of one variable, as declared by the
/// source's metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariableSpec {
    pub name: String,
    /// Raw value that marks a missing datum.
    #[serde(default)]
    pub missing_value: Option<f64>,
    /// Inclusive raw-value validity range.
    #[serde(default)]
    pub valid_range: Option<(f64, f64)>,
    /// Display = `add_offset + raw * scale_factor`.
    #[serde(default = "default_scale")]
    pub scale_factor: f64,
    #[serde(default)]
    pub add_offset: f64,
}

fn default_scale() -> f64 {
    1.0
}

impl VariableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            missing_value: None,
            valid_range: None,
            scale_factor: 1.0,
            add_offset: 0.0,
        }
    }

    pub fn with_missing_value(mut self, v: f64) -> Self {
        self.missing_value = Some(v);
        self
    }

    pub fn with_valid_range(mut self, lo: f64, hi: f64) -> Self {
        self.valid_range = Some((lo, hi));
        self
    }

    pub fn with_packing(mut self, scale_factor: f64, add_offset: f64) -> Self {
        self.scale_factor = scale_factor;
        self.add_offset = add_offset;
        self
    }

    /// Turn one raw value into a display value. Missing-value and
    /// valid-range tests run against the raw value, before packing is
    /// undone; invalid data comes back as NaN.
    pub fn unpack(&self, raw: f64) -> f32 {
        if raw.is_nan() {
            return f32::NAN;
        }
        if let Some(mv) = self.missing_value {
            if raw == mv {
                return f32::NAN;
            }
        }
        if let Some((lo, hi)) = self.valid_range {
            if raw < lo || raw > hi {
                return f32::NAN;
            }
        }
        (self.add_offset + raw * self.scale_factor) as f32
    }
}
