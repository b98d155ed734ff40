//! Table metadata.
//!
//! Every field except the photon count describes *what* was tabulated and
//! must agree before two tables can be stacked.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use super::error::{Result, TableError};

/// Group refractive index of deep glacial ice.
pub const N_ICE_GROUP: f64 = 1.35634;
/// Phase refractive index of deep glacial ice.
pub const N_ICE_PHASE: f64 = 1.3195;

/// Particle type code for an electron (electromagnetic cascade).
pub const PARTICLE_E_MINUS: i32 = 11;

/// Set of efficiency corrections already folded into a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Efficiency(u32);

impl Efficiency {
    pub const NONE: Efficiency = Efficiency(0x00);
    pub const RECEIVER: Efficiency = Efficiency(0x01);
    pub const SHADING: Efficiency = Efficiency(0x02);
    pub const WAVELENGTH: Efficiency = Efficiency(0x04);
    pub const N_PHOTON: Efficiency = Efficiency(0x08);
    pub const ALL: Efficiency = Efficiency(0x0F);

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Efficiency) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Efficiency) {
        self.0 |= other.0;
    }
}

impl BitOr for Efficiency {
    type Output = Self;
    fn bitor(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOrAssign for Efficiency {
    fn bitor_assign(&mut self, other: Self) {
        self.insert(other);
    }
}

/// Coordinate system of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Geometry {
    #[default]
    Spherical,
    Cylindrical,
    Cubic,
}

impl Geometry {
    pub fn code(self) -> i64 {
        match self {
            Geometry::Spherical => 1,
            Geometry::Cylindrical => 2,
            Geometry::Cubic => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Geometry::Spherical),
            2 => Some(Geometry::Cylindrical),
            3 => Some(Geometry::Cubic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    Even,
    Odd,
}

impl Parity {
    pub fn code(self) -> i64 {
        match self {
            Parity::Even => 0,
            Parity::Odd => 1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Parity::Even),
            1 => Some(Parity::Odd),
            _ => None,
        }
    }
}

/// A single scalar header entry as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl HeaderValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HeaderValue::Int(i) => Some(*i as f64),
            HeaderValue::Float(f) => Some(*f),
            HeaderValue::Str(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HeaderValue::Int(i) => Some(*i),
            HeaderValue::Float(f) if f.fract() == 0. => Some(*f as i64),
            _ => None,
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Int(i) => write!(f, "{i}"),
            HeaderValue::Float(x) => write!(f, "{x}"),
            HeaderValue::Str(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Header {
    /// Sum of weights of the photons that went into the table.
    pub n_photons: f64,
    pub efficiency: Efficiency,
    pub geometry: Geometry,
    pub parity: Parity,
    /// Source zenith angle (degrees).
    pub zenith: f64,
    /// Source depth (m).
    pub z: f64,
    /// Source energy (GeV).
    pub energy: f64,
    #[serde(rename = "type")]
    pub particle_type: i32,
    pub level: i32,
    pub n_group: f64,
    pub n_phase: f64,
    /// Source-specific fields, e.g. flasher width and brightness.
    pub extra: BTreeMap<String, HeaderValue>,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            n_photons: 0.,
            efficiency: Efficiency::NONE,
            geometry: Geometry::Spherical,
            parity: Parity::Even,
            zenith: 0.,
            z: 0.,
            energy: 0.,
            particle_type: 0,
            level: 1,
            n_group: N_ICE_GROUP,
            n_phase: N_ICE_PHASE,
            extra: BTreeMap::new(),
        }
    }
}

impl Header {
    /// Header of an electromagnetic cascade table.
    pub fn for_cascade(zenith_deg: f64, z: f64, energy: f64, n_group: f64, n_phase: f64) -> Self {
        Self {
            efficiency: Efficiency::RECEIVER | Efficiency::WAVELENGTH,
            zenith: zenith_deg,
            z,
            energy,
            particle_type: PARTICLE_E_MINUS,
            n_group,
            n_phase,
            ..Self::default()
        }
    }

    /// Header of an LED flasher table.
    pub fn for_flasher(
        zenith_deg: f64,
        z: f64,
        n_group: f64,
        n_phase: f64,
        width: i64,
        brightness: i64,
    ) -> Self {
        let mut header = Self::for_cascade(zenith_deg, z, 0., n_group, n_phase);
        header
            .extra
            .insert("flasherwidth".to_string(), HeaderValue::Int(width));
        header
            .extra
            .insert("flasherbrightness".to_string(), HeaderValue::Int(brightness));
        header
    }

    /// Lower-case `(key, value)` pairs in storage order.
    pub fn to_records(&self) -> Vec<(String, HeaderValue)> {
        let mut records = vec![
            ("n_photons".to_string(), HeaderValue::Float(self.n_photons)),
            (
                "efficiency".to_string(),
                HeaderValue::Int(self.efficiency.bits() as i64),
            ),
            ("geometry".to_string(), HeaderValue::Int(self.geometry.code())),
            ("parity".to_string(), HeaderValue::Int(self.parity.code())),
            ("zenith".to_string(), HeaderValue::Float(self.zenith)),
            ("z".to_string(), HeaderValue::Float(self.z)),
            ("energy".to_string(), HeaderValue::Float(self.energy)),
            (
                "type".to_string(),
                HeaderValue::Int(self.particle_type as i64),
            ),
            ("level".to_string(), HeaderValue::Int(self.level as i64)),
            ("n_group".to_string(), HeaderValue::Float(self.n_group)),
            ("n_phase".to_string(), HeaderValue::Float(self.n_phase)),
        ];
        records.extend(self.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        records
    }

    /// Rebuilds a header from `(key, value)` pairs.
    ///
    /// Keys are matched case-insensitively. Missing standard keys keep their
    /// default, unknown keys are kept in [`Header::extra`].
    pub fn from_records<I>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, HeaderValue)>,
    {
        let mut header = Self::default();
        for (key, value) in records {
            let key = key.to_lowercase();
            match key.as_str() {
                "n_photons" => header.n_photons = float_field(&key, &value)?,
                "efficiency" => {
                    header.efficiency = Efficiency::from_bits(int_field(&key, &value)? as u32)
                }
                "geometry" => {
                    let code = int_field(&key, &value)?;
                    header.geometry = Geometry::from_code(code).ok_or_else(|| {
                        TableError::Format(format!("unknown geometry code {code}"))
                    })?;
                }
                "parity" => {
                    let code = int_field(&key, &value)?;
                    header.parity = Parity::from_code(code)
                        .ok_or_else(|| TableError::Format(format!("unknown parity code {code}")))?;
                }
                "zenith" => header.zenith = float_field(&key, &value)?,
                "z" => header.z = float_field(&key, &value)?,
                "energy" => header.energy = float_field(&key, &value)?,
                "type" => header.particle_type = int_field(&key, &value)? as i32,
                "level" => header.level = int_field(&key, &value)? as i32,
                "n_group" => header.n_group = float_field(&key, &value)?,
                "n_phase" => header.n_phase = float_field(&key, &value)?,
                _ => {
                    header.extra.insert(key, value);
                }
            }
        }
        Ok(header)
    }

    /// Checks that every field except the photon count matches.
    pub fn check_compatible(&self, other: &Header) -> Result<()> {
        let ours: BTreeMap<String, HeaderValue> = self.to_records().into_iter().collect();
        let theirs: BTreeMap<String, HeaderValue> = other.to_records().into_iter().collect();

        let keys = ours.keys().chain(theirs.keys().filter(|k| !ours.contains_key(*k)));
        for key in keys {
            if key == "n_photons" {
                continue;
            }
            let (a, b) = (ours.get(key), theirs.get(key));
            if a != b {
                let show = |v: Option<&HeaderValue>| {
                    v.map_or_else(|| "<missing>".to_string(), |v| v.to_string())
                };
                return Err(TableError::HeaderMismatch {
                    key: key.clone(),
                    ours: show(a),
                    theirs: show(b),
                });
            }
        }
        Ok(())
    }
}

fn float_field(key: &str, value: &HeaderValue) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| TableError::Format(format!("header key '{key}' is not numeric: {value}")))
}

fn int_field(key: &str, value: &HeaderValue) -> Result<i64> {
    value
        .as_i64()
        .ok_or_else(|| TableError::Format(format!("header key '{key}' is not an integer: {value}")))
}
