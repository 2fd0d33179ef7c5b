//! Parameter registry
//!
//! Maps each measurement the sensor exposes to its holding register,
//! display label, unit and decoding scale. A registry is an ordered,
//! immutable table; the poll controller walks it front to back.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Decoding rule from a raw signed register value to a physical value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scale {
    /// Register holds tenths of the unit (`raw / 10`)
    Tenths,
    /// Register holds the value directly
    #[default]
    Unit,
}

impl Scale {
    /// Apply the scale to a raw register value
    pub fn apply(self, raw: i16) -> f32 {
        match self {
            Scale::Tenths => f32::from(raw) / 10.0,
            Scale::Unit => f32::from(raw),
        }
    }
}

/// A single measurement exposed by the sensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    /// Holding register address (low byte; high byte is always 0)
    pub register_address: u8,
    /// Display label
    pub label: String,
    /// Physical unit
    pub unit: String,
    /// Decoding scale
    #[serde(default)]
    pub scale: Scale,
}

impl Parameter {
    /// Create a new parameter
    pub fn new(register_address: u8, label: &str, unit: &str, scale: Scale) -> Self {
        Self {
            register_address,
            label: label.to_string(),
            unit: unit.to_string(),
            scale,
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (register 0x{:02X})", self.label, self.register_address)
    }
}

/// Register addresses of the 7-in-1 soil sensor
pub mod registers {
    /// Volumetric water content
    pub const MOISTURE: u8 = 0x00;
    /// Soil temperature
    pub const TEMPERATURE: u8 = 0x01;
    /// Electrical conductivity
    pub const CONDUCTIVITY: u8 = 0x02;
    /// Soil pH
    pub const PH: u8 = 0x03;
    /// Nitrogen content
    pub const NITROGEN: u8 = 0x04;
    /// Phosphorus content
    pub const PHOSPHORUS: u8 = 0x05;
    /// Potassium content
    pub const POTASSIUM: u8 = 0x06;
}

/// Registry construction errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Two parameters share a register address
    #[error("Duplicate register address 0x{0:02X}")]
    DuplicateRegister(u8),

    /// No parameters to poll
    #[error("Parameter registry is empty")]
    Empty,
}

/// Built-in registry layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryVariant {
    /// All seven parameters
    #[default]
    Standard,
    /// Six parameters, no pH probe
    Reduced,
}

impl RegistryVariant {
    /// Build the registry for this variant
    pub fn build(self) -> ParameterRegistry {
        match self {
            RegistryVariant::Standard => ParameterRegistry::standard(),
            RegistryVariant::Reduced => ParameterRegistry::reduced(),
        }
    }
}

/// Ordered, immutable table of parameters with unique register addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterRegistry {
    parameters: Vec<Parameter>,
}

impl ParameterRegistry {
    /// Create a registry, rejecting empty tables and duplicate registers
    pub fn new(parameters: Vec<Parameter>) -> Result<Self, RegistryError> {
        if parameters.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut seen = HashSet::with_capacity(parameters.len());
        for parameter in &parameters {
            if !seen.insert(parameter.register_address) {
                return Err(RegistryError::DuplicateRegister(parameter.register_address));
            }
        }

        Ok(Self { parameters })
    }

    /// Seven-parameter table
    pub fn standard() -> Self {
        Self {
            parameters: standard_parameters(),
        }
    }

    /// Six-parameter table used by sensors without a pH probe
    pub fn reduced() -> Self {
        Self {
            parameters: standard_parameters()
                .into_iter()
                .filter(|p| p.register_address != registers::PH)
                .collect(),
        }
    }

    /// Parameters in poll order
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Iterate parameters in poll order
    pub fn iter(&self) -> std::slice::Iter<'_, Parameter> {
        self.parameters.iter()
    }

    /// Look up a parameter by register address
    pub fn find(&self, register_address: u8) -> Option<&Parameter> {
        self.parameters
            .iter()
            .find(|p| p.register_address == register_address)
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// Always false for a constructed registry
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

impl<'a> IntoIterator for &'a ParameterRegistry {
    type Item = &'a Parameter;
    type IntoIter = std::slice::Iter<'a, Parameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn standard_parameters() -> Vec<Parameter> {
    vec![
        Parameter::new(registers::MOISTURE, "Moisture", "%", Scale::Tenths),
        Parameter::new(registers::TEMPERATURE, "Temperature", "C", Scale::Tenths),
        Parameter::new(registers::CONDUCTIVITY, "Conductivity", "uS/cm", Scale::Unit),
        Parameter::new(registers::PH, "pH", "level", Scale::Tenths),
        Parameter::new(registers::NITROGEN, "Nitrogen", "ppm", Scale::Unit),
        Parameter::new(registers::PHOSPHORUS, "Phosphorus", "ppm", Scale::Unit),
        Parameter::new(registers::POTASSIUM, "Potassium", "ppm", Scale::Unit),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_order() {
        let registry = ParameterRegistry::standard();
        let addresses: Vec<u8> = registry.iter().map(|p| p.register_address).collect();
        assert_eq!(addresses, vec![0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(registry.find(registers::PH).unwrap().scale, Scale::Tenths);
    }

    #[test]
    fn test_reduced_has_no_ph() {
        let registry = ParameterRegistry::reduced();
        assert_eq!(registry.len(), 6);
        assert!(registry.find(registers::PH).is_none());
        assert_eq!(registry.parameters()[3].label, "Nitrogen");
    }

    #[test]
    fn test_duplicate_register_rejected() {
        let result = ParameterRegistry::new(vec![
            Parameter::new(0x00, "Moisture", "%", Scale::Tenths),
            Parameter::new(0x00, "Again", "%", Scale::Tenths),
        ]);
        assert_eq!(result, Err(RegistryError::DuplicateRegister(0x00)));
    }

    #[test]
    fn test_empty_rejected() {
        assert_eq!(ParameterRegistry::new(Vec::new()), Err(RegistryError::Empty));
    }

    #[test]
    fn test_scale_apply() {
        assert!((Scale::Tenths.apply(123) - 12.3).abs() < f32::EPSILON);
        assert!((Scale::Tenths.apply(-50) - (-5.0)).abs() < f32::EPSILON);
        assert_eq!(Scale::Unit.apply(700), 700.0);
    }

    #[test]
    fn test_variant_deserialize() {
        #[derive(Deserialize)]
        struct Wrapper {
            variant: RegistryVariant,
        }
        let w: Wrapper = toml::from_str("variant = \"reduced\"").unwrap();
        assert_eq!(w.variant, RegistryVariant::Reduced);
        assert_eq!(w.variant.build().len(), 6);
    }
}
