//! plcmon configuration
//!
//! Loaded from a YAML/TOML/JSON file with `PLCMON_` environment overrides.

use serde::{Deserialize, Serialize};
use voltage_common::LogConfig;
use voltage_plc::{Address, ByteOrder, MonitorConfig, PlcConfig, Region};

pub const ENV_PREFIX: &str = "PLCMON_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlcmonConfig {
    pub logging: LogConfig,
    pub plc: PlcConfig,
    pub monitor: MonitorConfig,
    pub items: Vec<ItemSpec>,
    /// Memory contents of the simulated controller at start-up
    pub simulation: Vec<SeedBlock>,
}

// ============================================================================
// Items
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Bit,
    Byte,
    Bytes,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
    Text,
    DynamicBytes,
    DynamicText,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemSpec {
    /// Identifier, also the key for per-item polling intervals
    pub name: String,
    pub kind: ItemKind,
    pub address: AddressSpec,
    /// Byte count of `bytes` and `text`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    /// Width of the length prefix of dynamic kinds
    #[serde(default = "default_length_width")]
    pub length_width: usize,
    #[serde(default)]
    pub byte_order: ByteOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSpec {
    #[serde(default = "default_region")]
    pub region: Region,
    #[serde(default)]
    pub data_block: u16,
    pub position: u16,
    #[serde(default)]
    pub bit: u8,
}

impl From<AddressSpec> for Address {
    fn from(spec: AddressSpec) -> Self {
        let address = match spec.region {
            Region::Data => Address::data(spec.data_block, spec.position),
            region => Address::new(region, spec.position),
        };
        address.with_bit(spec.bit)
    }
}

// ============================================================================
// Simulation
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedBlock {
    #[serde(default = "default_region")]
    pub region: Region,
    #[serde(default)]
    pub data_block: u16,
    #[serde(default)]
    pub position: u16,
    pub bytes: Vec<u8>,
}

fn default_region() -> Region {
    Region::Data
}

fn default_length_width() -> usize {
    2
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    const SAMPLE: &str = include_str!("../config/plcmon.yaml");

    #[test]
    fn test_sample_config_parses() {
        let config: PlcmonConfig = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(config.plc.name, "press-line");
        assert!(config.plc.validate().is_ok());
        assert!(!config.items.is_empty());
        assert!(!config.simulation.is_empty());
        assert!(config
            .items
            .iter()
            .any(|item| item.kind == ItemKind::DynamicText));
    }

    #[test]
    fn test_item_defaults() {
        let spec: ItemSpec = serde_yaml::from_str(
            "name: speed\nkind: uint16\naddress:\n  data_block: 1\n  position: 4\n",
        )
        .unwrap();
        assert_eq!(spec.byte_order, ByteOrder::BigEndian);
        assert_eq!(spec.length_width, 2);
        assert_eq!(Address::from(spec.address), Address::data(1, 4));
    }

    #[test]
    fn test_non_data_region_ignores_block() {
        let spec: AddressSpec =
            serde_yaml::from_str("region: Flags\ndata_block: 9\nposition: 3\nbit: 5\n").unwrap();
        let address = Address::from(spec);
        assert_eq!(address.region, Region::Flags);
        assert_eq!(address.data_block, 0);
        assert_eq!(address.bit_position, 5);
    }
}
