use crate::error::ConfigError;
use crate::lut::{LookupTable, Lut};
use crate::packer::SlotFormat;
use crate::segment::BoardType;
use crate::signal::{Clock, Tick};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_tracker_max_hit() -> usize {
    20
}

fn default_event_time_max_hit() -> usize {
    6
}

fn default_clock_max() -> Tick {
    1023
}

/// Setup of one super layer, as read from a JSON file.
///
/// # Examples
///
/// ```
/// use tsf::config::TsfConfig;
/// use tsf::segment::BoardType;
///
/// let config = TsfConfig::from_json(r#"{
///     "board": "outer",
///     "segments": 160,
///     "superlayer": 1,
///     "global_offset": 160,
///     "logicLUTFlag": true
/// }"#)?;
/// assert_eq!(config.board, BoardType::Outer);
/// assert!(config.logic_lut);
/// assert_eq!(config.tracker_max_hit, 20);
/// # Ok::<(), tsf::error::ConfigError>(())
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TsfConfig {
    pub board: BoardType,
    pub segments: usize,
    pub superlayer: usize,
    /// Global id of the first segment of the super layer.
    #[serde(default)]
    pub global_offset: usize,
    /// Evaluate the LUT as a gate network instead of a memory.
    #[serde(default, alias = "logicLUTFlag")]
    pub logic_lut: bool,
    #[serde(default = "default_tracker_max_hit")]
    pub tracker_max_hit: usize,
    #[serde(default = "default_event_time_max_hit")]
    pub event_time_max_hit: usize,
    /// Send bare tracker words, without the local id.
    #[serde(default)]
    pub legacy_format: bool,
    #[serde(default)]
    pub clock_min: Tick,
    #[serde(default = "default_clock_max")]
    pub clock_max: Tick,
}

impl TsfConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
    /// Reads a COE LUT file and prepares it as configured.
    pub fn load_lut<P: AsRef<Path>>(&self, path: P) -> Result<Lut, ConfigError> {
        let table: LookupTable = std::fs::read_to_string(path)?.parse()?;
        Ok(Lut::new(table, self.logic_lut))
    }
    pub fn clock(&self) -> Result<Clock, ConfigError> {
        Clock::new(self.clock_min, self.clock_max)
    }
    pub fn slot_format(&self) -> SlotFormat {
        if self.legacy_format {
            SlotFormat::Legacy
        } else {
            SlotFormat::WithId
        }
    }
}
