use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::buffer::DEFAULT_MAX_BATCH_LEN;
use crate::error::Result;
use crate::events::KeyMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub flush_interval_ms: u64,
    /// Added to each batch timestamp to line up with the remote clock.
    pub server_time_offset_ms: i64,
    pub max_batch_len: usize,
    pub key_offset: i32,
    pub transpose: i32,
    /// Note-ons quieter than this are dropped. Releases always pass.
    pub min_velocity: u8,
}

impl Default for RelayConfig {
    fn default() -> Self {
        let keys = KeyMap::default();
        Self {
            flush_interval_ms: 200,
            server_time_offset_ms: 0,
            max_batch_len: DEFAULT_MAX_BATCH_LEN,
            key_offset: keys.key_offset,
            transpose: keys.transpose,
            min_velocity: 1,
        }
    }
}

impl RelayConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let ron_string = fs::read_to_string(path)?;
        Self::from_ron(&ron_string)
    }

    pub fn from_ron(text: &str) -> Result<Self> {
        Ok(ron::from_str(text)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, ron_string)?;
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    pub fn key_map(&self) -> KeyMap {
        KeyMap::new(self.key_offset, self.transpose)
    }
}
