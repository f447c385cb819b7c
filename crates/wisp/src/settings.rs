//! Typed view over the host-owned persisted settings bag. Storage itself
//! is left to the host; this module only names the recognized keys and
//! their (de)serialization.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifetimeUnit {
    Minutes,
    Hours,
    Days,
    Unlimited,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSettings {
    #[serde(rename = "serverURL")]
    pub server_url: String,
    pub lifetime_value: u64,
    pub lifetime_unit: LifetimeUnit,
    pub max_downloads: Option<u32>,
}

impl PersistedSettings {
    /// Resolve the persisted lifetime into the milliseconds expected by
    /// [`crate::config::UploadOptions::lifetime_ms`].
    pub fn lifetime_ms(&self) -> u64 {
        match self.lifetime_unit {
            LifetimeUnit::Unlimited => 0,
            LifetimeUnit::Minutes => self.lifetime_value * 60_000,
            LifetimeUnit::Hours => self.lifetime_value * 3_600_000,
            LifetimeUnit::Days => self.lifetime_value * 86_400_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifetime_ms_converts_units() {
        let mut s = PersistedSettings {
            server_url: "https://s.example".into(),
            lifetime_value: 2,
            lifetime_unit: LifetimeUnit::Hours,
            max_downloads: None,
        };
        assert_eq!(s.lifetime_ms(), 2 * 3_600_000);
        s.lifetime_unit = LifetimeUnit::Unlimited;
        assert_eq!(s.lifetime_ms(), 0);
    }
}
