use serde::Deserialize;

use crate::error::Result;

/// Default page ceiling of a stock Cargo install (`$wgCargoMaxQueryLimit`).
pub const DEFAULT_MAX_LIMIT: u64 = 5000;

/// How `group_by` and `having` refer to projected columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasResolution {
    /// Always render the qualified column, e.g. `T1.title`.
    #[default]
    Qualified,
    /// Render the output alias when the expression is projected under one.
    OutputAlias,
}

/// Limits and dialect choices of the remote Cargo provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Largest `limit` the provider accepts in a single request
    pub max_limit: u64,
    /// Alias rules applied to `group_by` and `having`
    pub alias_resolution: AliasResolution,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            max_limit: DEFAULT_MAX_LIMIT,
            alias_resolution: AliasResolution::Qualified,
        }
    }
}

impl ProviderConfig {
    /// Parse a config from TOML. Missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn with_max_limit(mut self, max_limit: u64) -> Self {
        self.max_limit = max_limit;
        self
    }

    pub fn with_alias_resolution(mut self, alias_resolution: AliasResolution) -> Self {
        self.alias_resolution = alias_resolution;
        self
    }
}
