use crate::error::{ClaimFeeError, Result};
use crate::pricing::PricingTier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// EconomyConfig
// ---------------------------------------------------------------------------

/// Rates granted by one permission tier. Either rate may be omitted, in
/// which case the default rate applies on that axis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierRates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizontal: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertical: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EconomyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_horizontal_price")]
    pub horizontal_price_per_block: f64,
    #[serde(default = "default_vertical_price")]
    pub vertical_price_per_block: f64,
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_seconds: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub price_permissions: BTreeMap<String, TierRates>,
}

fn default_horizontal_price() -> f64 {
    0.1
}

fn default_vertical_price() -> f64 {
    0.00005
}

/// Longest confirmation window `validate` accepts.
pub const MAX_CONFIRMATION_TIMEOUT_SECONDS: u64 = 24 * 60 * 60;

fn default_confirmation_timeout() -> u64 {
    120
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            horizontal_price_per_block: default_horizontal_price(),
            vertical_price_per_block: default_vertical_price(),
            confirmation_timeout_seconds: default_confirmation_timeout(),
            price_permissions: BTreeMap::new(),
        }
    }
}

impl EconomyConfig {
    pub fn default_tier(&self) -> PricingTier {
        PricingTier::new(self.horizontal_price_per_block, self.vertical_price_per_block)
    }

    /// Named tiers with omitted rates filled in from the defaults.
    pub fn price_tiers(&self) -> BTreeMap<String, PricingTier> {
        self.price_permissions
            .iter()
            .map(|(name, rates)| {
                let tier = PricingTier::new(
                    rates.horizontal.unwrap_or(self.horizontal_price_per_block),
                    rates.vertical.unwrap_or(self.vertical_price_per_block),
                );
                (name.clone(), tier)
            })
            .collect()
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_seconds)
    }
}

// ---------------------------------------------------------------------------
// LimitsConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Minimum length of the shorter horizontal side.
    #[serde(default = "default_min_side")]
    pub min_horizontal: u64,
    #[serde(default = "default_min_side")]
    pub min_vertical: u64,
}

/// Limits are opt-in: a side of 1 accepts every selection. Servers that
/// want the usual 20×20 floor set both fields explicitly.
fn default_min_side() -> u64 {
    1
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            min_horizontal: default_min_side(),
            min_vertical: default_min_side(),
        }
    }
}

impl LimitsConfig {
    pub fn is_enforced(&self) -> bool {
        self.min_horizontal > 1 || self.min_vertical > 1
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub economy: EconomyConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            economy: EconomyConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ClaimFeeError::ConfigNotFound(path.display().to_string()));
        }
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(data)?;
        if cfg.version != 1 {
            return Err(ClaimFeeError::InvalidConfig(format!(
                "unsupported config version {}",
                cfg.version
            )));
        }
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let economy = &self.economy;

        // 1. Negative default rates make every claim free on that axis
        for (axis, rate) in [
            ("horizontal_price_per_block", economy.horizontal_price_per_block),
            ("vertical_price_per_block", economy.vertical_price_per_block),
        ] {
            if rate < 0.0 || !rate.is_finite() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("economy.{axis} must be a non-negative number, got {rate}"),
                });
            }
        }

        // 2. A zero timeout expires every quote before it can be confirmed
        if economy.enabled && economy.confirmation_timeout_seconds == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "economy.confirmation_timeout_seconds is 0: quotes expire immediately"
                    .to_string(),
            });
        }

        if economy.confirmation_timeout_seconds > MAX_CONFIRMATION_TIMEOUT_SECONDS {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "economy.confirmation_timeout_seconds is {}: must be at most {} (one day)",
                    economy.confirmation_timeout_seconds, MAX_CONFIRMATION_TIMEOUT_SECONDS
                ),
            });
        }

        // 3. Tier sanity
        let default_tier = economy.default_tier();
        for (name, tier) in economy.price_tiers() {
            if tier.horizontal < 0.0 || tier.vertical < 0.0 {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("price tier '{name}' has a negative rate"),
                });
            }
            if tier.horizontal >= default_tier.horizontal && tier.vertical >= default_tier.vertical
            {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "price tier '{name}' is not cheaper than the default on either axis \
                         and will never apply"
                    ),
                });
            }
        }

        // 4. Tiers configured but nothing charges
        if !economy.enabled && !economy.price_permissions.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "price_permissions are configured but economy.enabled is false"
                    .to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
