//! Engine configuration.
//!
//! Layers compiled-in defaults, an optional TOML file and `RAMAN_*` environment variables
//! (`__` separates nested keys, e.g. `RAMAN_SCORER__MARGIN_WEIGHT=20`).

use std::path::Path;

use anyhow::{bail, Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::pipeline::condition::ConditionerConfig;
use crate::pipeline::validate::ValidatorConfig;
use crate::render::PlotConfig;
use crate::scoring::ScorerConfig;

pub const ENV_PREFIX: &str = "RAMAN_";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub validator: ValidatorConfig,
    pub conditioner: ConditionerConfig,
    pub scorer: ScorerConfig,
    pub plot: PlotConfig,
}

impl EngineConfig {
    /// Merge defaults, the TOML file at `path` (which must exist when given) and the
    /// environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));
        if let Some(path) = path {
            if !path.is_file() {
                bail!("configuration file {} does not exist", path.display());
            }
            figment = figment.merge(Toml::file(path));
        }
        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Parse a TOML document on top of the defaults, ignoring the environment.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Self::extract(
            Figment::from(Serialized::defaults(EngineConfig::default())).merge(Toml::string(toml)),
        )
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: EngineConfig = figment
            .extract()
            .context("failed to read engine configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.conditioner;
        if c.smoothing_window == 0 {
            bail!("conditioner.smoothing_window must be at least 1");
        }
        if !(c.baseline_tolerance > 0.0) {
            bail!("conditioner.baseline_tolerance must be positive");
        }
        if !(c.degenerate_epsilon > 0.0) {
            bail!("conditioner.degenerate_epsilon must be positive");
        }
        if c.baseline_max_iterations == 0 {
            bail!("conditioner.baseline_max_iterations must be at least 1");
        }

        let s = &self.scorer;
        if !(s.score_weight >= 0.0 && s.margin_weight >= 0.0 && s.noise_weight >= 0.0) {
            bail!("scorer weights must be non-negative");
        }
        if !s.score_midpoint.is_finite() {
            bail!("scorer.score_midpoint must be finite");
        }
        if !(s.tie_tolerance >= 0.0) {
            bail!("scorer.tie_tolerance must be non-negative");
        }
        if !(0.0..=1.0).contains(&s.low_confidence_threshold) {
            bail!("scorer.low_confidence_threshold must lie in [0, 1]");
        }

        if let Some(crop) = &self.validator.crop {
            if !(crop.lower < crop.upper) {
                bail!(
                    "validator.crop lower bound {} must be below the upper bound {}",
                    crop.lower,
                    crop.upper
                );
            }
        }

        let p = &self.plot;
        if p.width == 0 || p.height == 0 {
            bail!("plot dimensions must be non-zero");
        }
        if p.max_points < 2 {
            bail!("plot.max_points must be at least 2");
        }
        Ok(())
    }
}
