use crate::config::EngineConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "config/Config.toml";
const ENV_PREFIX: &str = "ROTATOR_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the engine configuration from the default TOML file and environment.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be parsed or the result is invalid.
    pub fn load() -> Result<EngineConfig> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Loads the engine configuration from `path`, then `ROTATOR_*` env vars.
    ///
    /// A missing file is not an error: defaults apply.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be parsed or the result is invalid.
    pub fn load_from(path: impl AsRef<Path>) -> Result<EngineConfig> {
        let config: EngineConfig = Self::figment(path.as_ref(), None)
            .extract()
            .context("failed to parse engine configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the engine configuration with a profile overlay
    /// (`Config.{profile}.toml` next to `path`).
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be parsed or the result is invalid.
    pub fn load_with_profile(path: impl AsRef<Path>, profile: &str) -> Result<EngineConfig> {
        let config: EngineConfig = Self::figment(path.as_ref(), Some(profile))
            .extract()
            .with_context(|| format!("failed to parse engine configuration (profile {profile})"))?;
        config.validate()?;
        Ok(config)
    }

    fn figment(path: &Path, profile: Option<&str>) -> Figment {
        let mut figment = Figment::from(figment::providers::Serialized::defaults(
            EngineConfig::default(),
        ))
        .merge(Toml::file(path));

        if let Some(profile) = profile {
            let overlay = path.with_file_name(format!("Config.{profile}.toml"));
            figment = figment.merge(Toml::file(overlay));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }
}
