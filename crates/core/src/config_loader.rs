use crate::config::EngineConfig;
use crate::error::ConfigError;
use figment::{
    providers::{Env, Format, Json, Toml},
    Figment,
};
use std::path::Path;

/// Environment variable prefix; nested keys use `__`, e.g.
/// `DECISION_SIZING__MIN_QUALITY_SCORE=0.65`.
pub const ENV_PREFIX: &str = "DECISION_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the configuration bundle from a TOML file, environment
    /// overrides, and an optional JSON sidecar with the same stem, then
    /// validates it.
    ///
    /// # Errors
    ///
    /// Returns an error if the sources cannot be read or parsed, or if the
    /// resulting bundle fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<EngineConfig, ConfigError> {
        let path = path.as_ref();
        Self::extract(
            Figment::new()
                .merge(Toml::file(path))
                .merge(Env::prefixed(ENV_PREFIX).split("__"))
                .join(Json::file(path.with_extension("json"))),
        )
    }

    /// Loads the configuration with a profile overlay such as
    /// `engine.production.toml` next to `engine.toml`.
    ///
    /// # Errors
    ///
    /// Returns an error if the sources cannot be read or parsed, or if the
    /// resulting bundle fails validation.
    pub fn load_with_profile(
        path: impl AsRef<Path>,
        profile: &str,
    ) -> Result<EngineConfig, ConfigError> {
        let path = path.as_ref();
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("engine");
        let overlay = path.with_file_name(format!("{stem}.{profile}.toml"));
        Self::extract(
            Figment::new()
                .merge(Toml::file(path))
                .merge(Toml::file(overlay))
                .merge(Env::prefixed(ENV_PREFIX).split("__"))
                .join(Json::file(path.with_extension("json"))),
        )
    }

    /// Parses a bundle from an in-memory TOML string and validates it.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or the bundle is invalid.
    pub fn from_toml_str(toml: &str) -> Result<EngineConfig, ConfigError> {
        Self::extract(Figment::new().merge(Toml::string(toml)))
    }

    fn extract(figment: Figment) -> Result<EngineConfig, ConfigError> {
        let config: EngineConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        tracing::info!(
            version = %config.version,
            instruments = config.instruments.len(),
            "configuration bundle loaded"
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const BUNDLE: &str = r#"
        version = "2026.03.1"

        [account]
        equity = "250000"

        [sizing]
        min_quality_score = 0.6
        min_risk_pct = "0.6"
        max_risk_pct = "1.0"

        [exposure]
        buffer = "0.10"
        max_asset_class_risk_pct = "6.0"

        [locks]
        timeout = 250

        [instruments.EURUSD]
        asset_class = "fx"
        value_per_point = "100000"
        reference_stop_distance = "0.0040"

        [[governance.bounds]]
        key = "scoring.signal_strength"
        max_delta = 0.1
        min = 0.0
        max = 1.0
    "#;

    #[test]
    fn loads_bundle_from_toml() {
        let config = ConfigLoader::from_toml_str(BUNDLE).unwrap();
        assert_eq!(config.version, "2026.03.1");
        assert_eq!(config.account.equity, dec!(250000));
        assert_eq!(config.sizing.min_risk_pct, dec!(0.6));
        assert_eq!(config.locks.timeout, std::time::Duration::from_millis(250));
        assert_eq!(config.instruments["EURUSD"].max_stop_multiple, dec!(5));
        assert_eq!(config.governance.bounds.len(), 1);
    }

    #[test]
    fn min_quality_of_one_fails_at_load() {
        let toml = BUNDLE.replace("min_quality_score = 0.6", "min_quality_score = 1.0");
        let err = ConfigLoader::from_toml_str(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "sizing.min_quality_score"));
    }

    #[test]
    fn weights_not_summing_to_one_fail_at_load() {
        let toml = format!(
            "{BUNDLE}\n[scoring.weights]\nsignal_strength = 0.5\nstructural_alignment = 0.2\norder_flow_quality = 0.2\nregime_fit = 0.15\nhistorical_performance = 0.15\n"
        );
        assert!(ConfigLoader::from_toml_str(&toml).is_err());
    }

    #[test]
    fn malformed_toml_is_a_load_error() {
        let err = ConfigLoader::from_toml_str("version = ").unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn loads_from_file_with_profile_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("engine.toml");
        std::fs::write(&base, BUNDLE).unwrap();
        std::fs::write(
            dir.path().join("engine.production.toml"),
            "version = \"2026.03.1-prod\"\n[locks]\ntimeout = 500\n",
        )
        .unwrap();

        let plain = ConfigLoader::load(&base).unwrap();
        assert_eq!(plain.version, "2026.03.1");

        let production = ConfigLoader::load_with_profile(&base, "production").unwrap();
        assert_eq!(production.version, "2026.03.1-prod");
        assert_eq!(
            production.locks.timeout,
            std::time::Duration::from_millis(500)
        );
        assert_eq!(production.account.equity, dec!(250000));
    }
}
