//! Festival run configuration.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, ScraperError};

#[derive(Debug, Clone, Deserialize)]
pub struct FestivalConfig {
    /// Adapter key, e.g. "idfa".
    pub festival: String,
    pub edition: String,
    pub base_url: String,
    /// Country and home city of the festival, the default for screenings
    /// whose pages do not name one.
    #[serde(default = "default_country")]
    pub country: String,
    pub city: String,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Per-festival output root; this run writes under
    /// `<plan_dir>/<festival>/<edition>/`.
    pub plan_dir: PathBuf,
    /// Cross-festival cache root (cities/theaters/screens).
    pub common_dir: PathBuf,
}

fn default_country() -> String {
    "nl".to_string()
}

impl FestivalConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ScraperError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: FestivalConfig = toml::from_str(&text)?;
        if config.festival.is_empty() {
            return Err(ScraperError::Config("festival must not be empty".into()));
        }
        Ok(config)
    }

    pub fn festival_dir(&self) -> PathBuf {
        self.paths.plan_dir.join(&self.festival).join(&self.edition)
    }

    pub fn common_dir(&self) -> &Path {
        &self.paths.common_dir
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.festival_dir().join("html_cache")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn loads_a_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idfa.toml");
        fs::write(
            &path,
            r#"
festival = "idfa"
edition = "2026"
base_url = "https://festival.example.org"
city = "Amsterdam"

[paths]
plan_dir = "plandata"
common_dir = "common"
"#,
        )
        .unwrap();

        let config = FestivalConfig::load(&path).unwrap();
        assert_eq!(config.festival, "idfa");
        assert_eq!(config.country, "nl");
        assert_eq!(
            config.festival_dir(),
            PathBuf::from("plandata/idfa/2026")
        );
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = FestivalConfig::load(Path::new("/nonexistent/f.toml"));
        assert!(matches!(err, Err(ScraperError::Config(_))));
    }
}
