use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::{env, fs, path::PathBuf};

/// Demo configuration, loaded from TOML next to the executable (or from the
/// path in `SHMFRAME_DEMO_CONFIG`). Every field has a default, so a missing
/// file is fine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DemoConfig {
    /// Region name both sides share.
    pub name: String,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Producer frame rate.
    pub fps: u32,
    /// Pages in the exchange; more pages let the producer run ahead.
    pub pages: u32,
}

impl Default for DemoConfig {
    fn default() -> Self {
        DemoConfig {
            name: "shmframe-demo".into(),
            width: 640,
            height: 480,
            fps: 30,
            pages: 2,
        }
    }
}

impl DemoConfig {
    pub fn num_pixels(&self) -> u32 {
        self.width * self.height
    }

    pub fn from_str(toml: &str) -> Result<Self> {
        let cfg: DemoConfig = toml::from_str(toml).context("parsing TOML")?;
        cfg.validate()
    }

    fn validate(self) -> Result<Self> {
        if self.name.is_empty() {
            bail!("name must not be empty");
        }
        if self.width == 0 || self.height == 0 {
            bail!("width and height must be positive");
        }
        if self.width.checked_mul(self.height).is_none() {
            bail!("{}x{} exceeds the addressable pixel count", self.width, self.height);
        }
        if self.fps == 0 || self.fps > 240 {
            bail!("fps must be in 1..=240");
        }
        if self.pages < 2 {
            bail!("pages must be at least 2");
        }
        Ok(self)
    }
}

/// Loads the config file if one exists, falling back to defaults.
pub fn load() -> Result<DemoConfig> {
    let path = find_config_file();
    match fs::read_to_string(&path) {
        Ok(s) => DemoConfig::from_str(&s).with_context(|| format!("in `{}`", path.display())),
        Err(_) => Ok(DemoConfig::default()),
    }
}

/// Checks the override environment variable first, then falls back to a
/// `demo.toml` next to the running executable.
fn find_config_file() -> PathBuf {
    if let Some(cfg) = env::var_os("SHMFRAME_DEMO_CONFIG") {
        return PathBuf::from(cfg);
    }
    let mut exe_path = env::current_exe().unwrap_or_else(|_| PathBuf::from("."));
    exe_path.pop();
    exe_path.push("demo.toml");
    exe_path
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
    name = "bench"
    width = 1280
    height = 720
    fps = 60
    pages = 3
    "#;

    #[test]
    fn parse_full_config() {
        let cfg = DemoConfig::from_str(SAMPLE).expect("should parse full sample");
        assert_eq!(cfg.name, "bench");
        assert_eq!(cfg.width, 1280);
        assert_eq!(cfg.height, 720);
        assert_eq!(cfg.fps, 60);
        assert_eq!(cfg.pages, 3);
        assert_eq!(cfg.num_pixels(), 1280 * 720);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let cfg = DemoConfig::from_str("width = 800\nheight = 600").unwrap();
        assert_eq!(cfg.name, "shmframe-demo");
        assert_eq!(cfg.fps, 30);
        assert_eq!(cfg.pages, 2);
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        assert!(DemoConfig::from_str("width = 0").is_err());
        assert!(DemoConfig::from_str("height = 0").is_err());
    }

    #[test]
    fn out_of_range_fps_is_rejected() {
        assert!(DemoConfig::from_str("fps = 0").is_err());
        assert!(DemoConfig::from_str("fps = 1000").is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(DemoConfig::from_str("pixels = 12").is_err());
    }

    #[test]
    fn single_page_is_rejected() {
        assert!(DemoConfig::from_str("pages = 1").is_err());
    }
}
