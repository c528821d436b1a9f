//! Harness configuration, loaded from an optional TOML file

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{E2eError, E2eResult};
use crate::playwright::{Browser, PlaywrightConfig};
use crate::runner::RunnerConfig;
use crate::scenario::ScenarioOptions;
use crate::server::ServerConfig;
use crate::spec::Viewport;
use crate::visual::VisualConfig;

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Application under test
    pub app: ServerConfig,

    pub browser: BrowserSettings,

    pub output: OutputSettings,

    pub visual: VisualSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub kind: Browser,
    pub headless: bool,
    pub viewport: Viewport,
    pub node_path: Option<PathBuf>,
    /// Bound on the whole browser run, in seconds
    pub run_timeout_secs: Option<u64>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            kind: Browser::Chromium,
            headless: true,
            viewport: Viewport::default(),
            node_path: None,
            run_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Image handed to the file chooser
    pub dummy_image: PathBuf,
    /// Full-page evidence screenshot, overwritten each run
    pub screenshot: PathBuf,
    /// Where the JSON report is written
    pub results_dir: PathBuf,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dummy_image: PathBuf::from("verification/dummy_receipt.png"),
            screenshot: PathBuf::from("verification/verification.png"),
            results_dir: PathBuf::from("verification/results"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualSettings {
    pub enabled: bool,
    #[serde(flatten)]
    pub comparison: VisualConfig,
}

impl VerifyConfig {
    /// Load configuration from file; a missing file yields the defaults
    pub fn load(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_toml(&content)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> E2eResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> E2eResult<()> {
        if !self.app.url.starts_with("http://") && !self.app.url.starts_with("https://") {
            return Err(E2eError::InvalidConfig(format!(
                "app.url must be an http(s) URL, got '{}'",
                self.app.url
            )));
        }
        if !(0.0..=100.0).contains(&self.visual.comparison.threshold) {
            return Err(E2eError::InvalidConfig(format!(
                "visual.threshold {} outside 0-100",
                self.visual.comparison.threshold
            )));
        }
        if self.browser.run_timeout_secs == Some(0) {
            return Err(E2eError::InvalidConfig("browser.run_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    /// Resolve into runner settings; relative paths are taken from `working_dir`
    pub fn into_runner_config(self, working_dir: PathBuf) -> RunnerConfig {
        let scenario = ScenarioOptions {
            dummy_image: self.output.dummy_image,
            screenshot_path: self.output.screenshot,
            viewport: self.browser.viewport,
            visual_regression: self.visual.enabled,
            visual_threshold: self.visual.comparison.threshold,
            ..ScenarioOptions::default()
        };

        RunnerConfig {
            playwright: PlaywrightConfig {
                base_url: self.app.url.clone(),
                browser: self.browser.kind,
                headless: self.browser.headless,
                working_dir: working_dir.clone(),
                node_path: self.browser.node_path,
                run_timeout: self.browser.run_timeout_secs.map(Duration::from_secs),
            },
            server: self.app,
            visual: self.visual.comparison,
            scenario,
            output_dir: working_dir.join(self.output.results_dir),
            working_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = VerifyConfig::load(&dir.path().join("verify.toml")).unwrap();
        assert_eq!(config, VerifyConfig::default());
        assert_eq!(config.app.url, "http://localhost:5173");
        assert!(config.browser.headless);
        assert!(!config.visual.enabled);
    }

    #[test]
    fn test_partial_file() {
        let config = VerifyConfig::from_toml(
            r#"
[app]
url = "http://127.0.0.1:4173"

[browser]
kind = "firefox"
run_timeout_secs = 120

[browser.viewport]
width = 1920
height = 1080

[visual]
enabled = true
threshold = 1.5
auto_update = true
"#,
        )
        .unwrap();

        assert_eq!(config.app.url, "http://127.0.0.1:4173");
        assert_eq!(config.browser.kind, Browser::Firefox);
        assert_eq!(config.browser.viewport, Viewport { width: 1920, height: 1080 });
        assert!(config.visual.enabled);
        assert_eq!(config.visual.comparison.threshold, 1.5);
        assert!(config.visual.comparison.auto_update);
        assert_eq!(config.output, OutputSettings::default());
    }

    #[test]
    fn test_rejects_bad_url() {
        let err = VerifyConfig::from_toml("[app]\nurl = \"localhost:5173\"\n").unwrap_err();
        assert!(matches!(err, E2eError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_unknown_browser() {
        let err = VerifyConfig::from_toml("[browser]\nkind = \"lynx\"\n").unwrap_err();
        assert!(matches!(err, E2eError::Toml(_)));
    }

    #[test]
    fn test_into_runner_config_resolves_paths() {
        let mut config = VerifyConfig::default();
        config.browser.run_timeout_secs = Some(90);
        let runner = config.into_runner_config(PathBuf::from("/repo"));

        assert_eq!(runner.output_dir, PathBuf::from("/repo/verification/results"));
        assert_eq!(runner.playwright.working_dir, PathBuf::from("/repo"));
        assert_eq!(runner.playwright.run_timeout, Some(Duration::from_secs(90)));
        assert_eq!(runner.scenario.dummy_image, PathBuf::from("verification/dummy_receipt.png"));
    }
}
