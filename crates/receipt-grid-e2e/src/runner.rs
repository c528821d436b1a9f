//! Orchestrates the application, Playwright and the screenshot check

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::assets::ensure_dummy_receipt;
use crate::error::{E2eError, E2eResult};
use crate::playwright::{InterceptedRequest, PlaywrightConfig, PlaywrightHandle, StepResult};
use crate::scenario::{receipt_grid, ScenarioOptions};
use crate::server::{wait_for_reachable, ServerConfig, ServerHandle};
use crate::spec::{TestSpec, TestStep};
use crate::visual::{VisualConfig, VisualDiff, VisualTester};

/// Outcome of one scenario run, written as JSON next to the screenshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub name: String,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    pub intercepted: Vec<InterceptedRequest>,
    pub visual: Option<VisualDiff>,
    pub error: Option<String>,
}

/// Configuration for the runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub server: ServerConfig,
    pub playwright: PlaywrightConfig,
    pub visual: VisualConfig,
    pub scenario: ScenarioOptions,
    pub output_dir: PathBuf,
    pub working_dir: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            playwright: PlaywrightConfig::default(),
            visual: VisualConfig::default(),
            scenario: ScenarioOptions::default(),
            output_dir: PathBuf::from("verification/results"),
            working_dir: PathBuf::from("."),
        }
    }
}

pub struct VerificationRunner {
    config: RunnerConfig,
    server: Option<ServerHandle>,
}

impl VerificationRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config, server: None }
    }

    /// The built-in receipt grid scenario
    pub fn scenario(&self) -> TestSpec {
        receipt_grid(&self.config.scenario)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config.working_dir.join(path)
        }
    }

    /// Start the application if configured to, otherwise wait until the
    /// already-running one answers
    pub async fn prepare_app(&mut self) -> E2eResult<()> {
        if self.server.is_some() {
            return Ok(());
        }

        if self.config.server.should_spawn() {
            self.server = Some(ServerHandle::spawn(&self.config.server).await?);
        } else {
            wait_for_reachable(&self.config.playwright.base_url, self.config.server.startup_timeout)
                .await?;
        }
        Ok(())
    }

    pub fn stop_server(&mut self) -> E2eResult<()> {
        if let Some(mut server) = self.server.take() {
            server.stop()?;
        }
        Ok(())
    }

    /// Run the built-in scenario
    pub async fn run(&mut self) -> E2eResult<VerificationReport> {
        let spec = self.scenario();
        self.run_spec(&spec).await
    }

    /// Scenarios to run: the YAML file or directory at `path`, or the
    /// built-in scenario, narrowed to `tag`. Selecting nothing is an error.
    pub fn select_specs(&self, path: Option<&Path>, tag: Option<&str>) -> E2eResult<Vec<TestSpec>> {
        let (source, specs) = match path {
            Some(path) if path.is_dir() => (path.display().to_string(), TestSpec::load_all(path)?),
            Some(path) => (path.display().to_string(), vec![TestSpec::from_file(path)?]),
            None => ("the built-in scenario".to_string(), vec![self.scenario()]),
        };
        if specs.is_empty() {
            return Err(E2eError::InvalidConfig(format!("no scenarios found in {}", source)));
        }

        let Some(tag) = tag else {
            return Ok(specs);
        };
        let tagged: Vec<TestSpec> = TestSpec::filter_by_tag(&specs, tag).into_iter().cloned().collect();
        if tagged.is_empty() {
            return Err(E2eError::InvalidConfig(format!(
                "no scenario in {} is tagged '{}'",
                source, tag
            )));
        }
        Ok(tagged)
    }

    /// Run several scenarios against one application instance. Each report
    /// is written as soon as its scenario finishes.
    pub async fn run_specs(&mut self, specs: &[TestSpec]) -> E2eResult<Vec<VerificationReport>> {
        if specs.is_empty() {
            return Err(E2eError::InvalidConfig("no scenarios to run".to_string()));
        }

        info!("Running {} scenario(s)...", specs.len());
        let mut reports = Vec::with_capacity(specs.len());
        for spec in specs {
            let report = self.run_spec(spec).await?;
            self.write_report(&report)?;
            reports.push(report);
        }

        let failed = reports.iter().filter(|r| !r.success).count();
        info!("Results: {} passed, {} failed", reports.len() - failed, failed);
        Ok(reports)
    }

    /// Run a single scenario. Harness problems are errors; application
    /// misbehaviour is a report with `success == false`.
    pub async fn run_spec(&mut self, spec: &TestSpec) -> E2eResult<VerificationReport> {
        let started_at = Utc::now();
        let start = Instant::now();
        debug!("Running scenario: {}", spec.name);

        self.prepare_inputs(spec)?;
        self.prepare_app().await?;

        let playwright = PlaywrightHandle::new(self.config.playwright.clone())?;

        let (steps, intercepted, mut failure) = match playwright.run(spec).await {
            Ok(outcome) => {
                let failure = outcome.failure();
                (outcome.steps, outcome.intercepted, failure)
            }
            Err(e) if e.is_verification_failure() => (vec![], vec![], Some(e)),
            Err(e) => return Err(e),
        };

        let mut visual = None;
        if spec.visual_regression && failure.is_none() {
            if let Some(shot) = steps.iter().rev().find_map(|s| s.screenshot_path.clone()) {
                let tester = VisualTester::new(self.resolve_visual_config())?;
                match tester.compare(&shot, Some(spec.visual_threshold)) {
                    Ok(diff) => {
                        if !diff.matches {
                            failure = Some(E2eError::ScreenshotMismatch {
                                name: shot.display().to_string(),
                                diff_percent: diff.diff_percent,
                                threshold: spec.visual_threshold,
                            });
                        }
                        visual = Some(diff);
                    }
                    Err(E2eError::BaselineNotFound(path)) => {
                        info!("No baseline at {} - rerun with --update-baseline to create it", path);
                    }
                    Err(e) => failure = Some(e),
                }
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        match &failure {
            None => info!("✓ {} ({} ms)", spec.name, duration_ms),
            Some(e) => error!("✗ {} - {}", spec.name, e),
        }

        Ok(VerificationReport {
            name: spec.name.clone(),
            success: failure.is_none(),
            started_at,
            duration_ms,
            steps,
            intercepted,
            visual,
            error: failure.map(|e| e.to_string()),
        })
    }

    /// Generate missing upload files and sanity-check mocked receipts
    fn prepare_inputs(&self, spec: &TestSpec) -> E2eResult<()> {
        for step in &spec.steps {
            match step {
                TestStep::Upload { files, .. } => {
                    for file in files {
                        ensure_dummy_receipt(&self.resolve(file))?;
                    }
                }
                TestStep::Intercept { response, .. } => {
                    let receipt = &response.receipt;
                    if (receipt.items_sum() - receipt.total).abs() > 0.005 {
                        warn!(
                            "Mocked receipt total {:.2} differs from item sum {:.2}",
                            receipt.total,
                            receipt.items_sum()
                        );
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn resolve_visual_config(&self) -> VisualConfig {
        VisualConfig {
            baseline_dir: self.resolve(&self.config.visual.baseline_dir),
            diff_dir: self.resolve(&self.config.visual.diff_dir),
            ..self.config.visual.clone()
        }
    }

    /// Copy the last screenshot a scenario took over its baseline
    pub fn update_baseline(&self, report: &VerificationReport) -> E2eResult<PathBuf> {
        let shot = report
            .steps
            .iter()
            .rev()
            .find_map(|s| s.screenshot_path.as_deref())
            .ok_or_else(|| {
                E2eError::VisualRegression(format!(
                    "Cannot update baseline: scenario '{}' took no screenshot",
                    report.name
                ))
            })?;

        let tester = VisualTester::new(self.resolve_visual_config())?;
        tester.update_baseline(&self.resolve(shot))
    }

    /// Write a report to `<output_dir>/<name>.json`
    pub fn write_report(&self, report: &VerificationReport) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        let path = self.config.output_dir.join(format!("{}.json", report.name));
        std::fs::write(&path, serde_json::to_string_pretty(report)?)?;

        info!("Report written to: {}", path.display());
        Ok(path)
    }
}

impl Drop for VerificationRunner {
    fn drop(&mut self) {
        let _ = self.stop_server();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner_in(dir: &Path) -> VerificationRunner {
        VerificationRunner::new(RunnerConfig {
            output_dir: dir.join("results"),
            working_dir: dir.to_path_buf(),
            ..Default::default()
        })
    }

    #[test]
    fn test_prepare_inputs_generates_upload_file() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_in(dir.path());
        let spec = runner.scenario();

        runner.prepare_inputs(&spec).unwrap();
        assert!(dir.path().join("verification/dummy_receipt.png").exists());
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_in(dir.path());
        let report = VerificationReport {
            name: "receipt-grid".to_string(),
            success: false,
            started_at: Utc::now(),
            duration_ms: 12,
            steps: vec![],
            intercepted: vec![],
            visual: None,
            error: Some("Step failed: click:button \"Save All\" - Timeout".to_string()),
        };

        let path = runner.write_report(&report).unwrap();
        assert_eq!(path, dir.path().join("results/receipt-grid.json"));

        let parsed: VerificationReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(!parsed.success);
        assert!(parsed.error.unwrap().contains("Save All"));
    }

    fn report_with_steps(steps: Vec<StepResult>) -> VerificationReport {
        VerificationReport {
            name: "receipt-grid".to_string(),
            success: true,
            started_at: Utc::now(),
            duration_ms: 1,
            steps,
            intercepted: vec![],
            visual: None,
            error: None,
        }
    }

    fn screenshot_step(path: PathBuf) -> StepResult {
        StepResult {
            success: true,
            step_name: "screenshot".to_string(),
            duration_ms: 1,
            error: None,
            screenshot_path: Some(path),
            class_attr: None,
        }
    }

    #[test]
    fn test_update_baseline_without_screenshot_fails() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_in(dir.path());
        let err = runner.update_baseline(&report_with_steps(vec![])).unwrap_err();
        assert!(matches!(err, E2eError::VisualRegression(_)));
    }

    #[test]
    fn test_update_baseline_uses_the_reported_screenshot() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_in(dir.path());
        let shot = dir.path().join("elsewhere/grid.png");
        ensure_dummy_receipt(&shot).unwrap();

        let report = report_with_steps(vec![screenshot_step(PathBuf::from("elsewhere/grid.png"))]);
        let baseline = runner.update_baseline(&report).unwrap();

        assert_eq!(baseline, dir.path().join("verification/baselines/grid.png"));
        assert_eq!(std::fs::read(&baseline).unwrap(), std::fs::read(&shot).unwrap());
    }

    #[test]
    fn test_select_builtin_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_in(dir.path());

        let specs = runner.select_specs(None, None).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(runner.select_specs(None, Some("smoke")).unwrap().len(), 1);
    }

    #[test]
    fn test_select_unknown_tag_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_in(dir.path());

        let err = runner.select_specs(None, Some("nightly")).unwrap_err();
        assert!(matches!(&err, E2eError::InvalidConfig(msg) if msg.contains("nightly")));
        assert!(!err.is_verification_failure());
    }

    #[test]
    fn test_select_empty_directory_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_in(dir.path());
        let scenarios = dir.path().join("scenarios");
        std::fs::create_dir_all(&scenarios).unwrap();

        let err = runner.select_specs(Some(&scenarios), None).unwrap_err();
        assert!(matches!(&err, E2eError::InvalidConfig(msg) if msg.contains("scenarios")));
    }

    #[tokio::test]
    async fn test_run_specs_rejects_empty_selection() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = runner_in(dir.path());

        let err = runner.run_specs(&[]).await.unwrap_err();
        assert!(matches!(err, E2eError::InvalidConfig(_)));
        assert!(!dir.path().join("results").exists());
    }

    #[tokio::test]
    async fn test_unreachable_app_is_a_harness_error() {
        let dir = tempfile::tempdir().unwrap();
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut config = RunnerConfig {
            output_dir: dir.path().join("results"),
            working_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        config.playwright.base_url = format!("http://127.0.0.1:{}/", port);
        config.server.startup_timeout = std::time::Duration::from_millis(300);

        let mut runner = VerificationRunner::new(config);
        let err = runner.run().await.unwrap_err();
        assert!(matches!(err, E2eError::AppUnreachable { .. }));
        assert!(!err.is_verification_failure());
    }
}
