//! Playwright browser automation
//!
//! A scenario is rendered into one Node program that shares a single browser
//! and page across all steps. The program reports progress as `@@verify {json}`
//! lines on stdout, which are folded into per-step results here.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command as TokioCommand;
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};
use crate::spec::{TestSpec, TestStep};

const EVENT_MARKER: &str = "@@verify";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

impl std::str::FromStr for Browser {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" => Ok(Browser::Webkit),
            other => Err(E2eError::InvalidConfig(format!("unknown browser '{}'", other))),
        }
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    /// Root URL of the application under test
    pub base_url: String,
    pub browser: Browser,
    pub headless: bool,
    /// Directory relative paths in the scenario are resolved against
    pub working_dir: PathBuf,
    /// `node_modules` containing `playwright`; defaults to `<working_dir>/node_modules`
    pub node_path: Option<PathBuf>,
    /// Upper bound on the whole run; unbounded when `None`
    pub run_timeout: Option<Duration>,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5173".to_string(),
            browser: Browser::Chromium,
            headless: true,
            working_dir: PathBuf::from("."),
            node_path: None,
            run_timeout: None,
        }
    }
}

/// Result of executing a scenario step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    pub step_name: String,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub screenshot_path: Option<PathBuf>,
    /// Class attribute observed by a class assertion
    pub class_attr: Option<String>,
}

/// A request fulfilled by an intercept step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterceptedRequest {
    pub url: String,
    pub method: String,
}

/// Progress line emitted by the generated program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScriptEvent {
    StepStarted {
        index: usize,
        name: String,
    },
    StepPassed {
        index: usize,
        name: String,
        duration_ms: u64,
    },
    StepFailed {
        index: usize,
        name: String,
        error: String,
        duration_ms: u64,
    },
    Intercepted {
        url: String,
        method: String,
    },
    Attribute {
        index: usize,
        name: String,
        value: Option<String>,
    },
    Log {
        message: String,
    },
    Finished {
        success: bool,
        #[serde(default)]
        error: Option<String>,
    },
}

fn event_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^@@verify (\{.*\})\s*$").expect("event regex is valid"))
}

/// Parse one stdout line. `None` for lines that are not events.
pub fn parse_event_line(line: &str) -> Option<E2eResult<ScriptEvent>> {
    let caps = event_regex().captures(line)?;
    Some(serde_json::from_str(&caps[1]).map_err(E2eError::from))
}

/// Folds script events into step results
#[derive(Debug)]
pub struct EventCollector {
    steps: Vec<TestStep>,
    results: Vec<StepResult>,
    attributes: Vec<Option<String>>,
    intercepted: Vec<InterceptedRequest>,
    finished: Option<bool>,
    script_error: Option<String>,
}

impl EventCollector {
    pub fn new(spec: &TestSpec) -> Self {
        Self {
            steps: spec.steps.clone(),
            results: Vec::new(),
            attributes: vec![None; spec.steps.len()],
            intercepted: Vec::new(),
            finished: None,
            script_error: None,
        }
    }

    pub fn apply(&mut self, event: ScriptEvent) {
        match event {
            ScriptEvent::StepStarted { index, name } => {
                debug!("Step {} started: {}", index + 1, name);
            }
            ScriptEvent::StepPassed { index, name, duration_ms } => {
                info!("✓ {} ({} ms)", name, duration_ms);
                let screenshot_path = match self.steps.get(index) {
                    Some(TestStep::Screenshot { path, .. }) => Some(path.clone()),
                    _ => None,
                };
                let class_attr = self.attribute(index);
                self.results.push(StepResult {
                    success: true,
                    step_name: name,
                    duration_ms,
                    error: None,
                    screenshot_path,
                    class_attr,
                });
            }
            ScriptEvent::StepFailed { index, name, error, duration_ms } => {
                let reason = self.explain_failure(index, error);
                warn!("✗ {}: {}", name, reason);
                let class_attr = self.attribute(index);
                self.results.push(StepResult {
                    success: false,
                    step_name: name,
                    duration_ms,
                    error: Some(reason),
                    screenshot_path: None,
                    class_attr,
                });
            }
            ScriptEvent::Intercepted { url, method } => {
                info!("Intercepted {} {}", method, url);
                self.intercepted.push(InterceptedRequest { url, method });
            }
            ScriptEvent::Attribute { index, name, value } => {
                debug!("Step {} {}={:?}", index + 1, name, value);
                if let Some(slot) = self.attributes.get_mut(index) {
                    *slot = Some(value.unwrap_or_default());
                }
            }
            ScriptEvent::Log { message } => {
                info!("[scenario] {}", message);
            }
            ScriptEvent::Finished { success, error } => {
                self.finished = Some(success);
                self.script_error = error;
            }
        }
    }

    fn attribute(&self, index: usize) -> Option<String> {
        self.attributes.get(index).cloned().flatten()
    }

    /// Class assertion failures are re-derived from the observed attribute so
    /// the diagnostic names exactly which tokens were wrong.
    fn explain_failure(&self, index: usize, error: String) -> String {
        match (self.steps.get(index), self.attribute(index)) {
            (Some(TestStep::AssertClasses { rule, .. }), Some(class_attr)) => {
                match rule.check(&class_attr) {
                    Err(mismatch) => format!("class \"{}\": {}", class_attr, mismatch),
                    Ok(()) => error,
                }
            }
            _ => error,
        }
    }

    pub fn finish(self, exit_success: bool, stderr: String) -> ScriptOutcome {
        ScriptOutcome {
            steps: self.results,
            intercepted: self.intercepted,
            completed: self.finished == Some(true) && exit_success,
            script_error: self.script_error,
            stderr,
        }
    }
}

/// Everything observed while running a scenario
#[derive(Debug, Clone)]
pub struct ScriptOutcome {
    pub steps: Vec<StepResult>,
    pub intercepted: Vec<InterceptedRequest>,
    /// The program reported success and exited cleanly
    pub completed: bool,
    pub script_error: Option<String>,
    pub stderr: String,
}

impl ScriptOutcome {
    /// The error that ended the run, if it did not complete
    pub fn failure(&self) -> Option<E2eError> {
        if self.completed {
            return None;
        }

        if let Some(step) = self.steps.iter().find(|s| !s.success) {
            return Some(E2eError::StepFailed {
                step: step.step_name.clone(),
                reason: step.error.clone().unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        let detail = self
            .script_error
            .clone()
            .unwrap_or_else(|| self.stderr.trim().to_string());
        Some(E2eError::Playwright(if detail.is_empty() {
            "script exited without reporting completion".to_string()
        } else {
            detail
        }))
    }
}

/// Playwright browser handle
pub struct PlaywrightHandle {
    config: PlaywrightConfig,
}

impl PlaywrightHandle {
    /// Create a new Playwright handle, verifying the toolchain is present
    pub fn new(config: PlaywrightConfig) -> E2eResult<Self> {
        let handle = Self::unchecked(config);
        handle.check_playwright_installed()?;
        Ok(handle)
    }

    /// Create a handle without probing for Playwright
    pub fn unchecked(config: PlaywrightConfig) -> Self {
        Self { config }
    }

    /// Check that the `node` used for runs can load `playwright`
    fn check_playwright_installed(&self) -> E2eResult<()> {
        let mut cmd = Command::new("node");
        cmd.args(["-e", "require.resolve('playwright')"])
            .current_dir(&self.config.working_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(node_path) = self.node_path() {
            cmd.env("NODE_PATH", node_path);
        }

        match cmd.status() {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config.working_dir.join(path)
        }
    }

    /// Rewrite relative file paths against the working directory
    pub fn resolve_spec(&self, spec: &TestSpec) -> TestSpec {
        let mut resolved = spec.clone();
        for step in &mut resolved.steps {
            match step {
                TestStep::Upload { files, .. } => {
                    *files = files.iter().map(|f| self.resolve(f)).collect();
                }
                TestStep::Screenshot { path, .. } => {
                    *path = self.resolve(path);
                }
                _ => {}
            }
        }
        resolved
    }

    fn node_path(&self) -> Option<PathBuf> {
        self.config.node_path.clone().or_else(|| {
            let candidate = self.config.working_dir.join("node_modules");
            candidate.is_dir().then_some(candidate)
        })
    }

    /// Build the Playwright program for a scenario
    pub fn build_script(&self, spec: &TestSpec) -> E2eResult<String> {
        let spec = self.resolve_spec(spec);
        let mut script = String::new();

        script.push_str(&format!(
            r#"const {{ chromium, firefox, webkit }} = require('playwright');

const emit = (event) => console.log('{marker} ' + JSON.stringify(event));

const locate = (page, target) => {{
  switch (target.by) {{
    case 'text': return page.getByText(target.text, {{ exact: !!target.exact }});
    case 'role': return page.getByRole(target.role, {{ name: target.name }});
    case 'css': return page.locator(target.selector);
    default: throw new Error('unknown target ' + JSON.stringify(target));
  }}
}};

const classProblems = (attr, rule) => {{
  const tokens = (attr || '').split(/\s+/).filter(Boolean);
  const problems = [];
  const missing = rule.all_of.filter((t) => !tokens.includes(t));
  if (missing.length) problems.push('missing ' + missing.join(', '));
  if (rule.any_of.length && !rule.any_of.some((t) => tokens.includes(t))) {{
    problems.push('none of [' + rule.any_of.join(', ') + '] present');
  }}
  const forbidden = rule.none_of.filter((t) => tokens.includes(t));
  if (forbidden.length) problems.push('unexpected ' + forbidden.join(', '));
  return problems;
}};

const step = async (index, name, body) => {{
  const started = Date.now();
  emit({{ type: 'step_started', index, name }});
  try {{
    await body();
  }} catch (error) {{
    emit({{ type: 'step_failed', index, name, error: String((error && error.message) || error), duration_ms: Date.now() - started }});
    throw error;
  }}
  emit({{ type: 'step_passed', index, name, duration_ms: Date.now() - started }});
}};

(async () => {{
  let browser;
  let failed = false;
  try {{
    browser = await {browser}.launch({{ headless: {headless} }});
    const context = await browser.newContext({{
      viewport: {{ width: {width}, height: {height} }}
    }});
    const page = await context.newPage();
    const baseUrl = {base_url};
"#,
            marker = EVENT_MARKER,
            browser = self.config.browser.as_str(),
            headless = self.config.headless,
            width = spec.viewport.width,
            height = spec.viewport.height,
            base_url = js(&self.config.base_url)?,
        ));

        for (i, step) in spec.steps.iter().enumerate() {
            let name = step.name();
            script.push_str(&format!("\n    // Step {}: {}\n", i + 1, name));
            script.push_str(&format!(
                "    await step({}, {}, async () => {{\n{}\n    }});\n",
                i,
                js(&name)?,
                self.step_to_js(step, i)?
            ));
        }

        script.push_str(
            r#"
    emit({ type: 'finished', success: true });
  } catch (error) {
    failed = true;
    emit({ type: 'finished', success: false, error: String((error && error.message) || error) });
  } finally {
    if (browser) await browser.close();
  }
  if (failed) process.exit(1);
})();
"#,
        );

        Ok(script)
    }

    /// Body of one step, run inside `step(...)`
    fn step_to_js(&self, step: &TestStep, index: usize) -> E2eResult<String> {
        let code = match step {
            TestStep::Navigate { url, wait_for, timeout_ms } => {
                let mut code = format!("      await page.goto(new URL({}, baseUrl).href);", js(url)?);
                if let Some(target) = wait_for {
                    code.push_str(&format!(
                        "\n      await locate(page, {}).waitFor({{ state: 'visible', timeout: {} }});",
                        js(target)?,
                        timeout_ms
                    ));
                }
                code
            }
            TestStep::Click { target, timeout_ms } => format!(
                r#"      const target = locate(page, {});
      await target.waitFor({{ state: 'visible', timeout: {} }});
      await target.click();"#,
                js(target)?,
                timeout_ms
            ),
            TestStep::Intercept { pattern, response } => {
                let body = response.receipt.to_json_body()?;
                format!(
                    r#"      await page.route({pattern}, async (route) => {{
        const request = route.request();
        if (request.method() === 'OPTIONS') {{
          await route.fulfill({{
            status: 204,
            headers: {{
              'Access-Control-Allow-Origin': '*',
              'Access-Control-Allow-Methods': 'GET, POST, OPTIONS',
              'Access-Control-Allow-Headers': '*'
            }}
          }});
          return;
        }}
        emit({{ type: 'intercepted', url: request.url(), method: request.method() }});
        await route.fulfill({{
          status: {status},
          contentType: {content_type},
          headers: {headers},
          body: {body}
        }});
      }});"#,
                    pattern = js(pattern)?,
                    status = response.status,
                    content_type = js(&response.content_type)?,
                    headers = js(&response.headers)?,
                    body = js(&body)?,
                )
            }
            TestStep::Upload { trigger, files } => format!(
                r#"      const [chooser] = await Promise.all([
        page.waitForEvent('filechooser'),
        locate(page, {}).click(),
      ]);
      await chooser.setFiles({});"#,
                js(trigger)?,
                js(files)?
            ),
            TestStep::ExpectVisible { target, timeout_ms } => format!(
                "      await locate(page, {}).waitFor({{ state: 'visible', timeout: {} }});",
                js(target)?,
                timeout_ms
            ),
            TestStep::AssertClasses { target, rule, timeout_ms } => format!(
                r#"      const target = locate(page, {target});
      await target.waitFor({{ state: 'visible', timeout: {timeout} }});
      const classes = await target.getAttribute('class');
      emit({{ type: 'attribute', index: {index}, name: 'class', value: classes }});
      const problems = classProblems(classes, {rule});
      if (problems.length) throw new Error('class "' + (classes || '') + '": ' + problems.join('; '));"#,
                target = js(target)?,
                timeout = timeout_ms,
                index = index,
                rule = js(rule)?,
            ),
            TestStep::Screenshot { path, full_page } => format!(
                "      await page.screenshot({{ path: {}, fullPage: {} }});",
                js(path)?,
                full_page
            ),
            TestStep::Log { message } => {
                format!("      emit({{ type: 'log', message: {} }});", js(message)?)
            }
        };
        Ok(code)
    }

    /// Run a scenario to completion and collect what happened
    pub async fn run(&self, spec: &TestSpec) -> E2eResult<ScriptOutcome> {
        let resolved = self.resolve_spec(spec);
        let script = self.build_script(&resolved)?;

        for step in &resolved.steps {
            if let TestStep::Screenshot { path, .. } = step {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let temp_dir = tempfile::tempdir()?;
        let script_path = temp_dir.path().join(format!("{}.js", spec.name));
        std::fs::write(&script_path, &script)?;

        debug!("Running Playwright script: {}", script_path.display());

        let mut cmd = TokioCommand::new("node");
        cmd.arg(&script_path)
            .current_dir(&self.config.working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(node_path) = self.node_path() {
            cmd.env("NODE_PATH", node_path);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| E2eError::Playwright(format!("Failed to spawn node: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| E2eError::Playwright("node stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| E2eError::Playwright("node stderr not captured".to_string()))?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = BufReader::new(stderr).read_to_string(&mut buf).await;
            buf
        });

        let mut collector = EventCollector::new(&resolved);
        let drive = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                match parse_event_line(&line) {
                    Some(Ok(event)) => collector.apply(event),
                    Some(Err(e)) => warn!("Unreadable event line {:?}: {}", line, e),
                    None => debug!("node: {}", line),
                }
            }
            Ok::<_, E2eError>(child.wait().await?)
        };

        let status = match self.config.run_timeout {
            Some(limit) => {
                let waited = tokio::time::timeout(limit, drive).await;
                match waited {
                    Ok(status) => status?,
                    Err(_) => {
                        let _ = child.kill().await;
                        return Err(E2eError::RunTimeout(limit));
                    }
                }
            }
            None => drive.await?,
        };

        let stderr = stderr_task.await.unwrap_or_default();
        if !stderr.trim().is_empty() {
            debug!("node stderr:\n{}", stderr);
        }

        Ok(collector.finish(status.success(), stderr))
    }
}

/// Serialize a value as a JavaScript literal
fn js<T: Serialize + ?Sized>(value: &T) -> E2eResult<String> {
    Ok(serde_json::to_string(value)?)
}
