//! Generated programs run under node against a stand-in `playwright` module
//! (tests/support/playwright-stub.js). Skipped when `node` is not installed.

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use receipt_grid_e2e::playwright::{PlaywrightConfig, PlaywrightHandle};
use receipt_grid_e2e::runner::RunnerConfig;
use receipt_grid_e2e::scenario::{negative_amount_rule, positive_amount_rule, receipt_grid, ScenarioOptions};
use receipt_grid_e2e::spec::{ClassRule, Target, Viewport};
use receipt_grid_e2e::{E2eError, ReceiptSummary, TestSpec, TestStep, VerificationRunner};

const PLAYWRIGHT_STUB: &str = include_str!("support/playwright-stub.js");

fn node_available() -> bool {
    std::process::Command::new("node")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Working directory with the stand-in module under `node_modules`
fn stub_workspace(classes: &[(&str, &str)], hang: bool) -> Option<TempDir> {
    if !node_available() {
        eprintln!("node not installed, skipping");
        return None;
    }

    let dir = tempfile::tempdir().unwrap();
    let module = dir.path().join("node_modules/playwright");
    std::fs::create_dir_all(&module).unwrap();
    std::fs::write(module.join("index.js"), PLAYWRIGHT_STUB).unwrap();
    write_settings(dir.path(), classes, hang);
    Some(dir)
}

fn write_settings(dir: &Path, classes: &[(&str, &str)], hang: bool) {
    let classes: serde_json::Map<String, Value> = classes
        .iter()
        .map(|(text, class)| (text.to_string(), Value::from(*class)))
        .collect();
    let settings = json!({ "hang": hang, "classes": classes });
    std::fs::write(dir.join("stub.json"), settings.to_string()).unwrap();
}

fn recorded_events(dir: &Path) -> Vec<Value> {
    std::fs::read_to_string(dir.join("events.jsonl"))
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn playwright_config(dir: &Path) -> PlaywrightConfig {
    PlaywrightConfig {
        base_url: "http://127.0.0.1:9/".to_string(),
        working_dir: dir.to_path_buf(),
        run_timeout: Some(Duration::from_secs(30)),
        ..Default::default()
    }
}

const GOOD_CLASSES: [(&str, &str); 2] = [
    ("-2.00", "px-2 text-right text-green-600"),
    ("5.00", "px-2 text-right"),
];

#[tokio::test]
async fn receipt_grid_completes_and_mocks_ocr() {
    let Some(dir) = stub_workspace(&GOOD_CLASSES, false) else {
        return;
    };
    let spec = receipt_grid(&ScenarioOptions::default());
    let handle = PlaywrightHandle::new(playwright_config(dir.path())).unwrap();

    let outcome = handle.run(&spec).await.unwrap();

    assert!(outcome.completed, "run failed: {:?}", outcome.failure());
    assert!(outcome.failure().is_none());
    assert_eq!(outcome.steps.len(), spec.steps.len());
    assert!(outcome.steps.iter().all(|s| s.success));
    assert!(dir.path().join("verification/verification.png").exists());

    // The preflight is answered but not counted as an OCR call
    assert_eq!(outcome.intercepted.len(), 1);
    assert_eq!(outcome.intercepted[0].method, "POST");

    let events = recorded_events(dir.path());
    let fulfilled = |method: &str| {
        events
            .iter()
            .find(|e| e["kind"] == "fulfill" && e["method"] == method)
            .cloned()
            .unwrap_or_else(|| panic!("no {} fulfilment", method))
    };

    let preflight = fulfilled("OPTIONS");
    assert_eq!(preflight["status"], 204);
    assert_eq!(preflight["headers"]["Access-Control-Allow-Origin"], "*");

    let post = fulfilled("POST");
    assert_eq!(post["status"], 200);
    assert_eq!(post["contentType"], "application/json");
    assert_eq!(post["headers"]["Access-Control-Allow-Origin"], "*");
    let body: ReceiptSummary = serde_json::from_str(post["body"].as_str().unwrap()).unwrap();
    assert_eq!(body, ReceiptSummary::sample());

    assert!(events.iter().any(|e| e["kind"] == "upload"));
    assert_eq!(events.iter().filter(|e| e["kind"] == "close").count(), 1);
}

#[tokio::test]
async fn wrong_negative_styling_fails_before_screenshot() {
    let Some(dir) = stub_workspace(&[("-2.00", "font-mono"), ("5.00", "text-right")], false) else {
        return;
    };
    let spec = receipt_grid(&ScenarioOptions::default());
    let handle = PlaywrightHandle::new(playwright_config(dir.path())).unwrap();

    let outcome = handle.run(&spec).await.unwrap();
    assert!(!outcome.completed);

    match outcome.failure() {
        Some(E2eError::StepFailed { step, reason }) => {
            assert_eq!(step, "assert_classes:text=\"-2.00\"");
            assert!(reason.contains("missing text-right"), "{}", reason);
            assert!(
                reason.contains("none of [text-green-600, text-green-400] present"),
                "{}",
                reason
            );
        }
        other => panic!("unexpected failure {:?}", other),
    }

    let failed = outcome.steps.iter().find(|s| !s.success).unwrap();
    assert_eq!(failed.class_attr.as_deref(), Some("font-mono"));
    assert!(outcome.steps.iter().all(|s| s.screenshot_path.is_none()));
    assert!(!dir.path().join("verification/verification.png").exists());

    let events = recorded_events(dir.path());
    assert_eq!(events.iter().filter(|e| e["kind"] == "close").count(), 1);
}

fn class_check(rule: ClassRule) -> TestSpec {
    TestSpec {
        name: "class-check".to_string(),
        description: String::new(),
        tags: vec![],
        viewport: Viewport::default(),
        steps: vec![TestStep::AssertClasses {
            target: Target::exact_text("-2.00"),
            rule,
            timeout_ms: 1_000,
        }],
        visual_regression: false,
        visual_threshold: 0.5,
    }
}

#[tokio::test]
async fn in_browser_class_check_agrees_with_class_rule() {
    let Some(dir) = stub_workspace(&[], false) else {
        return;
    };
    let handle = PlaywrightHandle::new(playwright_config(dir.path())).unwrap();

    let cases = [
        (negative_amount_rule(), "text-right text-green-600"),
        (negative_amount_rule(), "font-mono text-green-400  text-right"),
        (negative_amount_rule(), "text-right"),
        (negative_amount_rule(), "text-green-600"),
        (negative_amount_rule(), "text-right text-green-6000"),
        (negative_amount_rule(), "text-rightx text-green-400"),
        (negative_amount_rule(), ""),
        (positive_amount_rule(), "text-right"),
        (positive_amount_rule(), "text-right text-green-400"),
    ];

    for (rule, class_attr) in cases {
        write_settings(dir.path(), &[("-2.00", class_attr)], false);
        let expected = rule.check(class_attr);

        let outcome = handle.run(&class_check(rule)).await.unwrap();

        assert_eq!(
            outcome.completed,
            expected.is_ok(),
            "class {:?}: browser and rule disagree",
            class_attr
        );
        if let Err(mismatch) = expected {
            let reason = outcome.steps[0].error.clone().unwrap();
            assert!(reason.contains(&mismatch.to_string()), "{}", reason);
        }
    }
}

#[tokio::test]
async fn hanging_browser_hits_run_timeout() {
    let Some(dir) = stub_workspace(&GOOD_CLASSES, true) else {
        return;
    };
    let config = PlaywrightConfig {
        run_timeout: Some(Duration::from_secs(1)),
        ..playwright_config(dir.path())
    };
    let handle = PlaywrightHandle::new(config).unwrap();
    let spec = receipt_grid(&ScenarioOptions::default());

    let started = Instant::now();
    let err = handle.run(&spec).await.unwrap_err();

    assert!(matches!(err, E2eError::RunTimeout(limit) if limit == Duration::from_secs(1)));
    assert!(err.is_verification_failure());
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn missing_module_is_reported_as_not_installed() {
    if !node_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let err = PlaywrightHandle::new(PlaywrightConfig {
        node_path: Some(dir.path().join("node_modules")),
        ..playwright_config(dir.path())
    })
    .err()
    .unwrap();
    assert!(matches!(err, E2eError::PlaywrightNotFound));
}

async fn serve_ok() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let response = "HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";
            let _ = socket.write_all(response.as_bytes()).await;
        }
    });
    format!("http://{}/", addr)
}

#[tokio::test]
async fn reports_before_a_harness_error_are_kept() {
    let Some(dir) = stub_workspace(&GOOD_CLASSES, false) else {
        return;
    };

    let mut config = RunnerConfig {
        output_dir: dir.path().join("results"),
        working_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    config.playwright = PlaywrightConfig {
        base_url: serve_ok().await,
        ..playwright_config(dir.path())
    };
    let mut runner = VerificationRunner::new(config);

    let mut first = runner.scenario();
    first.name = "first".to_string();

    // The upload file cannot be created because its parent is a regular file
    std::fs::write(dir.path().join("blocker"), "").unwrap();
    let mut second = runner.scenario();
    second.name = "second".to_string();
    for step in &mut second.steps {
        if let TestStep::Upload { files, .. } = step {
            *files = vec![PathBuf::from("blocker/receipt.png")];
        }
    }

    let err = runner.run_specs(&[first, second]).await.unwrap_err();
    assert!(matches!(err, E2eError::Io(_)));

    let written = dir.path().join("results/first.json");
    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(written).unwrap()).unwrap();
    assert_eq!(report["success"], true);
    assert!(!dir.path().join("results/second.json").exists());
}
