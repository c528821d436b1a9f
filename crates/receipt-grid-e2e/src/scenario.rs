//! The receipt upload to grid scenario

use std::path::PathBuf;

use crate::fixture::ReceiptSummary;
use crate::spec::{ClassRule, MockResponse, TestSpec, TestStep, Target, Viewport};

pub const SCENARIO_NAME: &str = "receipt-grid";
pub const OCR_ROUTE: &str = "**/api/ocr";
pub const UPLOAD_TRIGGER_TEXT: &str = "Click to upload";
pub const DROPZONE_LABEL: &str = "label[for='dropzone-file']";
pub const PROCESS_BUTTON: &str = "Process 1 File";
pub const SAVE_BUTTON: &str = "Save All";

/// Either shade marks a negative amount
pub const NEGATIVE_AMOUNT_CLASSES: [&str; 2] = ["text-green-600", "text-green-400"];
pub const AMOUNT_ALIGNMENT_CLASS: &str = "text-right";

/// Inputs that vary between environments
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioOptions {
    pub receipt: ReceiptSummary,
    pub dummy_image: PathBuf,
    pub screenshot_path: PathBuf,
    pub viewport: Viewport,
    pub visual_regression: bool,
    pub visual_threshold: f64,
    pub save_timeout_ms: u64,
    pub grid_timeout_ms: u64,
}

impl Default for ScenarioOptions {
    fn default() -> Self {
        Self {
            receipt: ReceiptSummary::sample(),
            dummy_image: PathBuf::from("verification/dummy_receipt.png"),
            screenshot_path: PathBuf::from("verification/verification.png"),
            viewport: Viewport::default(),
            visual_regression: false,
            visual_threshold: 0.5,
            save_timeout_ms: 10_000,
            grid_timeout_ms: 10_000,
        }
    }
}

pub fn negative_amount_rule() -> ClassRule {
    ClassRule {
        all_of: vec![AMOUNT_ALIGNMENT_CLASS.to_string()],
        any_of: NEGATIVE_AMOUNT_CLASSES.iter().map(|c| c.to_string()).collect(),
        none_of: vec![],
    }
}

pub fn positive_amount_rule() -> ClassRule {
    ClassRule {
        all_of: vec![AMOUNT_ALIGNMENT_CLASS.to_string()],
        any_of: vec![],
        none_of: NEGATIVE_AMOUNT_CLASSES.iter().map(|c| c.to_string()).collect(),
    }
}

/// Open the modal, mock OCR, upload, save, then check the grid.
pub fn receipt_grid(options: &ScenarioOptions) -> TestSpec {
    let receipt = &options.receipt;
    let mut steps = vec![
        TestStep::Navigate {
            url: "/".to_string(),
            wait_for: Some(Target::exact_text(UPLOAD_TRIGGER_TEXT)),
            timeout_ms: 10_000,
        },
        TestStep::Click {
            target: Target::exact_text(UPLOAD_TRIGGER_TEXT),
            timeout_ms: 5_000,
        },
        TestStep::Intercept {
            pattern: OCR_ROUTE.to_string(),
            response: MockResponse::json(receipt.clone()),
        },
        TestStep::Upload {
            trigger: Target::css(DROPZONE_LABEL),
            files: vec![options.dummy_image.clone()],
        },
        TestStep::Click {
            target: Target::button(PROCESS_BUTTON),
            timeout_ms: 5_000,
        },
        TestStep::Click {
            target: Target::button(SAVE_BUTTON),
            timeout_ms: options.save_timeout_ms,
        },
    ];

    if let Some(first) = receipt.items.first() {
        steps.push(TestStep::ExpectVisible {
            target: Target::text(first.name.clone()),
            timeout_ms: options.grid_timeout_ms,
        });
    }

    if let Some(negative) = receipt.first_negative() {
        steps.push(TestStep::AssertClasses {
            target: Target::exact_text(negative.display_amount()),
            rule: negative_amount_rule(),
            timeout_ms: 5_000,
        });
    }

    if let Some(positive) = receipt.first_positive() {
        steps.push(TestStep::AssertClasses {
            target: Target::exact_text(positive.display_amount()),
            rule: positive_amount_rule(),
            timeout_ms: 5_000,
        });
    }

    steps.push(TestStep::Screenshot {
        path: options.screenshot_path.clone(),
        full_page: true,
    });

    TestSpec {
        name: SCENARIO_NAME.to_string(),
        description: "Upload a receipt with a mocked OCR response and check the grid".to_string(),
        tags: vec!["smoke".to_string(), "receipt".to_string()],
        viewport: options.viewport,
        steps,
        visual_regression: options.visual_regression,
        visual_threshold: options.visual_threshold,
    }
}
