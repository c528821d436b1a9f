//! Receipt grid end-to-end verification
//!
//! Drives a browser through the receipt upload workflow of the web client:
//! - Waits for (or starts) the application
//! - Mocks the OCR endpoint with a fixed receipt
//! - Uploads a dummy image and saves the parsed items
//! - Asserts the grid shows the items with the expected amount styling
//! - Captures a full-page screenshot, optionally compared to a baseline
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  VerificationRunner (Rust)                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │    ├── prepare_app() -> ServerHandle | reachability probe   │
//! │    ├── run_spec(spec) -> VerificationReport                 │
//! │    │     └── PlaywrightHandle::run -> ScriptOutcome         │
//! │    │           (one Node program, @@verify event lines)     │
//! │    └── VisualTester::compare(screenshot, baseline)          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestSpec (built in, or YAML)                               │
//! │    └── steps: navigate | click | intercept | upload |       │
//! │               expect_visible | assert_classes | screenshot  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod assets;
pub mod config;
pub mod error;
pub mod fixture;
pub mod playwright;
pub mod runner;
pub mod scenario;
pub mod server;
pub mod spec;
pub mod visual;

pub use config::VerifyConfig;
pub use error::{E2eError, E2eResult};
pub use fixture::{LineItem, ReceiptSummary};
pub use runner::{VerificationReport, VerificationRunner};
pub use spec::{TestSpec, TestStep};
