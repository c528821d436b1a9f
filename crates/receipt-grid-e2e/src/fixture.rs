//! Canned OCR response served in place of the real backend

use serde::{Deserialize, Serialize};

use crate::error::E2eResult;

/// One parsed receipt line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    pub price: f64,
    pub quantity: u32,
}

impl LineItem {
    pub fn new(name: impl Into<String>, price: f64, quantity: u32) -> Self {
        Self {
            name: name.into(),
            price,
            quantity,
        }
    }

    /// Amount as the grid renders it, two decimals with a leading minus for
    /// adjustments.
    pub fn display_amount(&self) -> String {
        format!("{:.2}", self.price)
    }

    pub fn is_negative(&self) -> bool {
        self.price < 0.0
    }
}

/// Body returned by the OCR endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptSummary {
    pub items: Vec<LineItem>,
    #[serde(default)]
    pub other_charges: Vec<LineItem>,
    pub total: f64,
    pub currency: String,
}

impl ReceiptSummary {
    /// Coffee, a discount and tax, totalling 3.50 USD.
    pub fn sample() -> Self {
        Self {
            items: vec![
                LineItem::new("Coffee", 5.00, 1),
                LineItem::new("Discount", -2.00, 1),
                LineItem::new("Tax", 0.50, 1),
            ],
            other_charges: vec![],
            total: 3.50,
            currency: "USD".to_string(),
        }
    }

    pub fn to_json_body(&self) -> E2eResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Sum of price times quantity over items and other charges.
    pub fn items_sum(&self) -> f64 {
        self.items
            .iter()
            .chain(self.other_charges.iter())
            .map(|i| i.price * f64::from(i.quantity))
            .sum()
    }

    pub fn first_negative(&self) -> Option<&LineItem> {
        self.items.iter().find(|i| i.is_negative())
    }

    pub fn first_positive(&self) -> Option<&LineItem> {
        self.items.iter().find(|i| !i.is_negative())
    }
}
