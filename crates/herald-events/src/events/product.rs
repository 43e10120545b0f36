//! Product catalogue events.

use crate::event::Event;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Published by the catalogue service when a product is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductCreated {
    pub product_id: String,
    pub title: String,
    pub price: Decimal,
    pub quantity: i32,
}

impl Event for ProductCreated {
    const TOPIC: &'static str = "products-created-events-topic";
    const EVENT_TYPE: &'static str = "herald.product.created";

    fn subject_id(&self) -> String {
        self.product_id.clone()
    }

    fn summary(&self) -> Option<String> {
        Some(self.title.clone())
    }
}
