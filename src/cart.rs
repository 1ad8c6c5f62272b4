//! Client-held shopping cart state.
//!
//! The cart never round-trips to the server: the storefront client owns it,
//! persists it to local durable storage between page loads, and hands its
//! contents to `CheckoutService::create_session` when the customer starts
//! checkout. From that point the server-side session is authoritative and
//! the cart is only a cache.
//!
//! `Cart` is a plain value passed explicitly by its owner — construct one
//! per signed-in scope and drop it on sign-out. There is no process-global
//! cart.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ServiceError;

/// A selected modifier choice, e.g. group "Spice level", choice "Mala",
/// with an optional price delta already folded into the line's unit price.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedModifier {
    pub group: String,
    pub choice: String,
}

/// One cart line. `unit_price` includes any modifier price deltas.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: Uuid,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: u32,
    pub image_url: Option<String>,
    #[serde(default)]
    pub customizations: Vec<SelectedModifier>,
}

impl CartLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }

    /// Lines merge when they reference the same product with the same
    /// customization choices.
    fn merges_with(&self, other: &CartLine) -> bool {
        self.product_id == other.product_id && self.customizations == other.customizations
    }
}

/// Single-merchant shopping cart.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    merchant_id: Option<Uuid>,
    merchant_name: Option<String>,
    lines: Vec<CartLine>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merchant_id(&self) -> Option<Uuid> {
        self.merchant_id
    }

    pub fn merchant_name(&self) -> Option<&str> {
        self.merchant_name.as_deref()
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Add a line, merging with an existing line for the same product and
    /// customizations. Fails with `MerchantMismatch` — leaving the cart
    /// untouched — when the cart already holds another merchant's items.
    pub fn add_item(
        &mut self,
        merchant_id: Uuid,
        merchant_name: &str,
        line: CartLine,
    ) -> Result<(), ServiceError> {
        if line.quantity == 0 {
            return Err(ServiceError::ValidationError(
                "quantity must be at least 1".to_string(),
            ));
        }

        if let Some(current) = self.merchant_id {
            if current != merchant_id {
                return Err(ServiceError::MerchantMismatch(format!(
                    "cart belongs to {}; clear it before ordering from {}",
                    self.merchant_name.as_deref().unwrap_or("another merchant"),
                    merchant_name
                )));
            }
        } else {
            self.merchant_id = Some(merchant_id);
            self.merchant_name = Some(merchant_name.to_string());
        }

        if let Some(existing) = self.lines.iter_mut().find(|l| l.merges_with(&line)) {
            existing.quantity += line.quantity;
        } else {
            self.lines.push(line);
        }
        Ok(())
    }

    /// Set a line's quantity; zero removes the line. The merchant binding
    /// is released when the last line goes.
    pub fn set_quantity(&mut self, product_id: Uuid, quantity: u32) {
        if quantity == 0 {
            self.lines.retain(|l| l.product_id != product_id);
        } else if let Some(line) = self.lines.iter_mut().find(|l| l.product_id == product_id) {
            line.quantity = quantity;
        }
        if self.lines.is_empty() {
            self.merchant_id = None;
            self.merchant_name = None;
        }
    }

    /// Empty the cart and detach the merchant. Idempotent.
    pub fn clear(&mut self) {
        self.lines.clear();
        self.merchant_id = None;
        self.merchant_name = None;
    }

    pub fn subtotal(&self) -> Decimal {
        self.lines.iter().map(CartLine::line_total).sum()
    }

    pub fn item_count(&self) -> u32 {
        self.lines.iter().map(|l| l.quantity).sum()
    }
}
