use serde::{Deserialize, Serialize};

use common::{Money, ProductId};

/// A product in the catalog.
///
/// `stock` is mutated only by the settlement transaction, under row-level
/// exclusion; the store enforces it never drops below zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub stock: u32,
    pub category: String,
}

impl Product {
    /// Creates a new product.
    pub fn new(
        id: impl Into<ProductId>,
        name: impl Into<String>,
        price: Money,
        stock: u32,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            stock,
            category: category.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction() {
        let product = Product::new(1, "Widget", Money::from_cents(999), 5, "tools");
        assert_eq!(product.id, ProductId::new(1));
        assert_eq!(product.stock, 5);
        assert_eq!(product.price.cents(), 999);
    }
}
