//! Cart service: line management with stock checks and coupon previews.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use crate::domain::aggregates::{Cart, CartItem, CartOwner, CouponType, Product};
use crate::domain::pricing::ShippingPolicy;
use crate::domain::value_objects::{CouponCode, Quantity};
use crate::error::{EcommerceError, Result};
use crate::store::Stores;

/// A cart line joined with the current product data.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CartLine {
    pub product_id: String,
    pub quantity: u32,
    pub price: Decimal,
    pub total: Decimal,
    pub name: String,
    pub sku: String,
    pub image: Option<String>,
    pub stock: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CartView {
    pub id: Option<String>,
    pub items: Vec<CartLine>,
    pub item_count: u32,
    pub subtotal: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
}

impl CartView {
    /// Shown to callers that have neither a session nor a token yet.
    pub fn empty() -> Self {
        Self {
            id: None,
            items: vec![],
            item_count: 0,
            subtotal: Decimal::ZERO,
            shipping: Decimal::ZERO,
            total: Decimal::ZERO,
        }
    }
}

/// What a coupon would take off the current cart. Nothing is reserved.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CouponPreview {
    pub code: String,
    #[serde(rename = "type")]
    pub kind: CouponType,
    pub value: Decimal,
    pub discount: Decimal,
}

#[derive(Clone)]
pub struct CartService {
    stores: Stores,
    shipping: ShippingPolicy,
}

impl CartService {
    pub fn new(stores: Stores, shipping: ShippingPolicy) -> Self { Self { stores, shipping } }

    pub async fn get_or_create_cart(&self, owner: &CartOwner) -> Result<Cart> {
        if let Some(cart) = self.stores.carts.get_cart(owner).await? {
            return Ok(cart);
        }
        Ok(self.stores.carts.create_cart(&Cart::new(owner)).await?)
    }

    /// The owner's cart with product details. Lines whose product no longer
    /// exists are left out.
    pub async fn view(&self, owner: &CartOwner) -> Result<CartView> {
        let cart = self.get_or_create_cart(owner).await?;

        let mut items = Vec::with_capacity(cart.items().len());
        for line in cart.items() {
            let Some(product) = self.stores.catalog.get_product(&line.product_id).await? else {
                continue;
            };
            items.push(CartLine {
                product_id: line.product_id.clone(),
                quantity: line.quantity.value(),
                price: line.price,
                total: line.line_total(),
                image: product.primary_image().map(str::to_string),
                name: product.name,
                sku: product.sku.to_string(),
                stock: product.stock,
            });
        }

        let subtotal: Decimal = items.iter().map(|line| line.total).sum();
        let shipping = if items.is_empty() { Decimal::ZERO } else { self.shipping.cost_for(subtotal) };
        Ok(CartView {
            id: Some(cart.id),
            item_count: items.iter().map(|line| line.quantity).sum(),
            items,
            subtotal,
            shipping,
            total: subtotal + shipping,
        })
    }

    /// Adds `quantity` of a product at its current price, merging into an
    /// existing line. The merged quantity must be in stock.
    #[tracing::instrument(skip(self, owner), fields(owner = %owner))]
    pub async fn add_item(&self, owner: &CartOwner, product_id: &str, quantity: u32) -> Result<Cart> {
        let quantity = Quantity::new(quantity).map_err(|_| EcommerceError::InvalidQuantity(quantity))?;
        let product = self.active_product(product_id).await?;
        let cart = self.get_or_create_cart(owner).await?;

        let requested = cart.line(product_id).map_or(quantity, |line| line.quantity.add(quantity));
        ensure_stock(&product, requested.value())?;

        // The store re-checks the merged quantity against live stock.
        if !self.stores.carts.add_line(&cart.id, &CartItem::new(product_id, quantity, product.price)).await? {
            return Err(self.merged_stock_failure(owner, product_id, quantity).await);
        }
        info!(cart_id = %cart.id, product_id, quantity = quantity.value(), "product added to cart");
        self.reload(owner).await
    }

    pub async fn update_item_qty(&self, owner: &CartOwner, product_id: &str, quantity: u32) -> Result<Cart> {
        let quantity = Quantity::new(quantity).map_err(|_| EcommerceError::InvalidQuantity(quantity))?;
        let product = self.active_product(product_id).await?;
        ensure_stock(&product, quantity.value())?;

        let cart = self.existing_cart(owner, product_id).await?;
        if !self.stores.carts.set_line_quantity(&cart.id, product_id, quantity).await? {
            return Err(EcommerceError::not_found("cart item", product_id));
        }
        self.reload(owner).await
    }

    pub async fn remove_item(&self, owner: &CartOwner, product_id: &str) -> Result<Cart> {
        let cart = self.existing_cart(owner, product_id).await?;
        if !self.stores.carts.remove_line(&cart.id, product_id).await? {
            return Err(EcommerceError::not_found("cart item", product_id));
        }
        self.reload(owner).await
    }

    pub async fn clear(&self, owner: &CartOwner) -> Result<()> {
        if let Some(cart) = self.stores.carts.get_cart(owner).await? {
            self.stores.carts.clear_cart(&cart.id).await?;
        }
        Ok(())
    }

    /// Prices a coupon against the current cart. Unknown and inactive codes
    /// are reported as not found.
    pub async fn apply_coupon_preview(&self, owner: &CartOwner, code: &str) -> Result<CouponPreview> {
        let code = CouponCode::new(code).map_err(|_| EcommerceError::not_found("coupon", code))?;
        let coupon = self
            .stores
            .coupons
            .find_coupon(&code)
            .await?
            .filter(|coupon| coupon.is_active)
            .ok_or_else(|| EcommerceError::not_found("coupon", code.as_str()))?;

        let cart = self
            .stores
            .carts
            .get_cart(owner)
            .await?
            .filter(|cart| !cart.is_empty())
            .ok_or(EcommerceError::EmptyCart)?;

        let subtotal = cart.subtotal();
        let evaluation = coupon.evaluate(subtotal, Utc::now());
        if let Some(reason) = evaluation.reason {
            return Err(EcommerceError::from_coupon_rejection(&code, reason, subtotal));
        }

        Ok(CouponPreview {
            code: coupon.code.to_string(),
            kind: coupon.kind,
            value: coupon.value,
            discount: evaluation.discount,
        })
    }

    async fn active_product(&self, product_id: &str) -> Result<Product> {
        self.stores
            .catalog
            .get_product(product_id)
            .await?
            .filter(|product| product.is_active)
            .ok_or_else(|| EcommerceError::not_found("product", product_id))
    }

    /// Reports a rejected add with the quantities as they are now.
    async fn merged_stock_failure(&self, owner: &CartOwner, product_id: &str, quantity: Quantity) -> EcommerceError {
        let product = match self.active_product(product_id).await {
            Ok(product) => product,
            Err(error) => return error,
        };
        let in_cart = match self.stores.carts.get_cart(owner).await {
            Ok(cart) => cart.and_then(|cart| cart.line(product_id).map(|line| line.quantity.value())).unwrap_or(0),
            Err(error) => return error.into(),
        };
        EcommerceError::InsufficientStock {
            product_id: product.id,
            requested: in_cart.saturating_add(quantity.value()),
            available: product.stock,
        }
    }

    async fn existing_cart(&self, owner: &CartOwner, product_id: &str) -> Result<Cart> {
        self.stores
            .carts
            .get_cart(owner)
            .await?
            .ok_or_else(|| EcommerceError::not_found("cart item", product_id))
    }

    async fn reload(&self, owner: &CartOwner) -> Result<Cart> {
        self.stores
            .carts
            .get_cart(owner)
            .await?
            .ok_or_else(|| EcommerceError::not_found("cart", owner.to_string()))
    }
}

fn ensure_stock(product: &Product, requested: u32) -> Result<()> {
    if product.has_stock(requested) {
        Ok(())
    } else {
        Err(EcommerceError::InsufficientStock { product_id: product.id.clone(), requested, available: product.stock })
    }
}
