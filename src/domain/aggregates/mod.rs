//! Aggregates module
pub mod product;
pub mod order;
pub mod cart;
pub mod coupon;

pub use product::{Product, ProductError};
pub use order::{Address, Order, OrderDraft, OrderError, OrderItem, OrderStatus, PaymentStatus, ShippingInfo};
pub use cart::{same_lines, Cart, CartError, CartItem, CartOwner};
pub use coupon::{Coupon, CouponEvaluation, CouponRejection, CouponType};
