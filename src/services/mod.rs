//! Application services on top of the stores.

pub mod cart;
pub mod checkout;
pub mod events;
pub mod orders;
pub mod payment;

pub use cart::{CartLine, CartService, CartView, CouponPreview};
pub use checkout::{CheckoutEngine, CheckoutRequest};
pub use events::{EventPublisher, NatsPublisher, NoopPublisher, PublishError, RecordingPublisher};
pub use orders::{OrderQuery, OrderService, MY_ORDERS_LIMIT};
pub use payment::{MockPaymentGateway, PaymentGateway};
