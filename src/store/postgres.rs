//! PostgreSQL store.
//!
//! Counter updates are single conditional `UPDATE` statements, so the row
//! lock taken by PostgreSQL makes check-and-write atomic per row.

use async_trait::async_trait;
use sqlx::{
    postgres::{PgPool, PgPoolOptions, PgRow},
    query, query_as, query_scalar,
    types::Json,
    FromRow, Row,
};

use super::{CartStore, CatalogStore, CouponStore, OrderFilter, OrderPage, OrderStore, StoreError, StoreResult};
use crate::domain::aggregates::{
    same_lines, Address, Cart, CartItem, CartOwner, Coupon, CouponType, Order, OrderItem, OrderStatus, PaymentStatus, Product,
    ShippingInfo,
};
use crate::domain::value_objects::{CouponCode, Quantity, Sku};

const SELECT_CART_BY_USER_SQL: &str = "SELECT id, user_id, session_id, updated_at FROM carts WHERE user_id = $1";
const SELECT_CART_BY_SESSION_SQL: &str = "SELECT id, user_id, session_id, updated_at FROM carts WHERE session_id = $1";
const SELECT_CART_ITEMS_SQL: &str =
    "SELECT product_id, quantity, price FROM cart_items WHERE cart_id = $1 ORDER BY line_no";
const INSERT_CART_SQL: &str =
    "INSERT INTO carts (id, user_id, session_id, updated_at) VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING";
const ADD_CART_ITEM_SQL: &str = "INSERT INTO cart_items (cart_id, product_id, quantity, price) \
     SELECT $1, $2, $3, $4 FROM products WHERE id = $2 AND stock >= $3 \
     ON CONFLICT (cart_id, product_id) DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity \
     WHERE cart_items.quantity + EXCLUDED.quantity <= (SELECT stock FROM products WHERE id = EXCLUDED.product_id)";
const RESTORE_CART_ITEM_SQL: &str = "INSERT INTO cart_items (cart_id, product_id, quantity, price) \
     VALUES ($1, $2, $3, $4) \
     ON CONFLICT (cart_id, product_id) DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity";
const LOCK_CART_SQL: &str = "SELECT id FROM carts WHERE id = $1 FOR UPDATE";
const TOUCH_CART_SQL: &str = "UPDATE carts SET updated_at = NOW() WHERE id = $1";

const DECREMENT_STOCK_SQL: &str = "UPDATE products SET stock = stock - $2, updated_at = NOW() \
     WHERE id = $1 AND is_active AND stock >= $2";
const UPSERT_PRODUCT_SQL: &str = "INSERT INTO products \
     (id, sku, name, price, stock, sold_count, images, is_active, created_at, updated_at) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
     ON CONFLICT (id) DO UPDATE SET sku = EXCLUDED.sku, name = EXCLUDED.name, price = EXCLUDED.price, \
     stock = EXCLUDED.stock, images = EXCLUDED.images, is_active = EXCLUDED.is_active, updated_at = EXCLUDED.updated_at";

const INCREMENT_USAGE_SQL: &str = "UPDATE coupons SET used_count = used_count + 1 \
     WHERE code = $1 AND (max_uses IS NULL OR used_count < max_uses)";
const UPSERT_COUPON_SQL: &str = "INSERT INTO coupons \
     (id, code, kind, value, min_order_value, max_uses, used_count, valid_from, valid_until, is_active) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
     ON CONFLICT (code) DO UPDATE SET kind = EXCLUDED.kind, value = EXCLUDED.value, \
     min_order_value = EXCLUDED.min_order_value, max_uses = EXCLUDED.max_uses, valid_from = EXCLUDED.valid_from, \
     valid_until = EXCLUDED.valid_until, is_active = EXCLUDED.is_active";

const INSERT_ORDER_SQL: &str = "INSERT INTO orders \
     (id, order_number, user_id, shipping_info, billing_same_as_shipping, billing_address, notes, items, \
      subtotal, shipping_cost, discount, discount_code, total, status, payment_status, payment_method, \
      tracking_number, created_at, updated_at) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)";
const LIST_ORDERS_SQL: &str = "SELECT * FROM orders WHERE ($1::TEXT IS NULL OR status = $1) \
     ORDER BY created_at DESC LIMIT $2 OFFSET $3";
const COUNT_ORDERS_SQL: &str = "SELECT COUNT(*) FROM orders WHERE ($1::TEXT IS NULL OR status = $1)";
const UPDATE_STATUS_SQL: &str = "UPDATE orders SET status = $3, tracking_number = COALESCE($4, tracking_number), \
     updated_at = NOW() WHERE id = $1 AND status = $2";
const UPDATE_PAYMENT_STATUS_SQL: &str =
    "UPDATE orders SET payment_status = $3, updated_at = NOW() WHERE id = $1 AND payment_status = $2";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(database_url).await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn decode_error(column: &str, source: impl std::error::Error + Send + Sync + 'static) -> sqlx::Error {
    sqlx::Error::ColumnDecode { index: column.to_string(), source: Box::new(source) }
}

fn to_i32(value: u32) -> StoreResult<i32> {
    i32::try_from(value).map_err(|e| StoreError::Decode(e.to_string()))
}

fn to_i64(value: u64) -> StoreResult<i64> {
    i64::try_from(value).map_err(|e| StoreError::Decode(e.to_string()))
}

impl<'r> FromRow<'r, PgRow> for Product {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        let sku: String = row.try_get("sku")?;
        let stock: i32 = row.try_get("stock")?;
        let sold_count: i64 = row.try_get("sold_count")?;

        Ok(Self {
            id: row.try_get("id")?,
            sku: Sku::new(sku).map_err(|e| decode_error("sku", e))?,
            name: row.try_get("name")?,
            price: row.try_get("price")?,
            stock: u32::try_from(stock).map_err(|e| decode_error("stock", e))?,
            sold_count: u64::try_from(sold_count).map_err(|e| decode_error("sold_count", e))?,
            images: row.try_get("images")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for CartItem {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        let quantity: i32 = row.try_get("quantity")?;
        let quantity = u32::try_from(quantity).map_err(|e| decode_error("quantity", e))?;

        Ok(Self {
            product_id: row.try_get("product_id")?,
            quantity: Quantity::new(quantity).map_err(|e| decode_error("quantity", e))?,
            price: row.try_get("price")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for Coupon {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        let code: String = row.try_get("code")?;
        let kind: String = row.try_get("kind")?;
        let max_uses: Option<i32> = row.try_get("max_uses")?;
        let used_count: i32 = row.try_get("used_count")?;

        Ok(Self {
            id: row.try_get("id")?,
            code: CouponCode::new(code).map_err(|e| decode_error("code", e))?,
            kind: CouponType::parse(&kind).ok_or_else(|| sqlx::Error::ColumnDecode {
                index: "kind".to_string(),
                source: format!("unknown coupon type {kind}").into(),
            })?,
            value: row.try_get("value")?,
            min_order_value: row.try_get("min_order_value")?,
            max_uses: max_uses.map(u32::try_from).transpose().map_err(|e| decode_error("max_uses", e))?,
            used_count: u32::try_from(used_count).map_err(|e| decode_error("used_count", e))?,
            valid_from: row.try_get("valid_from")?,
            valid_until: row.try_get("valid_until")?,
            is_active: row.try_get("is_active")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for Order {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        let status: String = row.try_get("status")?;
        let payment_status: String = row.try_get("payment_status")?;

        Ok(Self {
            id: row.try_get("id")?,
            order_number: row.try_get("order_number")?,
            user_id: row.try_get("user_id")?,
            shipping_info: row.try_get::<Json<ShippingInfo>, _>("shipping_info")?.0,
            billing_same_as_shipping: row.try_get("billing_same_as_shipping")?,
            billing_address: row.try_get::<Option<Json<Address>>, _>("billing_address")?.map(|json| json.0),
            notes: row.try_get("notes")?,
            items: row.try_get::<Json<Vec<OrderItem>>, _>("items")?.0,
            subtotal: row.try_get("subtotal")?,
            shipping_cost: row.try_get("shipping_cost")?,
            discount: row.try_get("discount")?,
            discount_code: row.try_get("discount_code")?,
            total: row.try_get("total")?,
            status: status.parse::<OrderStatus>().map_err(|e| decode_error("status", e))?,
            payment_status: payment_status.parse::<PaymentStatus>().map_err(|e| decode_error("payment_status", e))?,
            payment_method: row.try_get("payment_method")?,
            tracking_number: row.try_get("tracking_number")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            events: vec![],
        })
    }
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn get_product(&self, id: &str) -> StoreResult<Option<Product>> {
        Ok(query_as::<_, Product>("SELECT * FROM products WHERE id = $1").bind(id).fetch_optional(&self.pool).await?)
    }

    async fn atomic_decrement_stock(&self, id: &str, quantity: u32) -> StoreResult<bool> {
        let result = query(DECREMENT_STOCK_SQL).bind(id).bind(to_i32(quantity)?).execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn restore_stock(&self, id: &str, quantity: u32) -> StoreResult<()> {
        query("UPDATE products SET stock = stock + $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(to_i32(quantity)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn increment_sold_count(&self, id: &str, quantity: u32) -> StoreResult<()> {
        query("UPDATE products SET sold_count = sold_count + $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(i64::from(quantity))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_product(&self, product: &Product) -> StoreResult<()> {
        query(UPSERT_PRODUCT_SQL)
            .bind(&product.id)
            .bind(product.sku.as_str())
            .bind(&product.name)
            .bind(product.price)
            .bind(to_i32(product.stock)?)
            .bind(to_i64(product.sold_count)?)
            .bind(&product.images)
            .bind(product.is_active)
            .bind(product.created_at)
            .bind(product.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CartStore for PgStore {
    async fn get_cart(&self, owner: &CartOwner) -> StoreResult<Option<Cart>> {
        let (sql, key) = match owner {
            CartOwner::User(id) => (SELECT_CART_BY_USER_SQL, id),
            CartOwner::Session(id) => (SELECT_CART_BY_SESSION_SQL, id),
        };
        let Some(row) = query(sql).bind(key).fetch_optional(&self.pool).await? else {
            return Ok(None);
        };

        let id: String = row.try_get("id")?;
        let items = query_as::<_, CartItem>(SELECT_CART_ITEMS_SQL).bind(&id).fetch_all(&self.pool).await?;

        Ok(Some(Cart {
            id,
            user_id: row.try_get("user_id")?,
            session_id: row.try_get("session_id")?,
            items,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    async fn create_cart(&self, cart: &Cart) -> StoreResult<Cart> {
        let owner = cart.owner().ok_or_else(|| StoreError::Decode(format!("cart {} has no owner", cart.id)))?;
        query(INSERT_CART_SQL)
            .bind(&cart.id)
            .bind(&cart.user_id)
            .bind(&cart.session_id)
            .bind(cart.updated_at)
            .execute(&self.pool)
            .await?;

        self.get_cart(&owner).await?.ok_or_else(|| StoreError::Decode(format!("cart for {owner} missing after insert")))
    }

    // Every cart mutation touches the cart row first, so writers to one cart
    // queue on its row lock.
    async fn add_line(&self, cart_id: &str, item: &CartItem) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        query(TOUCH_CART_SQL).bind(cart_id).execute(&mut *tx).await?;
        let result = query(ADD_CART_ITEM_SQL)
            .bind(cart_id)
            .bind(&item.product_id)
            .bind(to_i32(item.quantity.value())?)
            .bind(item.price)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn set_line_quantity(&self, cart_id: &str, product_id: &str, quantity: Quantity) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        query(TOUCH_CART_SQL).bind(cart_id).execute(&mut *tx).await?;
        let result = query("UPDATE cart_items SET quantity = $3 WHERE cart_id = $1 AND product_id = $2")
            .bind(cart_id)
            .bind(product_id)
            .bind(to_i32(quantity.value())?)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    }

    async fn remove_line(&self, cart_id: &str, product_id: &str) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        query(TOUCH_CART_SQL).bind(cart_id).execute(&mut *tx).await?;
        let result = query("DELETE FROM cart_items WHERE cart_id = $1 AND product_id = $2")
            .bind(cart_id)
            .bind(product_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    }

    async fn clear_cart(&self, cart_id: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        query(TOUCH_CART_SQL).bind(cart_id).execute(&mut *tx).await?;
        query("DELETE FROM cart_items WHERE cart_id = $1").bind(cart_id).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn take_items(&self, cart_id: &str, expected: &[CartItem]) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        if query(LOCK_CART_SQL).bind(cart_id).fetch_optional(&mut *tx).await?.is_none() {
            return Ok(false);
        }
        let current = query_as::<_, CartItem>(SELECT_CART_ITEMS_SQL).bind(cart_id).fetch_all(&mut *tx).await?;
        if !same_lines(&current, expected) {
            tx.rollback().await?;
            return Ok(false);
        }
        query("DELETE FROM cart_items WHERE cart_id = $1").bind(cart_id).execute(&mut *tx).await?;
        query(TOUCH_CART_SQL).bind(cart_id).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn restore_items(&self, cart_id: &str, items: &[CartItem]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        query(TOUCH_CART_SQL).bind(cart_id).execute(&mut *tx).await?;
        for item in items {
            query(RESTORE_CART_ITEM_SQL)
                .bind(cart_id)
                .bind(&item.product_id)
                .bind(to_i32(item.quantity.value())?)
                .bind(item.price)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl CouponStore for PgStore {
    async fn find_coupon(&self, code: &CouponCode) -> StoreResult<Option<Coupon>> {
        Ok(query_as::<_, Coupon>("SELECT * FROM coupons WHERE code = $1")
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn atomic_increment_usage(&self, code: &CouponCode) -> StoreResult<bool> {
        let result = query(INCREMENT_USAGE_SQL).bind(code.as_str()).execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_usage(&self, code: &CouponCode) -> StoreResult<()> {
        query("UPDATE coupons SET used_count = GREATEST(used_count - 1, 0) WHERE code = $1")
            .bind(code.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_coupon(&self, coupon: &Coupon) -> StoreResult<()> {
        query(UPSERT_COUPON_SQL)
            .bind(&coupon.id)
            .bind(coupon.code.as_str())
            .bind(coupon.kind.as_str())
            .bind(coupon.value)
            .bind(coupon.min_order_value)
            .bind(coupon.max_uses.map(to_i32).transpose()?)
            .bind(to_i32(coupon.used_count)?)
            .bind(coupon.valid_from)
            .bind(coupon.valid_until)
            .bind(coupon.is_active)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn insert_order(&self, order: &Order) -> StoreResult<()> {
        query(INSERT_ORDER_SQL)
            .bind(&order.id)
            .bind(&order.order_number)
            .bind(&order.user_id)
            .bind(Json(&order.shipping_info))
            .bind(order.billing_same_as_shipping)
            .bind(order.billing_address.as_ref().map(Json))
            .bind(&order.notes)
            .bind(Json(&order.items))
            .bind(order.subtotal)
            .bind(order.shipping_cost)
            .bind(order.discount)
            .bind(&order.discount_code)
            .bind(order.total)
            .bind(order.status.as_str())
            .bind(order.payment_status.as_str())
            .bind(&order.payment_method)
            .bind(&order.tracking_number)
            .bind(order.created_at)
            .bind(order.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_order(&self, id_or_number: &str) -> StoreResult<Option<Order>> {
        Ok(query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 OR order_number = $1 LIMIT 1")
            .bind(id_or_number)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_orders_for_user(&self, user_id: &str, limit: u32) -> StoreResult<Vec<Order>> {
        Ok(query_as::<_, Order>("SELECT * FROM orders WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2")
            .bind(user_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?)
    }

    async fn list_orders(&self, filter: &OrderFilter) -> StoreResult<OrderPage> {
        let status = filter.status.map(|s| s.as_str());
        let orders = query_as::<_, Order>(LIST_ORDERS_SQL)
            .bind(status)
            .bind(i64::from(filter.limit))
            .bind(to_i64(filter.offset())?)
            .fetch_all(&self.pool)
            .await?;
        let total: i64 = query_scalar(COUNT_ORDERS_SQL).bind(status).fetch_one(&self.pool).await?;
        let total = u64::try_from(total).map_err(|e| StoreError::Decode(e.to_string()))?;

        Ok(OrderPage::new(orders, total, filter))
    }

    async fn update_status(
        &self,
        id: &str,
        expected: OrderStatus,
        next: OrderStatus,
        tracking_number: Option<&str>,
    ) -> StoreResult<bool> {
        let result = query(UPDATE_STATUS_SQL)
            .bind(id)
            .bind(expected.as_str())
            .bind(next.as_str())
            .bind(tracking_number)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_payment_status(&self, id: &str, expected: PaymentStatus, next: PaymentStatus) -> StoreResult<bool> {
        let result = query(UPDATE_PAYMENT_STATUS_SQL)
            .bind(id)
            .bind(expected.as_str())
            .bind(next.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}
