//! `PostgreSQL` repositories.
//!
//! Queries use runtime-checked `sqlx::query_as` with `FromRow` row types so
//! the crate builds without a live database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use marketway_core::{
    AddressId, CartId, CheckoutSessionId, CheckoutStatus, CurrencyCode, Email, OrderId,
    OrderStatus, SellerId, UserId,
};

use super::{AddressRepository, OrderRepository, RepositoryError, SessionRepository};
use crate::models::{Address, AddressFields, CheckoutSession, Order, OrderLine, PricedCart};

const SESSION_COLUMNS: &str = r#"
    s.id, s.user_id, s.buyer_email, s.cart_id, s.snapshot, s.status,
    s.provider_reference, s.approval_url, s.failure_reason,
    s.reconciliation_required, s.created_at, s.updated_at,
    ARRAY(
        SELECT o.id FROM checkout."order" o
        WHERE o.checkout_session_id = s.id
        ORDER BY o.seller_id
    ) AS order_ids
"#;

/// Repositories over a shared connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_session(
        &self,
        filter: &str,
        bind: SessionFilter<'_>,
    ) -> Result<Option<CheckoutSession>, RepositoryError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM checkout.session s WHERE {filter}");
        let query = sqlx::query_as::<_, SessionRow>(&sql);
        let query = match bind {
            SessionFilter::Id(id) => query.bind(id),
            SessionFilter::Reference(reference) => query.bind(reference),
            SessionFilter::Cart(cart) => query.bind(cart),
        };

        query
            .fetch_optional(&self.pool)
            .await?
            .map(CheckoutSession::try_from)
            .transpose()
    }
}

enum SessionFilter<'a> {
    Id(CheckoutSessionId),
    Reference(&'a str),
    Cart(CartId),
}

// =============================================================================
// Row types
// =============================================================================

#[derive(FromRow)]
struct AddressRow {
    id: i32,
    user_id: i32,
    full_name: String,
    street: String,
    city: String,
    state: Option<String>,
    postal_code: String,
    country: String,
    phone: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AddressRow> for Address {
    fn from(r: AddressRow) -> Self {
        Self {
            id: AddressId::new(r.id),
            user_id: UserId::new(r.user_id),
            full_name: r.full_name,
            street: r.street,
            city: r.city,
            state: r.state,
            postal_code: r.postal_code,
            country: r.country,
            phone: r.phone,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(FromRow)]
struct SessionRow {
    id: Uuid,
    user_id: i32,
    buyer_email: String,
    cart_id: Uuid,
    snapshot: Json<PricedCart>,
    status: CheckoutStatus,
    provider_reference: Option<String>,
    approval_url: Option<String>,
    failure_reason: Option<String>,
    reconciliation_required: bool,
    order_ids: Vec<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for CheckoutSession {
    type Error = RepositoryError;

    fn try_from(r: SessionRow) -> Result<Self, Self::Error> {
        let buyer_email = Email::parse(&r.buyer_email).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid email in database: {e}"))
        })?;

        Ok(Self {
            id: CheckoutSessionId::new(r.id),
            user_id: UserId::new(r.user_id),
            buyer_email,
            cart_id: CartId::new(r.cart_id),
            snapshot: r.snapshot.0,
            status: r.status,
            provider_reference: r.provider_reference,
            approval_url: r.approval_url,
            failure_reason: r.failure_reason,
            reconciliation_required: r.reconciliation_required,
            order_ids: r.order_ids.into_iter().map(OrderId::new).collect(),
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(FromRow)]
struct OrderRow {
    id: Uuid,
    checkout_session_id: Uuid,
    seller_id: i32,
    seller_name: String,
    buyer_email: String,
    lines: Json<Vec<OrderLine>>,
    subtotal: Decimal,
    tax: Decimal,
    shipping_cost: Decimal,
    total: Decimal,
    currency: String,
    status: OrderStatus,
    provider_order_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = RepositoryError;

    fn try_from(r: OrderRow) -> Result<Self, Self::Error> {
        let buyer_email = Email::parse(&r.buyer_email).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid email in database: {e}"))
        })?;
        let currency = r.currency.parse::<CurrencyCode>().map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid currency in database: {e}"))
        })?;

        Ok(Self {
            id: OrderId::new(r.id),
            checkout_session_id: CheckoutSessionId::new(r.checkout_session_id),
            seller_id: SellerId::new(r.seller_id),
            seller_name: r.seller_name,
            buyer_email,
            lines: r.lines.0,
            subtotal: r.subtotal,
            tax: r.tax,
            shipping_cost: r.shipping_cost,
            total: r.total,
            currency,
            status: r.status,
            provider_order_id: r.provider_order_id,
            created_at: r.created_at,
        })
    }
}

/// Map a unique violation to `Conflict`, everything else to `Database`.
fn conflict_on_unique(e: sqlx::Error, what: &str) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return RepositoryError::Conflict(what.to_owned());
    }
    RepositoryError::Database(e)
}

// =============================================================================
// Addresses
// =============================================================================

#[async_trait]
impl AddressRepository for PgStore {
    async fn address_for_user(&self, user: UserId) -> Result<Option<Address>, RepositoryError> {
        let row = sqlx::query_as::<_, AddressRow>(
            r"
            SELECT a.id, l.user_id, a.full_name, a.street, a.city, a.state,
                   a.postal_code, a.country, a.phone, a.created_at, a.updated_at
            FROM checkout.user_address l
            JOIN checkout.address a ON a.id = l.address_id
            WHERE l.user_id = $1
            ",
        )
        .bind(user)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Address::from))
    }

    async fn create_for_user(
        &self,
        user: UserId,
        fields: &AddressFields,
    ) -> Result<Address, RepositoryError> {
        let fields = fields.normalized();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, AddressRow>(
            r"
            INSERT INTO checkout.address
                (full_name, street, city, state, postal_code, country, phone)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, $8::INTEGER AS user_id, full_name, street, city, state,
                      postal_code, country, phone, created_at, updated_at
            ",
        )
        .bind(&fields.full_name)
        .bind(&fields.street)
        .bind(&fields.city)
        .bind(&fields.state)
        .bind(&fields.postal_code)
        .bind(&fields.country)
        .bind(&fields.phone)
        .bind(user)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO checkout.user_address (user_id, address_id) VALUES ($1, $2)")
            .bind(user)
            .bind(row.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| conflict_on_unique(e, "user already has an address"))?;

        tx.commit().await?;

        Ok(Address::from(row))
    }

    async fn update(
        &self,
        id: AddressId,
        fields: &AddressFields,
    ) -> Result<Address, RepositoryError> {
        let fields = fields.normalized();

        let row = sqlx::query_as::<_, AddressRow>(
            r"
            UPDATE checkout.address a
            SET full_name = $2, street = $3, city = $4, state = $5,
                postal_code = $6, country = $7, phone = $8, updated_at = NOW()
            FROM checkout.user_address l
            WHERE a.id = $1 AND l.address_id = a.id
            RETURNING a.id, l.user_id, a.full_name, a.street, a.city, a.state,
                      a.postal_code, a.country, a.phone, a.created_at, a.updated_at
            ",
        )
        .bind(id)
        .bind(&fields.full_name)
        .bind(&fields.street)
        .bind(&fields.city)
        .bind(&fields.state)
        .bind(&fields.postal_code)
        .bind(&fields.country)
        .bind(&fields.phone)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Address::from).ok_or(RepositoryError::NotFound)
    }
}

// =============================================================================
// Sessions
// =============================================================================

#[async_trait]
impl SessionRepository for PgStore {
    async fn insert(&self, session: &CheckoutSession) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO checkout.session
                (id, user_id, buyer_email, cart_id, snapshot, status,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(session.buyer_email.as_str())
        .bind(session.cart_id)
        .bind(Json(&session.snapshot))
        .bind(session.status)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "cart already has an open checkout session"))?;

        Ok(())
    }

    async fn get(
        &self,
        id: CheckoutSessionId,
    ) -> Result<Option<CheckoutSession>, RepositoryError> {
        self.fetch_session("s.id = $1", SessionFilter::Id(id)).await
    }

    async fn find_by_provider_reference(
        &self,
        reference: &str,
    ) -> Result<Option<CheckoutSession>, RepositoryError> {
        self.fetch_session(
            "s.provider_reference = $1",
            SessionFilter::Reference(reference),
        )
        .await
    }

    async fn find_open_for_cart(
        &self,
        cart: CartId,
    ) -> Result<Option<CheckoutSession>, RepositoryError> {
        self.fetch_session(
            "s.cart_id = $1 AND s.status IN ('created', 'awaiting_payment')",
            SessionFilter::Cart(cart),
        )
        .await
    }

    async fn mark_awaiting_payment(
        &self,
        id: CheckoutSessionId,
        reference: &str,
        approval_url: &str,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE checkout.session
            SET status = 'awaiting_payment', provider_reference = $2,
                approval_url = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'created'
            ",
        )
        .bind(id)
        .bind(reference)
        .bind(approval_url)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "provider reference already in use"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn transition(
        &self,
        id: CheckoutSessionId,
        from: CheckoutStatus,
        to: CheckoutStatus,
        failure_reason: Option<&str>,
    ) -> Result<bool, RepositoryError> {
        if !from.can_transition_to(to) {
            return Ok(false);
        }

        let result = sqlx::query(
            r"
            UPDATE checkout.session
            SET status = $3,
                failure_reason = COALESCE($4, failure_reason),
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            ",
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(failure_reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_reconciliation_required(
        &self,
        id: CheckoutSessionId,
        required: bool,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE checkout.session
            SET reconciliation_required = $2, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(required)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn list_reconciliation_required(
        &self,
    ) -> Result<Vec<CheckoutSession>, RepositoryError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM checkout.session s \
             WHERE s.reconciliation_required AND s.status = 'paid' \
             ORDER BY s.created_at"
        );

        sqlx::query_as::<_, SessionRow>(&sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(CheckoutSession::try_from)
            .collect()
    }

    async fn list_refund_required(&self) -> Result<Vec<CheckoutSession>, RepositoryError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM checkout.session s \
             WHERE s.reconciliation_required AND s.status = 'failed' \
             ORDER BY s.created_at"
        );

        sqlx::query_as::<_, SessionRow>(&sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(CheckoutSession::try_from)
            .collect()
    }
}

// =============================================================================
// Orders
// =============================================================================

#[async_trait]
impl OrderRepository for PgStore {
    async fn insert_for_session(
        &self,
        session: CheckoutSessionId,
        orders: &[Order],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Serializes concurrent materializers on the same session.
        sqlx::query("SELECT id FROM checkout.session WHERE id = $1 FOR UPDATE")
            .bind(session)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(RepositoryError::NotFound)?;

        let existing: bool = sqlx::query_scalar(
            r#"SELECT EXISTS (SELECT 1 FROM checkout."order" WHERE checkout_session_id = $1)"#,
        )
        .bind(session)
        .fetch_one(&mut *tx)
        .await?;

        if existing {
            return Err(RepositoryError::Conflict(format!(
                "session {session} already has orders"
            )));
        }

        for order in orders {
            sqlx::query(
                r#"
                INSERT INTO checkout."order"
                    (id, checkout_session_id, seller_id, seller_name, buyer_email,
                     lines, subtotal, tax, shipping_cost, total, currency, status,
                     provider_order_id, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                "#,
            )
            .bind(order.id)
            .bind(order.checkout_session_id)
            .bind(order.seller_id)
            .bind(&order.seller_name)
            .bind(order.buyer_email.as_str())
            .bind(Json(&order.lines))
            .bind(order.subtotal)
            .bind(order.tax)
            .bind(order.shipping_cost)
            .bind(order.total)
            .bind(order.currency.code())
            .bind(order.status)
            .bind(&order.provider_order_id)
            .bind(order.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| conflict_on_unique(e, "order already exists for seller"))?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn orders_for_session(
        &self,
        session: CheckoutSessionId,
    ) -> Result<Vec<Order>, RepositoryError> {
        sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT id, checkout_session_id, seller_id, seller_name, buyer_email,
                   lines, subtotal, tax, shipping_cost, total, currency, status,
                   provider_order_id, created_at
            FROM checkout."order"
            WHERE checkout_session_id = $1
            ORDER BY seller_id
            "#,
        )
        .bind(session)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Order::try_from)
        .collect()
    }
}
