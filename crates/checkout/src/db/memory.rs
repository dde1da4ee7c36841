//! In-memory repositories.
//!
//! All three repositories share one lock so multi-record writes (order
//! insert plus session back-reference) are atomic, like a transaction.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use marketway_core::{AddressId, CartId, CheckoutSessionId, CheckoutStatus, UserId};

use super::{AddressRepository, OrderRepository, RepositoryError, SessionRepository};
use crate::models::{Address, AddressFields, CheckoutSession, Order};

#[derive(Debug, Default)]
struct Inner {
    next_address_id: i32,
    addresses: HashMap<AddressId, Address>,
    user_address: HashMap<UserId, AddressId>,
    sessions: HashMap<CheckoutSessionId, CheckoutSession>,
    orders: HashMap<CheckoutSessionId, Vec<Order>>,
}

/// Address, session and order storage in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions ever stored.
    pub async fn session_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    /// Number of orders across all sessions.
    pub async fn order_count(&self) -> usize {
        self.inner.read().await.orders.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl AddressRepository for MemoryStore {
    async fn address_for_user(&self, user: UserId) -> Result<Option<Address>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner
            .user_address
            .get(&user)
            .and_then(|id| inner.addresses.get(id))
            .cloned())
    }

    async fn create_for_user(
        &self,
        user: UserId,
        fields: &AddressFields,
    ) -> Result<Address, RepositoryError> {
        let mut inner = self.inner.write().await;
        if inner.user_address.contains_key(&user) {
            return Err(RepositoryError::Conflict(format!(
                "user {user} already has an address"
            )));
        }

        inner.next_address_id += 1;
        let id = AddressId::new(inner.next_address_id);
        let now = Utc::now();
        let fields = fields.normalized();
        let address = Address {
            id,
            user_id: user,
            full_name: fields.full_name,
            street: fields.street,
            city: fields.city,
            state: fields.state,
            postal_code: fields.postal_code,
            country: fields.country,
            phone: fields.phone,
            created_at: now,
            updated_at: now,
        };

        inner.addresses.insert(id, address.clone());
        inner.user_address.insert(user, id);
        Ok(address)
    }

    async fn update(
        &self,
        id: AddressId,
        fields: &AddressFields,
    ) -> Result<Address, RepositoryError> {
        let mut inner = self.inner.write().await;
        let address = inner
            .addresses
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;
        address.apply(fields, Utc::now());
        Ok(address.clone())
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn insert(&self, session: &CheckoutSession) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        let open = inner
            .sessions
            .values()
            .any(|s| s.cart_id == session.cart_id && s.is_open());
        if open {
            return Err(RepositoryError::Conflict(format!(
                "cart {} already has an open checkout session",
                session.cart_id
            )));
        }

        inner.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get(
        &self,
        id: CheckoutSessionId,
    ) -> Result<Option<CheckoutSession>, RepositoryError> {
        Ok(self.inner.read().await.sessions.get(&id).cloned())
    }

    async fn find_by_provider_reference(
        &self,
        reference: &str,
    ) -> Result<Option<CheckoutSession>, RepositoryError> {
        Ok(self
            .inner
            .read()
            .await
            .sessions
            .values()
            .find(|s| s.provider_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn find_open_for_cart(
        &self,
        cart: CartId,
    ) -> Result<Option<CheckoutSession>, RepositoryError> {
        Ok(self
            .inner
            .read()
            .await
            .sessions
            .values()
            .find(|s| s.cart_id == cart && s.is_open())
            .cloned())
    }

    async fn mark_awaiting_payment(
        &self,
        id: CheckoutSessionId,
        reference: &str,
        approval_url: &str,
    ) -> Result<bool, RepositoryError> {
        let mut inner = self.inner.write().await;
        let session = inner.sessions.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        if session.status != CheckoutStatus::Created {
            return Ok(false);
        }

        session.status = CheckoutStatus::AwaitingPayment;
        session.provider_reference = Some(reference.to_owned());
        session.approval_url = Some(approval_url.to_owned());
        session.updated_at = Utc::now();
        Ok(true)
    }

    async fn transition(
        &self,
        id: CheckoutSessionId,
        from: CheckoutStatus,
        to: CheckoutStatus,
        failure_reason: Option<&str>,
    ) -> Result<bool, RepositoryError> {
        let mut inner = self.inner.write().await;
        let session = inner.sessions.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        if session.status != from || !from.can_transition_to(to) {
            return Ok(false);
        }

        session.status = to;
        if let Some(reason) = failure_reason {
            session.failure_reason = Some(reason.to_owned());
        }
        session.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_reconciliation_required(
        &self,
        id: CheckoutSessionId,
        required: bool,
    ) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        let session = inner.sessions.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        session.reconciliation_required = required;
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn list_reconciliation_required(
        &self,
    ) -> Result<Vec<CheckoutSession>, RepositoryError> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<_> = inner
            .sessions
            .values()
            .filter(|s| s.reconciliation_required && s.is_paid())
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    async fn list_refund_required(&self) -> Result<Vec<CheckoutSession>, RepositoryError> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<_> = inner
            .sessions
            .values()
            .filter(|s| s.reconciliation_required && s.status == CheckoutStatus::Failed)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn insert_for_session(
        &self,
        session: CheckoutSessionId,
        orders: &[Order],
    ) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        if inner.orders.get(&session).is_some_and(|o| !o.is_empty()) {
            return Err(RepositoryError::Conflict(format!(
                "session {session} already has orders"
            )));
        }
        let stored = inner
            .sessions
            .get_mut(&session)
            .ok_or(RepositoryError::NotFound)?;

        stored.order_ids = orders.iter().map(|o| o.id).collect();
        inner.orders.insert(session, orders.to_vec());
        Ok(())
    }

    async fn orders_for_session(
        &self,
        session: CheckoutSessionId,
    ) -> Result<Vec<Order>, RepositoryError> {
        Ok(self
            .inner
            .read()
            .await
            .orders
            .get(&session)
            .cloned()
            .unwrap_or_default())
    }
}
