//! Delivery address gate.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use marketway_core::UserId;

use crate::db::{AddressRepository, RepositoryError};
use crate::error::{AddressProblem, CheckoutError, Result};
use crate::models::{Address, AddressFields, Buyer};

/// Requires a shippable address before checkout.
///
/// The check reads the stored address on every call; addresses can be
/// edited between checkout attempts so nothing is cached.
#[derive(Clone)]
pub struct AddressGate {
    addresses: Arc<dyn AddressRepository>,
    /// ISO country codes that require a state/region.
    requires_state: Vec<String>,
}

impl AddressGate {
    #[must_use]
    pub fn new(addresses: Arc<dyn AddressRepository>, requires_state: Vec<String>) -> Self {
        let requires_state = requires_state
            .into_iter()
            .map(|c| c.trim().to_ascii_uppercase())
            .collect();
        Self {
            addresses,
            requires_state,
        }
    }

    /// The buyer's address, if it satisfies the gate.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::AddressIncomplete` if no address is on file or
    /// a state-requiring country has no state.
    #[instrument(skip(self, buyer), fields(user_id = %buyer.id))]
    pub async fn authorize(&self, buyer: &Buyer) -> Result<Address> {
        let address = self
            .addresses
            .address_for_user(buyer.id)
            .await?
            .ok_or(AddressProblem::Missing)?;

        self.check(&address)?;
        Ok(address)
    }

    /// Create the user's address, or update the existing one in place.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::AddressIncomplete` with
    /// `AddressProblem::MissingFields` if required fields are blank.
    #[instrument(skip(self, fields), fields(user_id = %user))]
    pub async fn upsert(&self, user: UserId, fields: &AddressFields) -> Result<Address> {
        let missing = fields.missing_fields();
        if !missing.is_empty() {
            return Err(AddressProblem::MissingFields(missing).into());
        }

        if let Some(existing) = self.addresses.address_for_user(user).await? {
            let updated = self.addresses.update(existing.id, fields).await?;
            debug!(address_id = %updated.id, "Address updated in place");
            return Ok(updated);
        }

        match self.addresses.create_for_user(user, fields).await {
            Ok(created) => {
                info!(address_id = %created.id, "Address created");
                Ok(created)
            }
            // A concurrent request linked an address first; edit that one.
            Err(RepositoryError::Conflict(_)) => {
                let existing = self
                    .addresses
                    .address_for_user(user)
                    .await?
                    .ok_or(RepositoryError::NotFound)?;
                Ok(self.addresses.update(existing.id, fields).await?)
            }
            Err(e) => Err(CheckoutError::Repository(e)),
        }
    }

    fn check(&self, address: &Address) -> std::result::Result<(), AddressProblem> {
        let country = address.country.trim().to_ascii_uppercase();
        let has_state = address.state.as_deref().is_some_and(|s| !s.trim().is_empty());

        if !has_state && self.requires_state.contains(&country) {
            return Err(AddressProblem::MissingState { country });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use marketway_core::Email;

    use super::*;
    use crate::db::MemoryStore;

    fn buyer() -> Buyer {
        Buyer {
            id: UserId::new(7),
            email: Email::parse("ada@example.com").unwrap(),
        }
    }

    fn fields(country: &str, state: Option<&str>) -> AddressFields {
        AddressFields {
            full_name: "Ada Lovelace".to_string(),
            street: "12 Queen St".to_string(),
            city: "Toronto".to_string(),
            state: state.map(str::to_string),
            postal_code: "M5H 2N2".to_string(),
            country: country.to_string(),
            phone: None,
        }
    }

    fn gate(store: Arc<MemoryStore>) -> AddressGate {
        AddressGate::new(store, vec!["ca".to_string()])
    }

    #[tokio::test]
    async fn test_missing_address() {
        let gate = gate(Arc::new(MemoryStore::new()));
        assert!(matches!(
            gate.authorize(&buyer()).await,
            Err(CheckoutError::AddressIncomplete(AddressProblem::Missing))
        ));
    }

    #[tokio::test]
    async fn test_state_required_for_configured_country() {
        let gate = gate(Arc::new(MemoryStore::new()));
        let buyer = buyer();

        gate.upsert(buyer.id, &fields("CA", Some("  "))).await.unwrap();
        let err = gate.authorize(&buyer).await.unwrap_err();
        assert!(matches!(
            err,
            CheckoutError::AddressIncomplete(AddressProblem::MissingState { ref country })
                if country == "CA"
        ));

        gate.upsert(buyer.id, &fields("CA", Some("ON"))).await.unwrap();
        let address = gate.authorize(&buyer).await.unwrap();
        assert_eq!(address.state.as_deref(), Some("ON"));
    }

    #[tokio::test]
    async fn test_state_optional_elsewhere() {
        let gate = gate(Arc::new(MemoryStore::new()));
        let buyer = buyer();

        gate.upsert(buyer.id, &fields("gb", None)).await.unwrap();
        let address = gate.authorize(&buyer).await.unwrap();
        assert_eq!(address.country, "GB");
        assert_eq!(address.state, None);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let gate = gate(Arc::new(MemoryStore::new()));
        let user = buyer().id;

        let first = gate.upsert(user, &fields("CA", Some("ON"))).await.unwrap();
        let second = gate.upsert(user, &fields("CA", Some("ON"))).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.state, second.state);
        assert_eq!(first.street, second.street);
    }

    #[tokio::test]
    async fn test_upsert_rejects_blank_fields() {
        let gate = gate(Arc::new(MemoryStore::new()));
        let mut blank = fields("CA", Some("ON"));
        blank.street = " ".to_string();
        blank.city = String::new();

        let err = gate.upsert(UserId::new(1), &blank).await.unwrap_err();
        assert!(matches!(
            err,
            CheckoutError::AddressIncomplete(AddressProblem::MissingFields(ref f))
                if f == &vec!["street", "city"]
        ));
    }
}
