//! Buyer and delivery address types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use marketway_core::{AddressId, Email, UserId};

/// The authenticated buyer starting a checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buyer {
    pub id: UserId,
    pub email: Email,
}

/// A user's delivery address (one per user).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Database ID of this address.
    pub id: AddressId,
    /// Owning user.
    pub user_id: UserId,
    pub full_name: String,
    pub street: String,
    pub city: String,
    /// Region / state / province. `None` when not supplied.
    pub state: Option<String>,
    pub postal_code: String,
    /// ISO 3166-1 alpha-2 code, upper case.
    pub country: String,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Address form input, as submitted from the delivery address step.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AddressFields {
    pub full_name: String,
    pub street: String,
    pub city: String,
    #[serde(default)]
    pub state: Option<String>,
    pub postal_code: String,
    pub country: String,
    #[serde(default)]
    pub phone: Option<String>,
}

impl AddressFields {
    /// Trim every field, upper-case the country and turn blank optionals
    /// into `None`, so repeated identical submissions store identical rows.
    #[must_use]
    pub fn normalized(&self) -> Self {
        fn blank_to_none(value: Option<&String>) -> Option<String> {
            value
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        }

        Self {
            full_name: self.full_name.trim().to_owned(),
            street: self.street.trim().to_owned(),
            city: self.city.trim().to_owned(),
            state: blank_to_none(self.state.as_ref()),
            postal_code: self.postal_code.trim().to_owned(),
            country: self.country.trim().to_ascii_uppercase(),
            phone: blank_to_none(self.phone.as_ref()),
        }
    }

    /// Names of required fields that are blank.
    #[must_use]
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("full_name", &self.full_name),
            ("street", &self.street),
            ("city", &self.city),
            ("postal_code", &self.postal_code),
            ("country", &self.country),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

impl Address {
    /// Overwrite the editable fields in place.
    pub fn apply(&mut self, fields: &AddressFields, now: DateTime<Utc>) {
        let fields = fields.normalized();
        self.full_name = fields.full_name;
        self.street = fields.street;
        self.city = fields.city;
        self.state = fields.state;
        self.postal_code = fields.postal_code;
        self.country = fields.country;
        self.phone = fields.phone;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_trims_and_uppercases() {
        let fields = AddressFields {
            full_name: " Ada Lovelace ".to_string(),
            street: "1 Main St".to_string(),
            city: "Toronto".to_string(),
            state: Some("   ".to_string()),
            postal_code: "M5V 2T6".to_string(),
            country: "ca ".to_string(),
            phone: None,
        }
        .normalized();

        assert_eq!(fields.full_name, "Ada Lovelace");
        assert_eq!(fields.country, "CA");
        assert_eq!(fields.state, None);
    }

    #[test]
    fn test_missing_fields() {
        let fields = AddressFields {
            full_name: "Ada".to_string(),
            country: "US".to_string(),
            ..AddressFields::default()
        };
        assert_eq!(fields.missing_fields(), vec!["street", "city", "postal_code"]);
    }
}
