use chrono::NaiveDate;
use serde::{Serialize, Serializer};
use validator::Validate;

use crate::address::Address;

/// Policy type sent for self registered adult patrons.
pub const SIMPLYE_POLICY: &str = "simplye";

/// Name and contact details collected by the flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Validate)]
pub struct PersonalInfo {
    #[validate(length(min = 1))]
    pub first_name: String,
    pub middle_name: Option<String>,
    #[validate(length(min = 1))]
    pub last_name: String,
    /// Required for adult patrons, not collected for dependents.
    #[validate(regex = "crate::validation::EMAIL_SHAPE")]
    pub email: Option<String>,
    pub birthdate: Option<NaiveDate>,
}

impl PersonalInfo {
    /// Name in the order the platform stores it.
    pub fn full_name(&self) -> String {
        let mut parts = vec![self.first_name.trim()];
        if let Some(ref middle) = self.middle_name {
            if !middle.trim().is_empty() {
                parts.push(middle.trim());
            }
        }
        parts.push(self.last_name.trim());
        parts.join(" ")
    }
}

/// Body of `POST /create_patron`.
#[derive(Debug, Clone, Serialize)]
pub struct PatronCreationInfo {
    pub name: String,
    pub email: String,
    pub address: Address,
    pub username: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_or_school_address: Option<Address>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_birthdate"
    )]
    pub birthdate: Option<NaiveDate>,
    #[serde(rename = "usernameHasBeenValidated")]
    pub username_has_been_validated: bool,
    #[serde(rename = "policyType")]
    pub policy_type: String,
    #[serde(rename = "ageGate")]
    pub age_gate: bool,
    #[serde(rename = "acceptTerms")]
    pub accept_terms: bool,
}

fn serialize_birthdate<S>(birthdate: &Option<NaiveDate>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match birthdate {
        Some(date) => serializer.serialize_str(&date.format("%m/%d/%Y").to_string()),
        None => serializer.serialize_none(),
    }
}

/// Body of `POST /patrons/dependents`.
#[derive(Debug, Clone, Serialize)]
pub struct JuvenileCreationInfo {
    /// Barcode of the parent patron.
    pub barcode: String,
    pub name: String,
    pub username: String,
    pub pin: String,
}
