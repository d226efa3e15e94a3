use serde::Deserialize;
use std::convert::TryFrom;

use crate::address::Address;
use crate::card_type::CardType;
use crate::error::ClientError;

/// Outcome of address validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidateAddressResponse {
    ValidAddress(Address, CardType),
    /// Corrected candidates, one of which the user has to pick.
    AlternativeAddresses(Vec<(Address, CardType)>),
    /// The address could not be matched. Carries a message for the user.
    UnrecognizedAddress(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AddressValidationBody {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    address: Option<Address>,
    #[serde(default)]
    addresses: Option<Vec<Address>>,
    #[serde(default)]
    card_type: Option<CardType>,
}

impl TryFrom<AddressValidationBody> for ValidateAddressResponse {
    type Error = ClientError;

    fn try_from(body: AddressValidationBody) -> Result<Self, Self::Error> {
        match body.kind.as_str() {
            "valid-address" => {
                let address = body
                    .address
                    .ok_or_else(|| {
                        ClientError::UnexpectedResponse("valid-address without address".into())
                    })?
                    .validated();
                let card_type = body
                    .card_type
                    .unwrap_or_else(|| CardType::from_region(address.region()));
                Ok(ValidateAddressResponse::ValidAddress(address, card_type))
            }
            "alternate-addresses" => {
                let candidates = body
                    .addresses
                    .unwrap_or_default()
                    .into_iter()
                    .map(|address| {
                        let card_type = CardType::from_region(address.region());
                        (address.validated(), card_type)
                    })
                    .collect();
                Ok(ValidateAddressResponse::AlternativeAddresses(candidates))
            }
            "unrecognized-address" => Ok(ValidateAddressResponse::UnrecognizedAddress(
                body.message.unwrap_or_default(),
            )),
            other => Err(ClientError::UnexpectedResponse(format!(
                "address validation type {:?}",
                other
            ))),
        }
    }
}

/// Outcome of username validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidateUsernameResponse {
    Invalid,
    Unavailable,
    Available,
}

#[derive(Deserialize)]
pub(crate) struct UsernameValidationBody {
    #[serde(rename = "type")]
    kind: String,
}

impl TryFrom<UsernameValidationBody> for ValidateUsernameResponse {
    type Error = ClientError;

    fn try_from(body: UsernameValidationBody) -> Result<Self, Self::Error> {
        match body.kind.as_str() {
            "invalid-username" => Ok(ValidateUsernameResponse::Invalid),
            "unavailable-username" => Ok(ValidateUsernameResponse::Unavailable),
            "available-username" => Ok(ValidateUsernameResponse::Available),
            other => Err(ClientError::UnexpectedResponse(format!(
                "username validation type {:?}",
                other
            ))),
        }
    }
}

/// Card issued by a successful registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub barcode: String,
    pub username: String,
    /// Password for patrons, PIN for dependents.
    pub password: String,
}

#[derive(Deserialize)]
pub(crate) struct PatronCreatedBody {
    pub barcode: String,
}

#[derive(Deserialize)]
pub(crate) struct DependentCreatedBody {
    pub data: DependentData,
}

#[derive(Deserialize)]
pub(crate) struct DependentData {
    pub dependent: PatronCreatedBody,
}
