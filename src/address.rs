use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

use crate::error::ValidationError;
use crate::validation::is_valid_zip_code;

const US_STATES: &[(&str, &str)] = &[
    ("AL", "Alabama"),
    ("AK", "Alaska"),
    ("AZ", "Arizona"),
    ("AR", "Arkansas"),
    ("CA", "California"),
    ("CO", "Colorado"),
    ("CT", "Connecticut"),
    ("DE", "Delaware"),
    ("DC", "District of Columbia"),
    ("FL", "Florida"),
    ("GA", "Georgia"),
    ("HI", "Hawaii"),
    ("ID", "Idaho"),
    ("IL", "Illinois"),
    ("IN", "Indiana"),
    ("IA", "Iowa"),
    ("KS", "Kansas"),
    ("KY", "Kentucky"),
    ("LA", "Louisiana"),
    ("ME", "Maine"),
    ("MD", "Maryland"),
    ("MA", "Massachusetts"),
    ("MI", "Michigan"),
    ("MN", "Minnesota"),
    ("MS", "Mississippi"),
    ("MO", "Missouri"),
    ("MT", "Montana"),
    ("NE", "Nebraska"),
    ("NV", "Nevada"),
    ("NH", "New Hampshire"),
    ("NJ", "New Jersey"),
    ("NM", "New Mexico"),
    ("NY", "New York"),
    ("NC", "North Carolina"),
    ("ND", "North Dakota"),
    ("OH", "Ohio"),
    ("OK", "Oklahoma"),
    ("OR", "Oregon"),
    ("PA", "Pennsylvania"),
    ("RI", "Rhode Island"),
    ("SC", "South Carolina"),
    ("SD", "South Dakota"),
    ("TN", "Tennessee"),
    ("TX", "Texas"),
    ("UT", "Utah"),
    ("VT", "Vermont"),
    ("VA", "Virginia"),
    ("WA", "Washington"),
    ("WV", "West Virginia"),
    ("WI", "Wisconsin"),
    ("WY", "Wyoming"),
];

/// Two letter postal code for a state given either as a code or a full name.
pub fn normalize_region(region: &str) -> Option<&'static str> {
    let region = region.trim();
    US_STATES
        .iter()
        .find(|(code, name)| code.eq_ignore_ascii_case(region) || name.eq_ignore_ascii_case(region))
        .map(|(code, _)| *code)
}

/// US postal address.
///
/// Required fields are checked on construction and the value is never
/// changed afterwards; a corrected address from the server replaces it.
///
/// On the wire an absent second street line is an empty string.
#[derive(Debug, Deserialize, Serialize, Clone, Eq, PartialEq, Hash)]
#[serde(try_from = "AddressFields", into = "AddressFields")]
pub struct Address {
    street1: String,
    street2: Option<String>,
    city: String,
    region: String,
    zip: String,
    is_residential: bool,
    has_been_validated: bool,
}

impl Address {
    pub fn new(
        street1: impl Into<String>,
        street2: Option<String>,
        city: impl Into<String>,
        region: impl AsRef<str>,
        zip: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let street1 = required(street1.into(), "Street")?;
        let city = required(city.into(), "City")?;
        let region = normalize_region(region.as_ref()).ok_or(ValidationError::InvalidRegion)?;
        let zip = zip.into().trim().to_string();
        if !is_valid_zip_code(&zip) {
            return Err(ValidationError::InvalidZip);
        }
        let street2 = street2
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(Address {
            street1,
            street2,
            city,
            region: region.to_string(),
            zip,
            is_residential: false,
            has_been_validated: false,
        })
    }

    pub fn residential(mut self, is_residential: bool) -> Self {
        self.is_residential = is_residential;
        self
    }

    /// Same address marked as confirmed by the validation service.
    pub fn validated(mut self) -> Self {
        self.has_been_validated = true;
        self
    }

    pub fn street1(&self) -> &str {
        &self.street1
    }

    pub fn street2(&self) -> Option<&str> {
        self.street2.as_deref()
    }

    pub fn city(&self) -> &str {
        &self.city
    }

    /// Two letter state code.
    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn zip(&self) -> &str {
        &self.zip
    }

    pub fn is_residential(&self) -> bool {
        self.is_residential
    }

    pub fn has_been_validated(&self) -> bool {
        self.has_been_validated
    }

    /// Editable copy of this address, used to pre-fill a form.
    pub fn to_draft(&self) -> AddressDraft {
        AddressDraft {
            street1: self.street1.clone(),
            street2: self.street2.clone().unwrap_or_default(),
            city: self.city.clone(),
            region: self.region.clone(),
            zip: self.zip.clone(),
        }
    }
}

fn required(value: String, field: &'static str) -> Result<String, ValidationError> {
    let value = value.trim().to_string();
    if value.is_empty() {
        Err(ValidationError::MissingField(field))
    } else {
        Ok(value)
    }
}

#[derive(Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct AddressFields {
    line1: String,
    #[serde(default)]
    line2: Option<String>,
    city: String,
    state: String,
    zip: String,
    #[serde(default)]
    is_residential: bool,
    #[serde(default)]
    has_been_validated: bool,
}

impl TryFrom<AddressFields> for Address {
    type Error = ValidationError;

    fn try_from(fields: AddressFields) -> Result<Self, Self::Error> {
        let address = Address::new(
            fields.line1,
            fields.line2,
            fields.city,
            fields.state,
            fields.zip,
        )?;
        Ok(Address {
            is_residential: fields.is_residential,
            has_been_validated: fields.has_been_validated,
            ..address
        })
    }
}

impl From<Address> for AddressFields {
    fn from(address: Address) -> Self {
        AddressFields {
            line1: address.street1,
            line2: Some(address.street2.unwrap_or_default()),
            city: address.city,
            state: address.region,
            zip: address.zip,
            is_residential: address.is_residential,
            has_been_validated: address.has_been_validated,
        }
    }
}

/// Raw address form contents while the user is typing.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AddressDraft {
    pub street1: String,
    pub street2: String,
    pub city: String,
    pub region: String,
    pub zip: String,
}

impl AddressDraft {
    /// Whether forward navigation may be enabled for this form.
    pub fn is_complete(&self) -> bool {
        !self.street1.trim().is_empty()
            && !self.city.trim().is_empty()
            && normalize_region(&self.region).is_some()
            && is_valid_zip_code(self.zip.trim())
    }

    pub fn to_address(&self) -> Result<Address, ValidationError> {
        Address::new(
            self.street1.as_str(),
            Some(self.street2.clone()),
            self.city.as_str(),
            &self.region,
            self.zip.as_str(),
        )
    }
}

/// Which address is being collected.
///
/// School and work addresses carry the home address collected before them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressStep {
    Home,
    School(Address),
    Work(Address),
}

impl AddressStep {
    pub fn home_address(&self) -> Option<&Address> {
        match self {
            AddressStep::Home => None,
            AddressStep::School(home) | AddressStep::Work(home) => Some(home),
        }
    }

    pub fn is_work_or_school(&self) -> bool {
        !matches!(self, AddressStep::Home)
    }

    pub fn name(&self) -> &'static str {
        match self {
            AddressStep::Home => "home",
            AddressStep::School(_) => "school",
            AddressStep::Work(_) => "work",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn home() -> Address {
        Address::new("476 Fifth Ave", None, "New York", "NY", "10018").unwrap()
    }

    #[test]
    fn required_fields() {
        assert_eq!(
            Err(ValidationError::MissingField("Street")),
            Address::new(" ", None, "New York", "NY", "10018")
        );
        assert_eq!(
            Err(ValidationError::MissingField("City")),
            Address::new("476 Fifth Ave", None, "", "NY", "10018")
        );
        assert_eq!(
            Err(ValidationError::InvalidZip),
            Address::new("476 Fifth Ave", None, "New York", "NY", "1001")
        );
        assert_eq!(
            Err(ValidationError::InvalidRegion),
            Address::new("476 Fifth Ave", None, "New York", "Gotham", "10018")
        );
    }

    #[test]
    fn full_state_names_normalize() {
        let address = Address::new("1 Main St", None, "Austin", "texas", "73301").unwrap();
        assert_eq!("TX", address.region());
        assert_eq!(Some("NY"), normalize_region("New York"));
        assert_eq!(Some("DC"), normalize_region("dc"));
    }

    #[test]
    fn serialize_wire_names() {
        let json = serde_json::to_value(home().residential(true)).unwrap();
        assert_eq!(
            serde_json::json!({
                "line1": "476 Fifth Ave",
                "line2": "",
                "city": "New York",
                "state": "NY",
                "zip": "10018",
                "isResidential": true,
                "hasBeenValidated": false
            }),
            json
        );
    }

    #[test]
    fn json_round_trip() {
        let with_line2 = Address::new(
            "476 Fifth Ave",
            Some("Room 100".to_string()),
            "New York",
            "NY",
            "10018-2788",
        )
        .unwrap()
        .validated();

        for address in [home(), with_line2] {
            let json = serde_json::to_string(&address).unwrap();
            let parsed: Address = serde_json::from_str(&json).unwrap();
            assert_eq!(address, parsed);
        }
    }

    #[test]
    fn deserialize_null_or_empty_line2() {
        for json in [
            r#"{"line1":"1 Main St","line2":null,"city":"Austin","state":"TX","zip":"73301"}"#,
            r#"{"line1":"1 Main St","line2":"","city":"Austin","state":"TX","zip":"73301"}"#,
            r#"{"line1":"1 Main St","city":"Austin","state":"TX","zip":"73301"}"#,
        ] {
            let address: Address = serde_json::from_str(json).unwrap();
            assert_eq!(None, address.street2());
            let value = serde_json::to_value(&address).unwrap();
            assert_eq!("", value["line2"]);
        }
    }

    #[test]
    fn deserialize_rejects_missing_street() {
        let json = r#"{"line1": "", "city": "New York", "state": "NY", "zip": "10018"}"#;
        assert!(serde_json::from_str::<Address>(json).is_err());
    }

    #[test]
    fn draft_prefill() {
        let draft = home().to_draft();
        assert!(draft.is_complete());
        assert_eq!(home(), draft.to_address().unwrap());

        let mut draft = AddressDraft::default();
        assert!(!draft.is_complete());
        draft.zip = "10018-".to_string();
        assert!(!draft.is_complete());
    }

    #[test]
    fn address_steps_carry_home() {
        let step = AddressStep::Work(home());
        assert!(step.is_work_or_school());
        assert_eq!(Some(&home()), step.home_address());
        assert_eq!(None, AddressStep::Home.home_address());
    }
}
