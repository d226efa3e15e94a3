/*!
# Library card registration flow and patron validation client using async / await

## Legal

Dual-licensed under `MIT` or the [UNLICENSE](http://unlicense.org/).

## Features

Walks a person through applying for a library card:

- attestation and terms of use,
- geolocation check that the applicant is in New York State,
- home address entry and server side validation, with a second school or
  work address when the home address is out of state,
- name and email,
- username and password, with the username confirmed by the server,
- submission to the patron creation API and display of the issued card.

Juvenile dependent cards are created by a logged in parent through the patron
platform with a client credentials token.

Using [reqwest](https://crates.io/crates/reqwest) for the HTTP client and
[tracing](https://crates.io/crates/tracing) for diagnostics. No subscriber is
installed by this crate.

## Usage

Add dependency to Cargo.toml:

```toml
[dependencies]
librarycard = "0.1"
```

Drive a registration from any front end:

```rust,ignore
use librarycard::{Address, Client, Config, Credentials, Flow, FlowKind, PersonalInfo, Placemark};

let config = Config::from_json(&std::fs::read_to_string("registration.json")?)?;
let client = Client::new(config)?;

let mut flow = Flow::new(
    client,
    FlowKind::Regular,
    Box::new(|credentials: &Credentials, user_initiated: bool| {
        println!("issued {} (dismissed by user: {})", credentials.barcode, user_initiated);
    }),
);

flow.accept_introduction(true, true)?;
flow.resolve_location(Ok(Placemark {
    iso_country_code: Some("US".into()),
    administrative_area: Some("NY".into()),
    postal_code: Some("10018".into()),
}))
.await?;

let home = Address::new("476 Fifth Ave", None, "New York", "NY", "10018")?;
flow.submit_address(home).await?;

flow.submit_personal_info(PersonalInfo {
    first_name: "Ada".into(),
    last_name: "Lovelace".into(),
    email: Some("ada@example.com".into()),
    ..Default::default()
})?;
flow.submit_username_and_password("ada1815".into(), "Analytic1!".into())
    .await?;
flow.submit().await?;
flow.complete(true)?;
```

Errors keep the flow on the current step; show `error.user_message()` and
let the user try again.
*/
#[macro_use]
extern crate lazy_static;

mod address;
mod api;
mod card_type;
mod client;
pub mod config;
pub mod error;
pub mod flow;
pub mod location;
mod patron;
mod response;
mod token;
pub mod validation;

pub use address::{normalize_region, Address, AddressDraft, AddressStep};
pub use api::RegistrationApi;
pub use card_type::CardType;
pub use client::Client;
pub use config::{BasicCredentials, Config, PlatformConfig};
pub use error::{
    AuthError, ClientError, Error, FlowError, PasswordError, PlatformError, ValidationError,
};
pub use flow::{CompletionHandler, Flow, FlowKind, OutOfStateChoice, Session, Step};
pub use location::{Eligibility, LocationFailure, LocationFix, LocationGate, Placemark};
pub use patron::{JuvenileCreationInfo, PatronCreationInfo, PersonalInfo};
pub use response::{Credentials, ValidateAddressResponse, ValidateUsernameResponse};
pub use token::AuthToken;
pub use validation::PasswordValidator;
