/*!
Registration flow.

A [`Flow`] walks one person through the card application. Every operation
checks that it is valid for the current [`Step`], updates the [`Session`] and
either moves to the next step or leaves the flow where it was and returns a
[`FlowError`] to show to the user.

Regular registration:

```text
Introduction -> Location -> Address(Home)
    -> [OutOfStateChoice -> Address(School | Work)]
    -> NameAndEmail -> UsernameAndPassword -> Summary -> Credentials
```

Juvenile registration skips addresses and email:

```text
Introduction -> Location -> PersonalInfo -> UsernameAndPassword -> Summary -> Credentials
```

Operations take `&mut self`, so a second action cannot start while a
request is outstanding, and completions are handled in the order they are
awaited.
*/
use chrono::{DateTime, Utc};
use std::fmt;
use tracing::{debug, info, warn};
use validator::Validate;

use crate::error::{FlowError, ValidationError};
use crate::location::{Eligibility, LocationFailure, LocationFix, LocationGate, Placemark};
use crate::patron::SIMPLYE_POLICY;
use crate::validation::{is_valid_email, meets_minimum_age, validate_username, PasswordValidator};
use crate::{
    Address, AddressDraft, AddressStep, AuthToken, CardType, Credentials, JuvenileCreationInfo,
    PatronCreationInfo, PersonalInfo, RegistrationApi, ValidateAddressResponse,
    ValidateUsernameResponse,
};

/// Called once registration is over with the issued credentials and whether
/// the user dismissed the credentials screen themselves.
pub type CompletionHandler = Box<dyn FnOnce(&Credentials, bool) + Send>;

/// Which kind of card is being applied for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowKind {
    Regular,
    /// Dependent card added by a logged in parent.
    Juvenile { parent_barcode: String },
}

/// Where the home address was not enough on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutOfStateChoice {
    Work,
    School,
    EditHome,
}

impl OutOfStateChoice {
    pub const ALL: [OutOfStateChoice; 3] = [
        OutOfStateChoice::Work,
        OutOfStateChoice::School,
        OutOfStateChoice::EditHome,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Age or guardian attestation and terms of use.
    Introduction,
    Location,
    Address(AddressStep),
    /// The server suggested corrections for the address entered on `step`.
    AlternativeAddresses {
        step: AddressStep,
        candidates: Vec<(Address, CardType)>,
    },
    /// The home address alone does not qualify; the user must pick one of
    /// [`OutOfStateChoice::ALL`].
    OutOfStateChoice { home: Address },
    NameAndEmail,
    /// Juvenile name entry.
    PersonalInfo,
    UsernameAndPassword,
    Summary,
    Credentials(Credentials),
    /// No card can be issued for the addresses given.
    Denied,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Introduction => "introduction",
            Step::Location => "location",
            Step::Address(_) => "address",
            Step::AlternativeAddresses { .. } => "alternative addresses",
            Step::OutOfStateChoice { .. } => "out of state choice",
            Step::NameAndEmail => "name and email",
            Step::PersonalInfo => "personal info",
            Step::UsernameAndPassword => "username and password",
            Step::Summary => "summary",
            Step::Credentials(_) => "credentials",
            Step::Denied => "denied",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Step::Credentials(_) | Step::Denied)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything entered so far in one registration attempt.
#[derive(Debug, Default, Clone)]
pub struct Session {
    pub attested: bool,
    pub eula_accepted: bool,
    pub eligibility: Option<Eligibility>,
    pub home_address: Option<Address>,
    pub school_or_work_address: Option<Address>,
    pub card_type: Option<CardType>,
    pub personal_info: Option<PersonalInfo>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Last username the server reported as available.
    pub confirmed_username: Option<String>,
    pub token: Option<AuthToken>,
}

/// Registration state machine for one user.
pub struct Flow<A> {
    api: A,
    kind: FlowKind,
    step: Step,
    history: Vec<Step>,
    session: Session,
    location: LocationGate,
    on_complete: Option<CompletionHandler>,
}

impl<A> fmt::Debug for Flow<A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Flow")
            .field("kind", &self.kind)
            .field("step", &self.step)
            .field("history", &self.history)
            .finish()
    }
}

macro_rules! expect_step {
    ($flow:expr, $pattern:pat, $expected:expr) => {
        if !matches!($flow.step, $pattern) {
            return Err(FlowError::InvalidStep {
                expected: $expected,
                actual: $flow.step.name(),
            });
        }
    };
}

impl<A: RegistrationApi> Flow<A> {
    pub fn new(api: A, kind: FlowKind, on_complete: CompletionHandler) -> Self {
        Flow {
            api,
            kind,
            step: Step::Introduction,
            history: Vec::new(),
            session: Session::default(),
            location: LocationGate::new(),
            on_complete: Some(on_complete),
        }
    }

    pub fn step(&self) -> &Step {
        &self.step
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn kind(&self) -> &FlowKind {
        &self.kind
    }

    pub fn is_juvenile(&self) -> bool {
        matches!(self.kind, FlowKind::Juvenile { .. })
    }

    fn advance(&mut self, next: Step) -> &Step {
        info!(from = %self.step, to = %next, "registration step");
        let previous = std::mem::replace(&mut self.step, next);
        self.history.push(previous);
        &self.step
    }

    /// Returns to the previous step. Entered values stay in the session.
    pub fn back(&mut self) -> Result<&Step, FlowError> {
        if self.step.is_terminal() {
            return Err(FlowError::InvalidStep {
                expected: "a non terminal step",
                actual: self.step.name(),
            });
        }
        let previous = self.history.pop().ok_or(FlowError::InvalidStep {
            expected: "a step after introduction",
            actual: self.step.name(),
        })?;
        debug!(from = %self.step, to = %previous, "registration step back");
        if previous == Step::Location {
            self.location.reset();
        }
        self.step = previous;
        Ok(&self.step)
    }

    /// Abandons the registration and stops any pending request.
    pub fn cancel(self) {
        info!(step = %self.step, "registration cancelled");
        self.api.invalidate();
    }

    pub fn accept_introduction(
        &mut self,
        attested: bool,
        eula_accepted: bool,
    ) -> Result<&Step, FlowError> {
        expect_step!(self, Step::Introduction, "introduction");
        self.session.attested = attested;
        self.session.eula_accepted = eula_accepted;
        if !attested {
            return Err(FlowError::AttestationRequired);
        }
        if !eula_accepted {
            return Err(FlowError::EulaRequired);
        }
        Ok(self.advance(Step::Location))
    }

    /// Forwards a device location update. Returns the fix when it should be
    /// reverse geocoded and handed to [`resolve_location`](Self::resolve_location).
    pub fn offer_location_fix(
        &mut self,
        fix: LocationFix,
        now: DateTime<Utc>,
    ) -> Option<LocationFix> {
        if self.step != Step::Location {
            return None;
        }
        self.location.offer(fix, now)
    }

    /// The app came back to the foreground; location permission may have
    /// changed, so the check starts over.
    pub fn on_foreground(&mut self) {
        if self.step == Step::Location {
            self.location.reset();
        }
    }

    pub async fn resolve_location(
        &mut self,
        placemark: Result<Placemark, LocationFailure>,
    ) -> Result<&Step, FlowError> {
        expect_step!(self, Step::Location, "location");

        let placemark = match placemark {
            Ok(placemark) => placemark,
            Err(failure) => {
                warn!(%failure, "location unavailable");
                self.location.failed();
                return Err(FlowError::Location(failure));
            }
        };

        let eligibility = Eligibility::from_placemark(&placemark);
        self.location.resolved(eligibility);
        self.session.eligibility = Some(eligibility);
        debug!(eligibility = eligibility.as_str(), "location resolved");

        match self.kind.clone() {
            FlowKind::Regular => {
                if !eligibility.is_new_york_state() {
                    return Err(FlowError::LocationIneligible(eligibility));
                }
                Ok(self.advance(Step::Address(AddressStep::Home)))
            }
            FlowKind::Juvenile { parent_barcode } => {
                if eligibility == Eligibility::Outside {
                    return Err(FlowError::LocationIneligible(eligibility));
                }
                let token = self.required_token().await?;
                self.api
                    .check_juvenile_eligibility(&token, &parent_barcode)
                    .await?;
                Ok(self.advance(Step::PersonalInfo))
            }
        }
    }

    /// Values to pre-fill the current address form with.
    pub fn address_prefill(&self) -> AddressDraft {
        let address = match self.step {
            Step::Address(AddressStep::Home) => self.session.home_address.as_ref(),
            Step::Address(_) => self.session.school_or_work_address.as_ref(),
            _ => None,
        };
        address.map(Address::to_draft).unwrap_or_default()
    }

    pub async fn submit_address(&mut self, address: Address) -> Result<&Step, FlowError> {
        let step = match self.step {
            Step::Address(ref step) => step.clone(),
            _ => {
                return Err(FlowError::InvalidStep {
                    expected: "address",
                    actual: self.step.name(),
                })
            }
        };

        match step {
            AddressStep::Home => {
                self.rewind_to_home_entry();
                self.session.home_address = Some(address.clone());
            }
            _ => self.session.school_or_work_address = Some(address.clone()),
        }

        let token = self.optional_token().await?;
        let response = self
            .api
            .validate_address(token.as_ref(), &address, step.is_work_or_school())
            .await?;

        match response {
            ValidateAddressResponse::ValidAddress(address, card_type) => {
                Ok(self.apply_validated_address(step, address, card_type))
            }
            ValidateAddressResponse::AlternativeAddresses(candidates) if candidates.is_empty() => {
                Err(FlowError::UnrecognizedAddress(String::new()))
            }
            ValidateAddressResponse::AlternativeAddresses(candidates) => {
                debug!(count = candidates.len(), "alternative addresses suggested");
                Ok(self.advance(Step::AlternativeAddresses { step, candidates }))
            }
            ValidateAddressResponse::UnrecognizedAddress(message) => {
                warn!(address_step = step.name(), "address not recognized");
                Err(FlowError::UnrecognizedAddress(message))
            }
        }
    }

    /// Picks one of the server suggested addresses.
    pub fn choose_alternative_address(&mut self, index: usize) -> Result<&Step, FlowError> {
        let (step, address, card_type) = match self.step {
            Step::AlternativeAddresses {
                ref step,
                ref candidates,
            } => {
                let (address, card_type) = candidates
                    .get(index)
                    .cloned()
                    .ok_or(FlowError::ChoiceOutOfRange(index))?;
                (step.clone(), address, card_type)
            }
            _ => {
                return Err(FlowError::InvalidStep {
                    expected: "alternative addresses",
                    actual: self.step.name(),
                })
            }
        };
        Ok(self.apply_validated_address(step, address, card_type))
    }

    fn apply_validated_address(
        &mut self,
        step: AddressStep,
        address: Address,
        card_type: CardType,
    ) -> &Step {
        self.session.card_type = Some(card_type);
        match step {
            AddressStep::Home => {
                self.rewind_to_home_entry();
                self.session.home_address = Some(address.clone());
                self.session.school_or_work_address = None;
                if card_type.can_issue() {
                    self.advance(Step::NameAndEmail)
                } else {
                    self.advance(Step::OutOfStateChoice { home: address })
                }
            }
            AddressStep::School(_) | AddressStep::Work(_) => {
                self.session.school_or_work_address = Some(address);
                if card_type.can_issue() {
                    self.advance(Step::NameAndEmail)
                } else {
                    warn!(card_type = card_type.as_str(), "no card can be issued");
                    self.advance(Step::Denied)
                }
            }
        }
    }

    /// Drops every step recorded after the first home address form, so
    /// going back never reaches choices made for an earlier home address.
    fn rewind_to_home_entry(&mut self) {
        let first_home = self
            .history
            .iter()
            .position(|step| *step == Step::Address(AddressStep::Home));
        if let Some(position) = first_home {
            self.history.truncate(position + 1);
            if self.step == Step::Address(AddressStep::Home) {
                self.history.pop();
            }
        }
    }

    pub fn choose_out_of_state(&mut self, choice: OutOfStateChoice) -> Result<&Step, FlowError> {
        let home = match self.step {
            Step::OutOfStateChoice { ref home } => home.clone(),
            _ => {
                return Err(FlowError::InvalidStep {
                    expected: "out of state choice",
                    actual: self.step.name(),
                })
            }
        };
        let next = match choice {
            OutOfStateChoice::School => AddressStep::School(home),
            OutOfStateChoice::Work => AddressStep::Work(home),
            OutOfStateChoice::EditHome => AddressStep::Home,
        };
        Ok(self.advance(Step::Address(next)))
    }

    /// Whether forward navigation may be enabled for this personal info.
    pub fn personal_info_ready(&self, info: &PersonalInfo) -> bool {
        self.check_personal_info(info).is_ok()
    }

    fn check_personal_info(&self, info: &PersonalInfo) -> Result<(), ValidationError> {
        match info.email.as_deref().map(str::trim) {
            Some(email) if !email.is_empty() && !is_valid_email(email) => {
                return Err(ValidationError::InvalidEmail)
            }
            None | Some("") if !self.is_juvenile() => {
                return Err(ValidationError::MissingField("Email"))
            }
            _ => {}
        }
        if let Some(birthdate) = info.birthdate {
            if !self.is_juvenile() && !meets_minimum_age(birthdate, Utc::now().date_naive()) {
                return Err(ValidationError::TooYoung);
            }
        }
        info.validate()?;
        Ok(())
    }

    pub fn submit_personal_info(&mut self, info: PersonalInfo) -> Result<&Step, FlowError> {
        expect_step!(
            self,
            Step::NameAndEmail | Step::PersonalInfo,
            "name and email"
        );
        self.check_personal_info(&info)?;
        self.session.personal_info = Some(info);
        Ok(self.advance(Step::UsernameAndPassword))
    }

    fn password_validator(&self) -> PasswordValidator {
        if self.is_juvenile() {
            PasswordValidator::dependent()
        } else {
            PasswordValidator::patron()
        }
    }

    /// Local checks only; the server still has to confirm the username.
    pub fn credentials_ready(&self, username: &str, password: &str) -> bool {
        validate_username(username).is_ok() && self.password_validator().validate(password).is_ok()
    }

    pub async fn submit_username_and_password(
        &mut self,
        username: String,
        password: String,
    ) -> Result<&Step, FlowError> {
        expect_step!(self, Step::UsernameAndPassword, "username and password");

        validate_username(&username)?;
        self.password_validator().validate(&password)?;

        self.session.username = Some(username.clone());
        self.session.password = Some(password);

        let token = self.optional_token().await?;
        match self
            .api
            .validate_username(token.as_ref(), &username)
            .await?
        {
            ValidateUsernameResponse::Available => {
                self.session.confirmed_username = Some(username);
                Ok(self.advance(Step::Summary))
            }
            ValidateUsernameResponse::Unavailable => Err(FlowError::UsernameUnavailable),
            ValidateUsernameResponse::Invalid => Err(FlowError::UsernameInvalid),
        }
    }

    /// Builds the patron payload from the session. Only valid on the summary step.
    pub fn patron_creation_info(&self) -> Result<PatronCreationInfo, FlowError> {
        expect_step!(self, Step::Summary, "summary");
        let session = &self.session;
        let info = session
            .personal_info
            .as_ref()
            .ok_or(ValidationError::MissingField("Name"))?;
        let address = session
            .home_address
            .clone()
            .ok_or(ValidationError::MissingField("Address"))?;
        let (username, password) = self.confirmed_credentials()?;

        Ok(PatronCreationInfo {
            name: info.full_name(),
            email: info
                .email
                .clone()
                .ok_or(ValidationError::MissingField("Email"))?,
            address,
            username,
            password,
            work_or_school_address: session.school_or_work_address.clone(),
            birthdate: info.birthdate,
            username_has_been_validated: true,
            policy_type: SIMPLYE_POLICY.to_string(),
            age_gate: session.attested,
            accept_terms: session.eula_accepted,
        })
    }

    /// Builds the dependent payload from the session. Only valid on the summary step.
    pub fn juvenile_creation_info(&self) -> Result<JuvenileCreationInfo, FlowError> {
        expect_step!(self, Step::Summary, "summary");
        let parent_barcode = match self.kind {
            FlowKind::Juvenile { ref parent_barcode } => parent_barcode.clone(),
            FlowKind::Regular => {
                return Err(FlowError::InvalidStep {
                    expected: "juvenile summary",
                    actual: self.step.name(),
                })
            }
        };
        let info = self
            .session
            .personal_info
            .as_ref()
            .ok_or(ValidationError::MissingField("Name"))?;
        let (username, pin) = self.confirmed_credentials()?;

        Ok(JuvenileCreationInfo {
            barcode: parent_barcode,
            name: info.full_name(),
            username,
            pin,
        })
    }

    fn confirmed_credentials(&self) -> Result<(String, String), FlowError> {
        let username = self
            .session
            .confirmed_username
            .clone()
            .filter(|confirmed| self.session.username.as_ref() == Some(confirmed))
            .ok_or(ValidationError::MissingField("Username"))?;
        let password = self
            .session
            .password
            .clone()
            .ok_or(ValidationError::MissingField("Password"))?;
        Ok((username, password))
    }

    /// Sends the application. On success the flow shows the issued credentials.
    pub async fn submit(&mut self) -> Result<&Step, FlowError> {
        expect_step!(self, Step::Summary, "summary");

        let credentials = if self.is_juvenile() {
            let payload = self.juvenile_creation_info()?;
            let token = self.required_token().await?;
            self.api.create_juvenile(&token, &payload).await?
        } else {
            let payload = self.patron_creation_info()?;
            let token = self.optional_token().await?;
            self.api.create_patron(token.as_ref(), &payload).await?
        };

        info!(barcode = %credentials.barcode, "card issued");
        Ok(self.advance(Step::Credentials(credentials)))
    }

    /// Reports the issued credentials to the completion handler. Happens once.
    pub fn complete(&mut self, user_initiated: bool) -> Result<(), FlowError> {
        let credentials = match self.step {
            Step::Credentials(ref credentials) => credentials,
            _ => {
                return Err(FlowError::InvalidStep {
                    expected: "credentials",
                    actual: self.step.name(),
                })
            }
        };
        let on_complete = self.on_complete.take().ok_or(FlowError::AlreadyCompleted)?;
        on_complete(credentials, user_initiated);
        self.session.token = None;
        Ok(())
    }

    async fn optional_token(&mut self) -> Result<Option<AuthToken>, FlowError> {
        if !self.api.has_client_credentials() {
            return Ok(None);
        }
        self.required_token().await.map(Some)
    }

    async fn required_token(&mut self) -> Result<AuthToken, FlowError> {
        if let Some(ref token) = self.session.token {
            if !token.expired() {
                return Ok(token.clone());
            }
            debug!("session token expired");
        }
        let token = self.api.authenticate().await?;
        self.session.token = Some(token.clone());
        Ok(token)
    }
}
