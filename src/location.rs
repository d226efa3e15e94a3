/*!
Geolocation eligibility gate.

Cards are only issued to people physically in New York State. The device
resolves coordinates to a [`Placemark`]; this module turns it into an
[`Eligibility`] and decides which location fixes are worth resolving.
*/
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use tracing::{debug, warn};

/// Fixes older than this are ignored.
pub const MAX_FIX_AGE_MINUTES: i64 = 5;

/// Reverse geocoded device location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placemark {
    /// ISO 3166 country code, e.g. `US`.
    pub iso_country_code: Option<String>,
    /// State name or code, e.g. `NY` or `New York`.
    pub administrative_area: Option<String>,
    pub postal_code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Eligibility {
    /// Within one of the five boroughs.
    Nyc,
    /// Elsewhere in New York State.
    Nys,
    /// In the United States, outside New York.
    Us,
    /// Outside the United States or unknown.
    Outside,
}

const NYC_ZIP_RANGES: &[(u32, u32)] = &[(10001, 10499), (11001, 11499), (11601, 11699)];

impl Eligibility {
    pub fn from_placemark(placemark: &Placemark) -> Eligibility {
        if placemark.iso_country_code.as_deref() != Some("US") {
            return Eligibility::Outside;
        }

        match placemark.administrative_area.as_deref() {
            Some("NY") | Some("New York") => {}
            _ => return Eligibility::Us,
        }

        let zip = placemark
            .postal_code
            .as_deref()
            .and_then(|code| code.get(..5))
            .and_then(|code| code.parse::<u32>().ok());

        match zip {
            Some(zip) if NYC_ZIP_RANGES.iter().any(|(lo, hi)| (*lo..=*hi).contains(&zip)) => {
                Eligibility::Nyc
            }
            _ => Eligibility::Nys,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match *self {
            Eligibility::Nyc => "nyc",
            Eligibility::Nys => "nys",
            Eligibility::Us => "us",
            Eligibility::Outside => "",
        }
    }

    pub fn is_new_york_state(&self) -> bool {
        matches!(self, Eligibility::Nyc | Eligibility::Nys)
    }
}

/// Why the location could not be determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationFailure {
    PermissionDenied,
    Restricted,
    ResolutionFailed,
}

/// What the user can do about a [`LocationFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    OpenSettings,
    Retry,
}

impl LocationFailure {
    pub fn recovery(&self) -> RecoveryAction {
        match *self {
            LocationFailure::PermissionDenied | LocationFailure::Restricted => {
                RecoveryAction::OpenSettings
            }
            LocationFailure::ResolutionFailed => RecoveryAction::Retry,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match *self {
            LocationFailure::PermissionDenied => {
                "Location access is needed to confirm you are in New York. Please allow it in Settings."
            }
            LocationFailure::Restricted => {
                "Location services are restricted on this device. Please check Settings."
            }
            LocationFailure::ResolutionFailed => {
                "Your location could not be determined. Please try again."
            }
        }
    }
}

impl fmt::Display for LocationFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match *self {
            LocationFailure::PermissionDenied => "permission denied",
            LocationFailure::Restricted => "restricted",
            LocationFailure::ResolutionFailed => "resolution failed",
        };
        f.write_str(name)
    }
}

/// Raw location update from the device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Waiting,
    Resolving,
    Resolved(Eligibility),
}

/// Picks the first recent location fix and drops everything after it.
#[derive(Debug, Clone)]
pub struct LocationGate {
    state: GateState,
    max_age: Duration,
}

impl Default for LocationGate {
    fn default() -> Self {
        LocationGate {
            state: GateState::Waiting,
            max_age: Duration::minutes(MAX_FIX_AGE_MINUTES),
        }
    }
}

impl LocationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the fix when it should be reverse geocoded.
    pub fn offer(&mut self, fix: LocationFix, now: DateTime<Utc>) -> Option<LocationFix> {
        if self.state != GateState::Waiting {
            debug!("location already being resolved, ignoring update");
            return None;
        }
        if now - fix.timestamp > self.max_age {
            warn!(timestamp = %fix.timestamp, "ignoring stale location fix");
            return None;
        }
        self.state = GateState::Resolving;
        Some(fix)
    }

    pub fn resolved(&mut self, eligibility: Eligibility) {
        self.state = GateState::Resolved(eligibility);
    }

    /// Resolution failed; the next fix is accepted again.
    pub fn failed(&mut self) {
        self.state = GateState::Waiting;
    }

    pub fn eligibility(&self) -> Option<Eligibility> {
        match self.state {
            GateState::Resolved(eligibility) => Some(eligibility),
            _ => None,
        }
    }

    /// Starts over, e.g. when the app returns to the foreground and location
    /// permission may have changed.
    pub fn reset(&mut self) {
        self.state = GateState::Waiting;
    }
}
