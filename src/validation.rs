/*!
Client side field validation.

These checks only filter obviously bad input before anything is sent. The
platform re-validates usernames and addresses and its answer wins.
*/
use chrono::{Months, NaiveDate};
use regex::Regex;

use crate::error::{PasswordError, ValidationError};

pub const USERNAME_MIN_LENGTH: usize = 5;
pub const USERNAME_MAX_LENGTH: usize = 25;

pub const PASSWORD_MIN_LENGTH: usize = 8;
pub const PASSWORD_MAX_LENGTH: usize = 32;

pub const PIN_MIN_LENGTH: usize = 4;

pub const MINIMUM_AGE_YEARS: u32 = 13;

const PASSWORD_SYMBOLS: &str = "~!?@#$%^&*()";

lazy_static! {
    /// Loose `something@something.something` shape. Not RFC 5322.
    pub static ref EMAIL_SHAPE: Regex = Regex::new(r"^.+@.+\..+$").unwrap();
}

/// Whether `zip` could still become a valid ZIP code as the user keeps typing.
///
/// Accepts up to nine digits, optionally with a single hyphen at index 5.
pub fn is_possible_start_of_valid_zip_code(zip: &str) -> bool {
    let bytes = zip.as_bytes();
    let hyphenated = bytes.len() > 5 && bytes[5] == b'-';
    let limit = if hyphenated { 10 } else { 9 };

    if bytes.len() > limit {
        return false;
    }

    bytes
        .iter()
        .enumerate()
        .all(|(i, b)| b.is_ascii_digit() || (hyphenated && i == 5))
}

/// `NNNNN` or `NNNNN-NNNN`.
pub fn is_valid_zip_code(zip: &str) -> bool {
    is_possible_start_of_valid_zip_code(zip)
        && match zip.len() {
            5 => true,
            10 => zip.as_bytes()[5] == b'-',
            _ => false,
        }
}

/// Applies the keystroke formatting for ZIP code entry.
///
/// A sixth character without a hyphen pushes a hyphen in after the first five
/// digits; a trailing lone hyphen is stripped once the suffix is deleted.
pub fn format_zip_code_input(zip: &str) -> String {
    let hyphenated = zip.len() > 5 && zip.as_bytes()[5] == b'-';
    if zip.len() == 6 && hyphenated {
        return zip[..5].to_string();
    }
    if zip.len() >= 6 && !hyphenated && zip.is_char_boundary(5) {
        return format!("{}-{}", &zip[..5], &zip[5..]);
    }
    zip.to_string()
}

pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    let valid = (USERNAME_MIN_LENGTH..=USERNAME_MAX_LENGTH).contains(&username.len())
        && username.bytes().all(|b| b.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidUsername {
            min: USERNAME_MIN_LENGTH,
            max: USERNAME_MAX_LENGTH,
        })
    }
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_SHAPE.is_match(email)
}

/// True once `today` is on or after the thirteenth birthday.
pub fn meets_minimum_age(birthdate: NaiveDate, today: NaiveDate) -> bool {
    birthdate
        .checked_add_months(Months::new(MINIMUM_AGE_YEARS * 12))
        .map(|birthday| today >= birthday)
        .unwrap_or(false)
}

/// Password and PIN rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordValidator {
    pub min_length: usize,
    pub max_length: usize,
}

impl PasswordValidator {
    pub fn new(min_length: usize, max_length: usize) -> Self {
        PasswordValidator {
            min_length,
            max_length,
        }
    }

    /// Rules for adult patron passwords.
    pub fn patron() -> Self {
        Self::new(PASSWORD_MIN_LENGTH, PASSWORD_MAX_LENGTH)
    }

    /// Rules for juvenile dependent PINs.
    pub fn dependent() -> Self {
        Self::new(PIN_MIN_LENGTH, PASSWORD_MAX_LENGTH)
    }

    /// Checks the rules in order and reports the first one broken.
    pub fn validate(&self, password: &str) -> Result<(), PasswordError> {
        let chars: Vec<char> = password.chars().collect();

        if chars.len() < self.min_length || chars.len() > self.max_length {
            return Err(PasswordError::InvalidCount {
                min: self.min_length,
                max: self.max_length,
            });
        }
        if !chars.iter().all(|&c| is_password_char(c)) {
            return Err(PasswordError::InvalidCharacter);
        }
        if has_repeating_character(&chars) {
            return Err(PasswordError::RepeatingCharacter);
        }
        if has_repeating_pattern(&chars) {
            return Err(PasswordError::RepeatingPattern);
        }
        Ok(())
    }
}

impl Default for PasswordValidator {
    fn default() -> Self {
        Self::patron()
    }
}

fn is_password_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || PASSWORD_SYMBOLS.contains(c)
}

// Same as the pattern `(.)\1\1`.
fn has_repeating_character(chars: &[char]) -> bool {
    chars.windows(3).any(|w| w[0] == w[1] && w[1] == w[2])
}

// Same as the pattern `([\w~!?@#$%^&*()]{2,4})\1+`, restricted to the
// characters that survive the earlier rules.
fn has_repeating_pattern(chars: &[char]) -> bool {
    (2..=4).any(|len| {
        chars.len() >= len * 2
            && (0..=chars.len() - len * 2)
                .any(|start| chars[start..start + len] == chars[start + len..start + len * 2])
    })
}
