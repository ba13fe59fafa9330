//! Phone number normalisation
//!
//! Every number the service stores or sends is an 11-digit string starting
//! with `7`. Free-form input (`+7 (916) 123-45-67`, `8 916 ...`, bare 10-digit
//! numbers) is reduced to digits and mapped onto that form.

use thiserror::Error;
use wacast_common::Error;

/// Length of a canonical number
pub const CANONICAL_LEN: usize = 11;

/// Phone normalisation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PhoneError {
    #[error("invalid phone number format: {0:?}")]
    InvalidFormat(String),
}

impl PhoneError {
    pub fn code(&self) -> &'static str {
        match self {
            PhoneError::InvalidFormat(_) => "invalid_phone_format",
        }
    }
}

impl From<PhoneError> for Error {
    fn from(e: PhoneError) -> Self {
        Error::validation(e.code(), e.to_string())
    }
}

/// Canonicalise a phone number.
///
/// Idempotent: a canonical number normalises to itself.
pub fn normalize(input: &str) -> Result<String, PhoneError> {
    let digits: String = input.chars().filter(|c| c.is_ascii_digit()).collect();

    match (digits.len(), digits.as_bytes().first()) {
        (11, Some(b'7')) => Ok(digits),
        (11, Some(b'8')) => Ok(format!("7{}", &digits[1..])),
        (10, _) => Ok(format!("7{}", digits)),
        (12, Some(b'7')) if digits.as_bytes()[1] == b'7' => Ok(digits[1..].to_string()),
        _ => Err(PhoneError::InvalidFormat(input.trim().to_string())),
    }
}

/// Whether `input` is already in canonical form
pub fn is_canonical(input: &str) -> bool {
    input.len() == CANONICAL_LEN
        && input.starts_with('7')
        && input.bytes().all(|b| b.is_ascii_digit())
}

/// Parse a free-form list of numbers supplied in a form field.
///
/// Entries are separated by commas, semicolons or whitespace. Any entry that
/// fails to normalise is reported against `field`. Duplicates are dropped,
/// keeping the first occurrence.
pub fn parse_list(field: &str, input: &str) -> Result<Vec<String>, Error> {
    let mut seen = std::collections::HashSet::new();
    let mut numbers = Vec::new();

    for entry in split_entries(input) {
        let canonical = normalize(entry).map_err(|e| Error::Validation {
            code: e.code(),
            field: Some(field.to_string()),
            message: e.to_string(),
        })?;
        if seen.insert(canonical.clone()) {
            numbers.push(canonical);
        }
    }

    Ok(numbers)
}

fn split_entries(input: &str) -> impl Iterator<Item = &str> {
    // Spaces inside a single number ("+7 916 123 45 67") are common, so split
    // on whitespace only when the line has no explicit separators.
    input
        .lines()
        .flat_map(|line| {
            if line.contains([',', ';']) {
                line.split([',', ';']).collect::<Vec<_>>()
            } else if looks_like_single_number(line) {
                vec![line]
            } else {
                line.split_whitespace().collect()
            }
        })
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
}

fn looks_like_single_number(line: &str) -> bool {
    let digits = line.chars().filter(|c| c.is_ascii_digit()).count();
    (10..=12).contains(&digits)
}
