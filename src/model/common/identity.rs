use std::fmt::{Debug, Display};
use std::ops::Deref;
use std::str::FromStr;

use mongodb::bson::Bson;
use rand::distributions::{Distribution, Uniform};
use rocket::{
    http::{
        impl_from_uri_param_identity,
        uri::fmt::{Path, UriDisplay},
    },
    request::FromParam,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIN_IDENTITY_LENGTH: usize = 5;
pub const MAX_IDENTITY_LENGTH: usize = 20;
pub const MIN_CODE_LENGTH: usize = 4;
pub const MAX_CODE_LENGTH: usize = 32;
pub const GENERATED_CODE_LENGTH: usize = 8;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// A voter's roll identifier (NIM/NPM/NIK): ASCII digits only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdentityNumber(String);

impl IdentityNumber {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for IdentityNumber {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        check_length(s, MIN_IDENTITY_LENGTH, MAX_IDENTITY_LENGTH)?;
        if let Some(c) = s.chars().find(|c| !c.is_ascii_digit()) {
            return Err(ParseError::InvalidChar(c));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for IdentityNumber {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IdentityNumber> for String {
    fn from(nim: IdentityNumber) -> Self {
        nim.0
    }
}

impl From<&IdentityNumber> for Bson {
    fn from(nim: &IdentityNumber) -> Self {
        Bson::String(nim.0.clone())
    }
}

impl Deref for IdentityNumber {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for IdentityNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'a> FromParam<'a> for IdentityNumber {
    type Error = ParseError;

    fn from_param(param: &'a str) -> Result<Self, Self::Error> {
        param.parse()
    }
}

impl UriDisplay<Path> for IdentityNumber {
    fn fmt(&self, formatter: &mut rocket::http::uri::fmt::Formatter<'_, Path>) -> std::fmt::Result {
        formatter.write_value(&self.0)
    }
}

impl_from_uri_param_identity!([Path] IdentityNumber);

/// A plaintext one-time access code. Only ever held in memory; the debug
/// representation is redacted so it cannot leak into logs.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessCode(String);

impl AccessCode {
    /// Generate a random code from a 62-character alphabet.
    pub fn random() -> Self {
        let index = Uniform::from(0..CODE_ALPHABET.len());
        let mut rng = rand::thread_rng();
        let code = (0..GENERATED_CODE_LENGTH)
            .map(|_| char::from(CODE_ALPHABET[index.sample(&mut rng)]))
            .collect();
        Self(code)
    }

    /// The plaintext, for hashing or for the one-time display to an admin.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn into_plaintext(self) -> String {
        self.0
    }
}

impl FromStr for AccessCode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        check_length(s, MIN_CODE_LENGTH, MAX_CODE_LENGTH)?;
        if let Some(c) = s.chars().find(|c| !c.is_ascii_graphic()) {
            return Err(ParseError::InvalidChar(c));
        }
        Ok(Self(s.to_string()))
    }
}

impl Debug for AccessCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessCode(<redacted>)")
    }
}

fn check_length(s: &str, min: usize, max: usize) -> Result<(), ParseError> {
    let len = s.chars().count();
    if len < min || len > max {
        return Err(ParseError::InvalidLength { min, max, found: len });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("must be between {min} and {max} characters, found {found}")]
    InvalidLength { min: usize, max: usize, found: usize },
    #[error("invalid character {0:?}")]
    InvalidChar(char),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_numbers() {
        assert_eq!("2235001".parse::<IdentityNumber>().unwrap().as_str(), "2235001");
        assert_eq!(" 2235001 ".parse::<IdentityNumber>().unwrap().as_str(), "2235001");
        assert!(matches!(
            "1234".parse::<IdentityNumber>(),
            Err(ParseError::InvalidLength { found: 4, .. })
        ));
        assert!(matches!(
            "123456789012345678901".parse::<IdentityNumber>(),
            Err(ParseError::InvalidLength { found: 21, .. })
        ));
        assert_eq!(
            "22350O1".parse::<IdentityNumber>(),
            Err(ParseError::InvalidChar('O'))
        );
    }

    #[test]
    fn identity_number_serde() {
        let nim: IdentityNumber = rocket::serde::json::from_str("\"2235001\"").unwrap();
        assert_eq!(nim.as_str(), "2235001");
        assert!(rocket::serde::json::from_str::<IdentityNumber>("\"abc\"").is_err());
    }

    #[test]
    fn access_codes() {
        assert!("ABC123".parse::<AccessCode>().is_ok());
        assert!("abc".parse::<AccessCode>().is_err());
        assert!("has space".parse::<AccessCode>().is_err());
        assert!("x".repeat(33).parse::<AccessCode>().is_err());

        let code = AccessCode::random();
        assert_eq!(code.expose().len(), GENERATED_CODE_LENGTH);
        assert!(code.expose().bytes().all(|b| CODE_ALPHABET.contains(&b)));
        assert_ne!(code, AccessCode::random());
        assert!(!format!("{code:?}").contains(code.expose()));
    }
}
