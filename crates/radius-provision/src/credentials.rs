//! PPPoE credential generation

use crate::service::{CustomerId, ServiceId};
use rand::rngs::OsRng;
use rand::TryRngCore;
use thiserror::Error;

pub const GENERATED_PASSWORD_LENGTH: usize = 16;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Random source unavailable: {0}")]
    RandomSource(String),
    #[error("Password length must be at least 16, got {0}")]
    TooShort(usize),
}

/// Base PPPoE username: the portal login lowercased to `[a-z0-9._-]`,
/// or `customer_<id>` when there is none.
pub fn base_username(portal_username: Option<&str>, customer_id: CustomerId) -> String {
    let cleaned: String = portal_username
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();

    if cleaned.is_empty() {
        format!("customer_{}", customer_id)
    } else {
        cleaned
    }
}

/// Username for a customer's additional service when the base is taken
pub fn service_username(base: &str, service_id: ServiceId) -> String {
    format!("{}_{}", base, service_id)
}

/// Random alphanumeric password containing upper, lower and digit characters
pub fn generate_password(length: usize) -> Result<String, CredentialError> {
    if length < GENERATED_PASSWORD_LENGTH {
        return Err(CredentialError::TooShort(length));
    }

    for _ in 0..16 {
        let password = random_alphanumeric(length)?;
        let has_upper = password.bytes().any(|b| b.is_ascii_uppercase());
        let has_lower = password.bytes().any(|b| b.is_ascii_lowercase());
        let has_digit = password.bytes().any(|b| b.is_ascii_digit());
        if has_upper && has_lower && has_digit {
            return Ok(password);
        }
    }
    Err(CredentialError::RandomSource(
        "could not produce a mixed-class password".to_string(),
    ))
}

fn random_alphanumeric(length: usize) -> Result<String, CredentialError> {
    // Largest multiple of the alphabet size that fits in a byte
    let limit = (256 / ALPHABET.len() * ALPHABET.len()) as u8;
    let mut password = String::with_capacity(length);
    let mut buffer = [0u8; 64];

    while password.len() < length {
        OsRng
            .try_fill_bytes(&mut buffer)
            .map_err(|e| CredentialError::RandomSource(e.to_string()))?;
        for &byte in buffer.iter().filter(|&&b| b < limit) {
            if password.len() == length {
                break;
            }
            password.push(ALPHABET[byte as usize % ALPHABET.len()] as char);
        }
    }
    Ok(password)
}
