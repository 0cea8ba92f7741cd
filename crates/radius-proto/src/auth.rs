use crate::packet::{Packet, PacketError};
use rand::Rng;

/// Longest User-Password RFC 2865 §5.2 allows
pub const MAX_PASSWORD_LENGTH: usize = 128;

/// Random 16-octet Request Authenticator (RFC 2865 §3)
pub fn generate_request_authenticator() -> [u8; 16] {
    let mut authenticator = [0u8; 16];
    rand::rng().fill(&mut authenticator);
    authenticator
}

/// Random packet identifier
pub fn generate_identifier() -> u8 {
    rand::rng().random()
}

/// Response Authenticator = MD5(Code | ID | Length | RequestAuth | Attributes | Secret)
pub fn calculate_response_authenticator(
    packet: &Packet,
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> Result<[u8; 16], PacketError> {
    let mut context = md5::Context::new();
    context.consume([packet.code.as_u8(), packet.identifier]);
    context.consume((packet.length() as u16).to_be_bytes());
    context.consume(request_authenticator);
    for attr in &packet.attributes {
        context.consume(attr.encode()?);
    }
    context.consume(secret);
    Ok(context.compute().0)
}

/// Check a reply against the authenticator of the request it answers.
///
/// A mismatch usually means the two ends disagree on the shared secret.
pub fn verify_response_authenticator(
    response: &Packet,
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> bool {
    calculate_response_authenticator(response, request_authenticator, secret)
        .map(|expected| expected == response.authenticator)
        .unwrap_or(false)
}

/// Keystream block: MD5(secret | previous)
fn keystream(secret: &[u8], previous: &[u8]) -> [u8; 16] {
    let mut context = md5::Context::new();
    context.consume(secret);
    context.consume(previous);
    context.compute().0
}

/// Hide a User-Password per RFC 2865 §5.2.
///
/// The password is zero-padded to a multiple of 16 octets (an empty
/// password becomes one zero block). Block 1 is XORed with
/// `MD5(secret | RequestAuth)`, block n with `MD5(secret | c(n-1))`.
pub fn encrypt_user_password(
    password: &str,
    secret: &[u8],
    authenticator: &[u8; 16],
) -> Result<Vec<u8>, PacketError> {
    let plain = password.as_bytes();
    if plain.len() > MAX_PASSWORD_LENGTH {
        return Err(PacketError::PasswordTooLong(plain.len()));
    }

    let padded_len = plain.len().div_ceil(16).max(1) * 16;
    let mut padded = plain.to_vec();
    padded.resize(padded_len, 0);

    let mut hidden = Vec::with_capacity(padded_len);
    let mut previous: Vec<u8> = authenticator.to_vec();
    for block in padded.chunks(16) {
        let key = keystream(secret, &previous);
        let cipher: Vec<u8> = block.iter().zip(key.iter()).map(|(p, k)| p ^ k).collect();
        hidden.extend_from_slice(&cipher);
        previous = cipher;
    }

    Ok(hidden)
}

/// Reverse [`encrypt_user_password`], keeping the zero padding.
pub fn reveal_user_password(
    hidden: &[u8],
    secret: &[u8],
    authenticator: &[u8; 16],
) -> Result<Vec<u8>, PacketError> {
    if hidden.is_empty() || hidden.len() % 16 != 0 || hidden.len() > MAX_PASSWORD_LENGTH {
        return Err(PacketError::AttributeError(format!(
            "hidden User-Password length {} is not a multiple of 16 in 16..=128",
            hidden.len()
        )));
    }

    let mut plain = Vec::with_capacity(hidden.len());
    let mut previous: &[u8] = authenticator;
    for block in hidden.chunks(16) {
        let key = keystream(secret, previous);
        plain.extend(block.iter().zip(key.iter()).map(|(c, k)| c ^ k));
        previous = block;
    }

    Ok(plain)
}

/// Reverse [`encrypt_user_password`] and strip the trailing zero padding.
pub fn decrypt_user_password(
    hidden: &[u8],
    secret: &[u8],
    authenticator: &[u8; 16],
) -> Result<String, PacketError> {
    let mut plain = reveal_user_password(hidden, secret, authenticator)?;
    while plain.last() == Some(&0) {
        plain.pop();
    }
    String::from_utf8(plain)
        .map_err(|e| PacketError::AttributeError(format!("User-Password is not UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Code;

    #[test]
    fn test_generate_authenticator() {
        assert_ne!(
            generate_request_authenticator(),
            generate_request_authenticator()
        );
    }

    #[test]
    fn test_single_block_matches_rfc_formula() {
        let secret = b"testing123";
        let authenticator = [7u8; 16];
        let hidden = encrypt_user_password("test", secret, &authenticator).unwrap();
        assert_eq!(hidden.len(), 16);

        let mut key_input = secret.to_vec();
        key_input.extend_from_slice(&authenticator);
        let b = md5::compute(&key_input).0;
        let mut expected = [0u8; 16];
        expected[..4].copy_from_slice(b"test");
        for i in 0..16 {
            expected[i] ^= b[i];
        }
        assert_eq!(hidden, expected);
    }

    #[test]
    fn test_multi_block_password() {
        let password = "a-rather-long-pppoe-password-0123456789";
        let secret = b"sharedsecret";
        let authenticator = [3u8; 16];

        let hidden = encrypt_user_password(password, secret, &authenticator).unwrap();
        assert_eq!(hidden.len(), 48);
        assert_eq!(
            decrypt_user_password(&hidden, secret, &authenticator).unwrap(),
            password
        );
    }

    #[test]
    fn test_empty_password_is_one_block() {
        let hidden = encrypt_user_password("", b"s", &[1u8; 16]).unwrap();
        assert_eq!(hidden.len(), 16);
    }

    #[test]
    fn test_password_too_long() {
        let password = "x".repeat(129);
        assert!(matches!(
            encrypt_user_password(&password, b"s", &[0u8; 16]),
            Err(PacketError::PasswordTooLong(129))
        ));
    }

    #[test]
    fn test_response_authenticator() {
        let secret = b"sharedsecret";
        let request_auth = [1u8; 16];
        let mut reply = Packet::new(Code::AccessReject, 42, [0u8; 16]);
        reply.authenticator =
            calculate_response_authenticator(&reply, &request_auth, secret).unwrap();

        assert!(verify_response_authenticator(&reply, &request_auth, secret));
        assert!(!verify_response_authenticator(&reply, &request_auth, b"wrong"));
    }
}
