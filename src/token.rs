//! Bootstrap token and password generation
//!
//! Randomness comes from aws-lc-rs. Tokens follow the kubeadm bootstrap
//! token format `[a-z0-9]{6}.[a-z0-9]{16}`, which k3s also accepts.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

use crate::{Error, Result};

const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const TOKEN_ID_LEN: usize = 6;
const TOKEN_SECRET_LEN: usize = 16;

/// A bootstrap token shared between the control plane and its joiners
#[derive(Clone, PartialEq, Eq)]
pub struct BootstrapToken {
    string: String,
}

impl BootstrapToken {
    /// Generate a new random bootstrap token
    pub fn generate() -> Result<Self> {
        let id = random_from_alphabet(TOKEN_ID_LEN)?;
        let secret = random_from_alphabet(TOKEN_SECRET_LEN)?;
        Ok(Self {
            string: format!("{id}.{secret}"),
        })
    }

    /// Get the token as a string
    pub fn as_str(&self) -> &str {
        &self.string
    }

    /// The public `[a-z0-9]{6}` half
    pub fn id(&self) -> &str {
        &self.string[..TOKEN_ID_LEN]
    }
}

impl std::fmt::Debug for BootstrapToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Only the id half is safe to print
        f.debug_struct("BootstrapToken")
            .field("id", &self.id())
            .finish()
    }
}

impl std::fmt::Display for BootstrapToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.string)
    }
}

/// Random password for instance root accounts
pub fn random_password() -> Result<String> {
    let raw = random_bytes(32)?;
    Ok(URL_SAFE_NO_PAD.encode(raw))
}

fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let mut raw = vec![0u8; len];
    aws_lc_rs::rand::fill(&mut raw).map_err(|_| Error::pki("random generation failed"))?;
    Ok(raw)
}

fn random_from_alphabet(len: usize) -> Result<String> {
    // 252 is the largest multiple of 36 below 256; rejecting above it keeps the draw uniform
    let limit = (u8::MAX as usize / TOKEN_ALPHABET.len()) * TOKEN_ALPHABET.len();
    let mut out = String::with_capacity(len);
    while out.len() < len {
        for byte in random_bytes(len * 2)? {
            if (byte as usize) < limit && out.len() < len {
                out.push(TOKEN_ALPHABET[byte as usize % TOKEN_ALPHABET.len()] as char);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_has_kubeadm_shape() {
        let token = BootstrapToken::generate().unwrap();
        let (id, secret) = token.as_str().split_once('.').unwrap();
        assert_eq!(id.len(), 6);
        assert_eq!(secret.len(), 16);
        assert!(token
            .as_str()
            .chars()
            .all(|c| c == '.' || c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn tokens_are_unique() {
        let a = BootstrapToken::generate().unwrap();
        let b = BootstrapToken::generate().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn debug_output_hides_secret() {
        let token = BootstrapToken::generate().unwrap();
        let debug = format!("{:?}", token);
        let secret = token.as_str().split_once('.').unwrap().1;
        assert!(!debug.contains(secret));
        assert!(debug.contains(token.id()));
    }

    #[test]
    fn passwords_are_long_and_url_safe() {
        let password = random_password().unwrap();
        assert_eq!(password.len(), 43);
        assert!(!password.contains('+') && !password.contains('/'));
    }
}
