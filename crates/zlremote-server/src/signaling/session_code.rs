//! Session code generation

use rand::Rng;
use zlremote_protocol::SessionId;

pub const SESSION_CODE_LENGTH: usize = 8;

/// Collisions tolerated before registration gives up
pub const MAX_CODE_ATTEMPTS: usize = 16;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Source of candidate session codes. Uniqueness is checked by the caller.
pub trait SessionCodeSource: Send + Sync {
    fn next_code(&self) -> SessionId;
}

/// Uniformly random uppercase alphanumeric codes
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCodes;

impl SessionCodeSource for RandomCodes {
    fn next_code(&self) -> SessionId {
        let mut rng = rand::thread_rng();
        let code: String = (0..SESSION_CODE_LENGTH)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        SessionId::new(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_codes_shape() {
        for _ in 0..100 {
            let code = RandomCodes.next_code();
            assert_eq!(code.as_str().len(), SESSION_CODE_LENGTH);
            assert!(
                code.as_str()
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
            );
        }
    }
}
