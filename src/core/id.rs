use rand::RngCore;

/// Number of random bytes behind a container ID (32 bytes = 64 hex chars).
const ID_BYTES: usize = 32;
/// Length of a full container ID in hex characters.
pub const ID_LEN: usize = ID_BYTES * 2;
/// Length of the short ID shown in `ps` output and printed on `run`.
pub const SHORT_ID_LEN: usize = 12;

/// Generate a random 64-hex-character container ID (32 random bytes).
pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    let mut bytes = [0u8; ID_BYTES];
    rng.fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

/// The short form of a full ID, as displayed in `ps`/`run` output.
pub fn short_id(id: &str) -> &str {
    &id[..SHORT_ID_LEN.min(id.len())]
}

/// Encode bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// Validate that a string looks like a valid container-ID prefix.
/// Must be non-empty, lowercase hex, and at most `ID_LEN` characters.
pub fn validate_id_prefix(prefix: &str) -> bool {
    !prefix.is_empty()
        && prefix.len() <= ID_LEN
        && prefix
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_id_has_correct_length() {
        let id = generate_id();
        assert_eq!(id.len(), ID_LEN);
    }

    #[test]
    fn generated_id_is_hex() {
        let id = generate_id();
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_id_is_lowercase() {
        let id = generate_id();
        assert_eq!(id, id.to_lowercase());
    }

    #[test]
    fn generated_ids_are_unique() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(generate_id()), "duplicate ID generated");
        }
    }

    #[test]
    fn short_id_takes_prefix() {
        let id = "a".repeat(ID_LEN);
        assert_eq!(short_id(&id).len(), SHORT_ID_LEN);
    }

    #[test]
    fn validate_prefix_accepts_valid() {
        assert!(validate_id_prefix("ab12"));
        assert!(validate_id_prefix(&"0123456789abcdef".repeat(4)));
    }

    #[test]
    fn validate_prefix_rejects_invalid() {
        assert!(!validate_id_prefix(""));
        assert!(!validate_id_prefix("ABCD")); // uppercase
        assert!(!validate_id_prefix(&"a".repeat(ID_LEN + 1))); // too long
        assert!(!validate_id_prefix("zzzz")); // non-hex
    }
}
