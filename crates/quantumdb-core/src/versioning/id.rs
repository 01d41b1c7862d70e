//! Identifier generation for versions and physical tables.
//!
//! Identifiers are short hex digests of a seed and a counter. Generation is
//! deterministic for a given seed and retries until the caller reports the
//! candidate as unused.

/// Number of hex characters kept from the digest.
const ID_LENGTH: usize = 10;

/// Upper bound on collision retries.
const MAX_ATTEMPTS: u64 = 1024;

fn digest(seed: &str, attempt: u64) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(seed.as_bytes());
    hasher.update(&attempt.to_le_bytes());
    let hash = hasher.finalize();
    let mut encoded = hex::encode(hash.as_bytes());
    encoded.truncate(ID_LENGTH);
    encoded
}

/// Derive an identifier from `seed` that `is_taken` does not reject.
pub fn generate(seed: &str, mut is_taken: impl FnMut(&str) -> bool) -> Option<String> {
    (0..MAX_ATTEMPTS)
        .map(|attempt| digest(seed, attempt))
        .find(|candidate| !is_taken(candidate))
}

/// Derive a physical table identifier.
pub fn generate_table_id(seed: &str, mut is_taken: impl FnMut(&str) -> bool) -> Option<String> {
    (0..MAX_ATTEMPTS)
        .map(|attempt| format!("table_{}", digest(seed, attempt)))
        .find(|candidate| !is_taken(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_deterministic() {
        let a = generate("root", |_| false).unwrap();
        let b = generate("root", |_| false).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), ID_LENGTH);
    }

    #[test]
    fn test_generate_skips_taken() {
        let first = generate("root", |_| false).unwrap();
        let second = generate("root", |candidate| candidate == first).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_table_id_prefix() {
        let id = generate_table_id("users@v1", |_| false).unwrap();
        assert!(id.starts_with("table_"));
    }
}
