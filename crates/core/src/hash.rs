//! The keyed collision-resistant hash `H` used for task hashes, state
//! fingerprints, and request signatures (§4.1, GLOSSARY).
//!
//! Keyed so that two engines (or a future multi-tenant deployment) hashing
//! identical plaintext never collide on the same cache key. The key is
//! derived once per process from a fixed domain string; it does not need to
//! be secret, only stable across a single daemon's lifetime and distinct
//! across `H`'s different call sites (task hash vs. request signature).
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Domain-separated keyed hash. `domain` scopes the key (e.g. `"task"` vs.
/// `"signature"`) so the two call sites never produce overlapping outputs
/// even when fed the same parts.
///
/// Parts are fed in as a length-prefixed concatenation so that
/// `H(["ab", "c"]) != H(["a", "bc"])`.
pub fn keyed_hash(domain: &str, parts: &[&[u8]]) -> String {
    // HMAC-SHA256 accepts keys of any length; this can never fail.
    #[allow(clippy::expect_used)]
    let mut mac =
        HmacSha256::new_from_slice(domain.as_bytes()).expect("HMAC accepts keys of any length");
    for part in parts {
        mac.update(&(part.len() as u64).to_le_bytes());
        mac.update(part);
    }
    hex::encode(mac.finalize().into_bytes())
}

/// `task_hash_i = H(resolved_image_id, input_fingerprint, kind, canonical(step_i))`.
pub fn task_hash(resolved_image_id: &str, input_fingerprint: &str, kind: &str, canonical_step: &str) -> String {
    keyed_hash(
        "sqlrs-task-hash-v1",
        &[
            resolved_image_id.as_bytes(),
            input_fingerprint.as_bytes(),
            kind.as_bytes(),
            canonical_step.as_bytes(),
        ],
    )
}

/// Deterministic hash of a full prepare request body, used to correlate
/// duplicate submissions (§4.1 "Deduplication", GLOSSARY "Signature").
pub fn request_signature(canonical_request_json: &str) -> String {
    keyed_hash("sqlrs-signature-v1", &[canonical_request_json.as_bytes()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_same_inputs() {
        let a = task_hash("postgres@sha256:aaa", "base", "psql", "-c select 1");
        let b = task_hash("postgres@sha256:aaa", "base", "psql", "-c select 1");
        assert_eq!(a, b);
    }

    #[test]
    fn sensitive_to_part_boundaries() {
        let a = keyed_hash("d", &[b"ab", b"c"]);
        let b = keyed_hash("d", &[b"a", b"bc"]);
        assert_ne!(a, b);
    }

    #[test]
    fn domain_separates_task_hash_from_signature() {
        let a = task_hash("x", "y", "z", "w");
        let b = request_signature("x");
        assert_ne!(a, b);
    }

    #[test]
    fn output_is_lowercase_hex() {
        let h = task_hash("img", "base", "psql", "step");
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(h.len(), 64);
    }
}
