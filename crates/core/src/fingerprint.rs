//! One-way fingerprints for identifiers that must never be logged or stored raw.

use sha2::{Digest, Sha256};

/// SHA-256 of `value`, hex encoded.
///
/// Used for IPs, account names, user agents and subject ids in audit events and
/// store keys.
pub fn fingerprint(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn known_vector() {
        assert_eq!(
            fingerprint("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    proptest! {
        #[test]
        fn fingerprint_is_stable_and_fixed_width(value in "[a-z0-9.@]{1,64}") {
            let fp = fingerprint(&value);
            prop_assert_eq!(fp.len(), 64);
            prop_assert_eq!(&fp, &fingerprint(&value));
            prop_assert_ne!(fp, fingerprint(&format!("{value}x")));
        }
    }
}
