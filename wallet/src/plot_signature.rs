//! Plot-signature verification for the tail of a block-inclusion range
//! (spec.md §4.E.1 step 5). The source proves this with a BLS signature
//! over foliage-block-data; this workspace verifies with `ed25519-dalek`
//! instead, reusing the signature crate the teacher already carries in
//! `wallet/Cargo.toml` for XSWD request authentication rather than adding a
//! BLS dependency the corpus does not otherwise use (see DESIGN.md).

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use lc_common::Bytes32;

pub fn verify_plot_signature(
    plot_public_key: &Bytes32,
    message_hash: &Bytes32,
    signature: &[u8; 64],
) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(plot_public_key.as_bytes()) else {
        return false;
    };
    let signature = Signature::from_bytes(signature);
    verifying_key
        .verify(message_hash.as_bytes(), &signature)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    #[test]
    fn valid_signature_verifies() {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let verifying_key = signing_key.verifying_key();
        let message = Bytes32::new([9u8; 32]);
        let signature = signing_key.sign(message.as_bytes());

        let plot_public_key = Bytes32::new(verifying_key.to_bytes());
        assert!(verify_plot_signature(
            &plot_public_key,
            &message,
            &signature.to_bytes()
        ));
    }

    #[test]
    fn tampered_message_fails_verification() {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let verifying_key = signing_key.verifying_key();
        let message = Bytes32::new([9u8; 32]);
        let signature = signing_key.sign(message.as_bytes());

        let plot_public_key = Bytes32::new(verifying_key.to_bytes());
        let other_message = Bytes32::new([1u8; 32]);
        assert!(!verify_plot_signature(
            &plot_public_key,
            &other_message,
            &signature.to_bytes()
        ));
    }
}
