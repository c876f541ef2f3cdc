use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use threshold_types::{Digest, Signature65};

use crate::error::{CryptoError, Result};
use crate::pubkey::PubKey;

/// Recover the signer of `digest` and compare it with `expected`.
///
/// Accepts recovery ids in `0..=3` and the legacy `27..=30` range. High-S
/// signatures are normalised before recovery. Malformed input is reported
/// as [`CryptoError::InvalidSignature`]; a well-formed signature from a
/// different key is [`CryptoError::Mismatch`].
pub fn verify_signature(digest: &Digest, signature: &Signature65, expected: &PubKey) -> Result<()> {
    let mut sig = Signature::from_slice(signature.compact())
        .map_err(|e| CryptoError::InvalidSignature(format!("malformed R/S: {}", e)))?;

    let v = match signature.recovery_id() {
        v @ 27..=30 => v - 27,
        v => v,
    };
    let mut recovery_id = RecoveryId::from_byte(v).ok_or_else(|| {
        CryptoError::InvalidSignature(format!(
            "invalid recovery id {}",
            signature.recovery_id()
        ))
    })?;

    if let Some(normalized) = sig.normalize_s() {
        sig = normalized;
        recovery_id = RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced());
    }

    let recovered = VerifyingKey::recover_from_prehash(digest, &sig, recovery_id)
        .map_err(|e| CryptoError::InvalidSignature(format!("recovery failed: {}", e)))?;

    let recovered = recovered.to_encoded_point(true);
    let expected_bytes = expected.compressed();
    if recovered.as_bytes() != &expected_bytes[..] {
        return Err(CryptoError::Mismatch {
            recovered: hex::encode(recovered.as_bytes()),
            expected: hex::encode(expected_bytes),
        });
    }

    Ok(())
}
