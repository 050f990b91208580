//! Guardian share wrapping.
//!
//! A share is sealed to the guardian's own x-only public key. The matching
//! secret key never exists outside the guardian's device, so a stolen
//! `GuardianShare` record reveals nothing on its own.

use lifeline_core::{open_sealed, seal_to, SealedBox};
use secp256k1::{SecretKey, XOnlyPublicKey};
use serde::{Deserialize, Serialize};

use crate::shamir::{split_secret, Share};
use crate::ShamirError;

/// A share sealed to one guardian
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardianShare {
    pub guardian_id: String,
    /// Share index, kept in the clear so holders know which share they carry
    pub index: u8,
    pub threshold: u8,
    /// Guardian public key the share is sealed to
    #[serde(with = "xonly_serde")]
    pub guardian_pubkey: XOnlyPublicKey,
    /// `SealedBox` bytes
    #[serde(with = "hex_serde")]
    pub sealed: Vec<u8>,
}

/// Serde helper for x-only keys as hex
mod xonly_serde {
    use secp256k1::XOnlyPublicKey;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(key: &XOnlyPublicKey, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        hex::encode(key.serialize()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<XOnlyPublicKey, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        XOnlyPublicKey::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Serde helper for byte vectors as hex
mod hex_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        hex::encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Associated data binding a sealed share to its guardian and index
fn share_aad(guardian_id: &str, index: u8) -> Vec<u8> {
    let mut aad = Vec::with_capacity(guardian_id.len() + 1);
    aad.extend_from_slice(guardian_id.as_bytes());
    aad.push(index);
    aad
}

/// Seal a share to a guardian's public key
pub fn wrap_share(
    share: &Share,
    guardian_id: &str,
    guardian_pubkey: &XOnlyPublicKey,
) -> Result<GuardianShare, ShamirError> {
    let sealed = seal_to(
        guardian_pubkey,
        &share.to_bytes(),
        &share_aad(guardian_id, share.index),
    )
    .map_err(|e| ShamirError::InvalidShare(format!("Sealing failed: {}", e)))?;

    Ok(GuardianShare {
        guardian_id: guardian_id.to_string(),
        index: share.index,
        threshold: share.threshold,
        guardian_pubkey: *guardian_pubkey,
        sealed: sealed.to_bytes(),
    })
}

/// Open a wrapped share with the guardian's secret key
pub fn unwrap_share(
    wrapped: &GuardianShare,
    guardian_key: &SecretKey,
) -> Result<Share, ShamirError> {
    let sealed = SealedBox::from_bytes(&wrapped.sealed)
        .map_err(|_| ShamirError::InvalidShare("Malformed sealed share".into()))?;

    let plaintext = open_sealed(
        &sealed,
        guardian_key,
        &share_aad(&wrapped.guardian_id, wrapped.index),
    )
    .map_err(|_| ShamirError::InvalidShare("Share decryption failed".into()))?;

    let share = Share::from_bytes(&plaintext)?;
    if share.index != wrapped.index || share.threshold != wrapped.threshold {
        return Err(ShamirError::InvalidShare(
            "Sealed share does not match its envelope".into(),
        ));
    }
    Ok(share)
}

/// Split a secret and seal one share to each guardian, in order
///
/// `guardians` is `(guardian_id, public_key)`; share `i + 1` goes to `guardians[i]`.
pub fn split_for_guardians(
    secret: &[u8],
    threshold: u8,
    guardians: &[(String, XOnlyPublicKey)],
) -> Result<Vec<GuardianShare>, ShamirError> {
    let total = u8::try_from(guardians.len()).map_err(|_| ShamirError::ThresholdExceedsShares)?;

    let mut ids: Vec<&str> = guardians.iter().map(|(id, _)| id.as_str()).collect();
    ids.sort();
    ids.dedup();
    if ids.len() != guardians.len() {
        return Err(ShamirError::InvalidShare("Duplicate guardian id".into()));
    }

    let shares = split_secret(secret, threshold, total)?;
    shares
        .iter()
        .zip(guardians)
        .map(|(share, (id, pubkey))| wrap_share(share, id, pubkey))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconstruct_secret;
    use secp256k1::Secp256k1;

    fn guardian(seed: u8) -> (SecretKey, XOnlyPublicKey) {
        let secp = Secp256k1::new();
        let mut bytes = [0u8; 32];
        bytes[0] = 0x01;
        bytes[31] = seed;
        let sk = SecretKey::from_slice(&bytes).unwrap();
        let (xonly, _) = sk.x_only_public_key(&secp);
        (sk, xonly)
    }

    fn three_guardians() -> (Vec<SecretKey>, Vec<(String, XOnlyPublicKey)>) {
        let keys: Vec<_> = (1..=3).map(guardian).collect();
        let secrets = keys.iter().map(|(sk, _)| *sk).collect();
        let public = keys
            .iter()
            .enumerate()
            .map(|(i, (_, pk))| (format!("guardian-{}", i + 1), *pk))
            .collect();
        (secrets, public)
    }

    #[test]
    fn test_guardians_reconstruct() {
        let secret = [0x5Au8; 32];
        let (secrets, public) = three_guardians();

        let wrapped = split_for_guardians(&secret, 2, &public).unwrap();
        assert_eq!(wrapped.len(), 3);

        let shares = vec![
            unwrap_share(&wrapped[0], &secrets[0]).unwrap(),
            unwrap_share(&wrapped[2], &secrets[2]).unwrap(),
        ];
        assert_eq!(reconstruct_secret(&shares).unwrap(), secret);
    }

    #[test]
    fn test_other_guardian_cannot_unwrap() {
        let (secrets, public) = three_guardians();
        let wrapped = split_for_guardians(b"seed", 2, &public).unwrap();

        let result = unwrap_share(&wrapped[0], &secrets[1]);
        assert!(matches!(result, Err(ShamirError::InvalidShare(_))));
    }

    #[test]
    fn test_relabelled_share_rejected() {
        let (secrets, public) = three_guardians();
        let mut wrapped = split_for_guardians(b"seed", 2, &public).unwrap();

        wrapped[0].guardian_id = "mallory".into();
        assert!(unwrap_share(&wrapped[0], &secrets[0]).is_err());
    }

    #[test]
    fn test_duplicate_guardian_ids_rejected() {
        let (_, mut public) = three_guardians();
        public[2].0 = public[0].0.clone();
        assert!(split_for_guardians(b"seed", 2, &public).is_err());
    }

    #[test]
    fn test_guardian_share_json() {
        let (secrets, public) = three_guardians();
        let wrapped = split_for_guardians(b"json", 2, &public).unwrap();

        let json = serde_json::to_string(&wrapped[1]).unwrap();
        let restored: GuardianShare = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, wrapped[1]);
        assert!(unwrap_share(&restored, &secrets[1]).is_ok());
    }
}
