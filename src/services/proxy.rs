//! The bridge's Concurrent identity
//!
//! AP senders have no CC keys, so a single proxy identity signs every CC
//! object produced from inbound AP activity. Downstream CC consumers must
//! treat `meta.apActor` as the semantic author.

use alloy::primitives::keccak256;
use alloy::signers::SignerSync;
use alloy::signers::k256::elliptic_curve::sec1::ToEncodedPoint;
use alloy::signers::local::PrivateKeySigner;

use crate::error::AppError;

/// Holds the proxy's secp256k1 key and the identity derived from it.
#[derive(Debug)]
pub struct ProxySigner {
    signer: PrivateKeySigner,
    /// CC identity: "CC" + checksummed address
    pub ccid: String,
    /// Uncompressed public key, hex encoded
    pub public_key: String,
}

impl ProxySigner {
    /// Build the proxy identity from a hex-encoded private key.
    pub fn from_hex(private_key: &str) -> Result<Self, AppError> {
        let key_hex = private_key
            .strip_prefix("0x")
            .unwrap_or(private_key)
            .trim();

        let key_bytes = hex::decode(key_hex)
            .map_err(|e| AppError::Config(format!("invalid proxy private key: {}", e)))?;
        let key_array: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| AppError::Config("proxy private key must be 32 bytes".to_string()))?;

        let signer = PrivateKeySigner::from_bytes(&key_array.into())
            .map_err(|e| AppError::Config(format!("invalid proxy private key: {}", e)))?;

        let ccid = ccid_from_checksum_address(&signer.address().to_checksum(None));

        let public_key = hex::encode(
            signer
                .credential()
                .verifying_key()
                .to_encoded_point(false)
                .as_bytes(),
        );

        Ok(Self {
            signer,
            ccid,
            public_key,
        })
    }

    /// Sign a CC payload: recoverable secp256k1 signature over
    /// keccak256(payload), hex encoded.
    pub fn sign(&self, payload: &[u8]) -> Result<String, AppError> {
        let digest = keccak256(payload);
        let signature = self
            .signer
            .sign_hash_sync(&digest)
            .map_err(|e| AppError::Signing(format!("proxy signing failed: {}", e)))?;
        Ok(hex::encode(signature.as_bytes()))
    }
}

/// "CC" + the checksummed address without its 0x prefix.
pub fn ccid_from_checksum_address(address: &str) -> String {
    format!("CC{}", address.strip_prefix("0x").unwrap_or(address))
}
