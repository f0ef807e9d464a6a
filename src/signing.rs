//! Request-signing scaffold.
//!
//! Credential loading and per-exchange HTTP signing are explicitly out of
//! scope for the mirror reconciliation engine (§1) — they're an external
//! collaborator the real binary wires in per venue. This module keeps the
//! seam as a trait rather than leaving it unimplemented, with one concrete
//! EIP-712-style example (`ethers-core` `keccak256` +
//! `ethers-signers::LocalWallet`) so the crate never invents a fake/stub
//! dependency in its place.

use ethers_core::utils::keccak256;
use ethers_signers::{LocalWallet, Signer as _};
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct RequestSignature {
    pub r: String,
    pub s: String,
    pub v: u8,
}

#[async_trait::async_trait]
pub trait Signer: Send + Sync {
    /// Signs an arbitrary request payload, returning a venue-agnostic
    /// signature the concrete adapter attaches per its own wire format.
    async fn sign(&self, payload: &[u8]) -> Result<RequestSignature, String>;
}

/// Wallet-backed signer: keccak256(payload) signed with a local ECDSA key.
/// Stands in for whichever per-venue scheme a concrete `SourceClient` or
/// `MirrorClient` implementation needs (HMAC, API-key header, EIP-712 —
/// all out of scope here); `ethers-core`/`ethers-signers` already cover the
/// dependencies this concrete example needs.
pub struct WalletSigner {
    wallet: LocalWallet,
}

impl WalletSigner {
    pub fn from_private_key_hex(hex_key: &str) -> Result<Self, String> {
        let wallet = LocalWallet::from_str(hex_key).map_err(|e| e.to_string())?;
        Ok(Self { wallet })
    }
}

#[async_trait::async_trait]
impl Signer for WalletSigner {
    async fn sign(&self, payload: &[u8]) -> Result<RequestSignature, String> {
        let digest = keccak256(payload);
        let sig = self
            .wallet
            .sign_hash(digest.into())
            .map_err(|e| e.to_string())?;
        Ok(RequestSignature {
            r: format!("{:#x}", sig.r),
            s: format!("{:#x}", sig.s),
            v: sig.v as u8,
        })
    }
}
