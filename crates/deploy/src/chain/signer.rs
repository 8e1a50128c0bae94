//! Local transaction signing for networks without unlocked accounts.

use std::str::FromStr;

use alloy_consensus::{SignableTransaction, TxLegacy, transaction::RlpEcdsaEncodableTx};
use alloy_core::primitives::{Address, Bytes};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use anyhow::Context;

/// A private key able to sign legacy transactions.
#[derive(Debug, Clone)]
pub struct LocalWallet {
    signer: PrivateKeySigner,
}

impl FromStr for LocalWallet {
    type Err = anyhow::Error;

    fn from_str(private_key: &str) -> Result<Self, Self::Err> {
        let signer = PrivateKeySigner::from_str(private_key.trim())
            .map_err(|e| anyhow::anyhow!("Invalid private key: {}", e))?;
        Ok(Self { signer })
    }
}

impl LocalWallet {
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Sign `tx` and return its raw encoding, ready for `eth_sendRawTransaction`.
    ///
    /// `tx.chain_id` must be set so the signature carries EIP-155 replay
    /// protection.
    pub fn sign(&self, tx: &TxLegacy) -> anyhow::Result<Bytes> {
        anyhow::ensure!(tx.chain_id.is_some(), "Refusing to sign a transaction without chain id");

        let signature = self
            .signer
            .sign_hash_sync(&tx.signature_hash())
            .context("Failed to sign transaction")?;

        let mut out = Vec::with_capacity(tx.rlp_encoded_length_with_signature(&signature));
        tx.rlp_encode_signed(&signature, &mut out);
        Ok(out.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_consensus::transaction::RlpEcdsaDecodableTx;
    use alloy_core::primitives::{TxKind, U256, address};

    /// First default development account.
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn transfer(chain_id: Option<u64>) -> TxLegacy {
        TxLegacy {
            chain_id,
            nonce: 0,
            gas_price: 1_000_000_000,
            gas_limit: 21_000,
            to: TxKind::Call(address!("0x70997970C51812dc3A010C7d01b50e0d17dc79C8")),
            value: U256::from(1),
            input: Bytes::new(),
        }
    }

    #[test]
    fn test_wallet_address() {
        let wallet: LocalWallet = DEV_KEY.parse().unwrap();
        assert_eq!(
            wallet.address(),
            address!("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266")
        );
    }

    #[test]
    fn test_invalid_key() {
        assert!("0x1234".parse::<LocalWallet>().is_err());
    }

    #[test]
    fn test_signed_transaction_recovers_sender() {
        let wallet: LocalWallet = DEV_KEY.parse().unwrap();
        let tx = transfer(Some(11_155_111));

        let raw = wallet.sign(&tx).unwrap();

        let signed = TxLegacy::rlp_decode_signed(&mut raw.as_ref()).unwrap();
        assert_eq!(signed.tx(), &tx);
        let sender = signed
            .signature()
            .recover_address_from_prehash(&tx.signature_hash())
            .unwrap();
        assert_eq!(sender, wallet.address());
    }

    #[test]
    fn test_signing_requires_chain_id() {
        let wallet: LocalWallet = DEV_KEY.parse().unwrap();
        assert!(wallet.sign(&transfer(None)).is_err());
    }
}
