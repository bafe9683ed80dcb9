/// signing.rs — L1 action signing
///
///   connectionId = keccak256( msgpack(action) ‖ nonce_be_u64 ‖ vault_flag )
///     vault_flag = 0x00                       (no vault)
///                = 0x01 ‖ 20-byte address     (vault)
///
///   digest = keccak256( 0x19 0x01 ‖ domainSeparator ‖ hashStruct(Agent) )
///     domain  = { name: "Exchange", version: "1", chainId: 1337, verifyingContract: 0x0 }
///     Agent   = { source: "a" (mainnet) | "b" (testnet), connectionId }
///
/// Signature is secp256k1 over the digest, v = 27 + recovery id.
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use serde::Serialize;
use sha3::{Digest, Keccak256};

use super::wire::Signature;
use crate::error::ExchangeError;

const DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
const AGENT_TYPE: &str = "Agent(string source,bytes32 connectionId)";
const DOMAIN_NAME: &str = "Exchange";
const DOMAIN_VERSION: &str = "1";
const CHAIN_ID: u64 = 1337;

fn keccak(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

fn u256_be(v: u64) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[24..].copy_from_slice(&v.to_be_bytes());
    out
}

pub fn parse_address(addr: &str) -> Result<[u8; 20], ExchangeError> {
    let raw = hex::decode(addr.trim_start_matches("0x"))
        .map_err(|e| ExchangeError::Signing(format!("bad address {addr}: {e}")))?;
    raw.try_into()
        .map_err(|_| ExchangeError::Signing(format!("address {addr} is not 20 bytes")))
}

pub fn parse_private_key(key: &str) -> Result<SigningKey, ExchangeError> {
    let raw = hex::decode(key.trim().trim_start_matches("0x"))
        .map_err(|e| ExchangeError::Signing(format!("private key is not hex: {e}")))?;
    SigningKey::from_slice(&raw).map_err(|e| ExchangeError::Signing(e.to_string()))
}

/// Lower-case 0x address of a key.
pub fn address_from_key(key: &SigningKey) -> String {
    let point = key.verifying_key().to_encoded_point(false);
    let hash = keccak(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

pub fn action_hash<T: Serialize>(
    action: &T,
    vault_address: Option<&str>,
    nonce: u64,
) -> Result<[u8; 32], ExchangeError> {
    let mut data = rmp_serde::to_vec_named(action)?;
    data.extend_from_slice(&nonce.to_be_bytes());
    match vault_address {
        None => data.push(0),
        Some(vault) => {
            data.push(1);
            data.extend_from_slice(&parse_address(vault)?);
        }
    }
    Ok(keccak(&data))
}

fn domain_separator() -> [u8; 32] {
    let mut buf = Vec::with_capacity(5 * 32);
    buf.extend_from_slice(&keccak(DOMAIN_TYPE.as_bytes()));
    buf.extend_from_slice(&keccak(DOMAIN_NAME.as_bytes()));
    buf.extend_from_slice(&keccak(DOMAIN_VERSION.as_bytes()));
    buf.extend_from_slice(&u256_be(CHAIN_ID));
    buf.extend_from_slice(&[0u8; 32]);
    keccak(&buf)
}

pub fn agent_digest(connection_id: &[u8; 32], is_mainnet: bool) -> [u8; 32] {
    let source = if is_mainnet { "a" } else { "b" };
    let mut agent = Vec::with_capacity(3 * 32);
    agent.extend_from_slice(&keccak(AGENT_TYPE.as_bytes()));
    agent.extend_from_slice(&keccak(source.as_bytes()));
    agent.extend_from_slice(connection_id);
    let struct_hash = keccak(&agent);

    let mut msg = Vec::with_capacity(2 + 64);
    msg.extend_from_slice(&[0x19, 0x01]);
    msg.extend_from_slice(&domain_separator());
    msg.extend_from_slice(&struct_hash);
    keccak(&msg)
}

pub fn sign_digest(key: &SigningKey, digest: &[u8; 32]) -> Result<Signature, ExchangeError> {
    let (sig, recid) = key
        .sign_prehash_recoverable(digest)
        .map_err(|e| ExchangeError::Signing(e.to_string()))?;
    let bytes = sig.to_bytes();
    Ok(Signature {
        r: format!("0x{}", hex::encode(&bytes[..32])),
        s: format!("0x{}", hex::encode(&bytes[32..])),
        v: 27 + recid.to_byte(),
    })
}

pub fn sign_l1_action<T: Serialize>(
    key: &SigningKey,
    action: &T,
    vault_address: Option<&str>,
    nonce: u64,
    is_mainnet: bool,
) -> Result<Signature, ExchangeError> {
    let connection_id = action_hash(action, vault_address, nonce)?;
    sign_digest(key, &agent_digest(&connection_id, is_mainnet))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::wire::{Action, OrderWire, Tif};
    use crate::models::OrderSide;
    use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};

    fn key_one() -> SigningKey {
        parse_private_key("0x0000000000000000000000000000000000000000000000000000000000000001").unwrap()
    }

    #[test]
    fn address_of_key_one() {
        assert_eq!(
            address_from_key(&key_one()),
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
    }

    #[test]
    fn domain_type_hash() {
        assert_eq!(
            hex::encode(keccak(DOMAIN_TYPE.as_bytes())),
            "8b73c3c69bb8fe3d512ecc4cf759cc79239f7b179b0ffacaa9a75d522b39400f"
        );
    }

    #[test]
    fn action_hash_depends_on_nonce_and_vault() {
        let action = Action::single_order(OrderWire::new(0, OrderSide::Buy, 100.0, 1.0, 2, false, Tif::Gtc));
        let h1 = action_hash(&action, None, 1).unwrap();
        assert_eq!(h1, action_hash(&action, None, 1).unwrap());
        assert_ne!(h1, action_hash(&action, None, 2).unwrap());
        let vault = "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf";
        assert_ne!(h1, action_hash(&action, Some(vault), 1).unwrap());
        assert!(action_hash(&action, Some("0x1234"), 1).is_err());
    }

    #[test]
    fn mainnet_and_testnet_digests_differ() {
        let cid = [7u8; 32];
        assert_ne!(agent_digest(&cid, true), agent_digest(&cid, false));
    }

    #[test]
    fn signature_recovers_signer() {
        let key = key_one();
        let action = Action::cancel(3, 42);
        let sig = sign_l1_action(&key, &action, None, 1_700_000_000_000, true).unwrap();
        assert!(sig.v == 27 || sig.v == 28);

        let digest = agent_digest(&action_hash(&action, None, 1_700_000_000_000).unwrap(), true);
        let mut raw = hex::decode(sig.r.trim_start_matches("0x")).unwrap();
        raw.extend(hex::decode(sig.s.trim_start_matches("0x")).unwrap());
        let ecdsa = EcdsaSignature::from_slice(&raw).unwrap();
        let recid = RecoveryId::from_byte(sig.v - 27).unwrap();
        let recovered = VerifyingKey::recover_from_prehash(&digest, &ecdsa, recid).unwrap();
        assert_eq!(&recovered, key.verifying_key());
    }

    #[test]
    fn rejects_bad_keys() {
        assert!(parse_private_key("zz").is_err());
        assert!(parse_private_key("0x00").is_err());
    }
}
