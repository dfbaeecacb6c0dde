use std::str::FromStr;

use bitcoin::bip32::{ChildNumber, DerivationPath, Fingerprint, KeySource, Xpub};
use bitcoin::secp256k1::{Secp256k1, Verification};
use bitcoin::{CompressedPublicKey, ScriptBuf};

use crate::error::AppError;
use crate::types::{KeyOriginInfo, Policy, WalletDescriptor};

/// `[<fingerprint>/<origin>]<xpub>` を分解したもの。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletKey {
    pub master_fingerprint: [u8; 4],
    /// 先頭の "m/" を含まない由来パス (例: "84'/1'/0'")
    pub origin_path: String,
    pub xpub: Xpub,
}

impl FromStr for WalletKey {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: &str| AppError::MalformedWalletKey(format!("{} ({})", reason, s));

        let rest = s.strip_prefix('[').ok_or_else(|| malformed("'[' で始まっていません"))?;
        let (origin, key) = rest.split_once(']').ok_or_else(|| malformed("']' がありません"))?;
        let (fingerprint_hex, origin_path) = origin
            .split_once('/')
            .ok_or_else(|| malformed("フィンガープリントの後に由来パスがありません"))?;

        if fingerprint_hex.len() != 8 || !fingerprint_hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(malformed("フィンガープリントは16進数8文字である必要があります"));
        }
        let mut master_fingerprint = [0u8; 4];
        hex::decode_to_slice(fingerprint_hex, &mut master_fingerprint)
            .map_err(|_| malformed("フィンガープリントをデコードできません"))?;

        if origin_path.is_empty() {
            return Err(malformed("由来パスが空です"));
        }
        DerivationPath::from_str(origin_path).map_err(|e| malformed(&format!("由来パスが不正です: {}", e)))?;

        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(malformed("拡張公開鍵がbase58ではありません"));
        }
        let xpub = Xpub::from_str(key).map_err(|e| malformed(&format!("拡張公開鍵をデコードできません: {}", e)))?;

        Ok(WalletKey { master_fingerprint, origin_path: origin_path.to_string(), xpub })
    }
}

/// 由来パスと相対パスを連結し、"m/" 始まりの絶対パスにする。
pub fn absolute_path(origin_path: &str, relative_path: &str) -> String {
    let origin = origin_path.trim_end_matches('/');
    let relative = relative_path.trim_start_matches('/');
    let joined = if origin.is_empty() {
        relative.to_string()
    } else if relative.is_empty() {
        origin.to_string()
    } else {
        format!("{}/{}", origin, relative)
    };
    if joined.starts_with("m/") {
        joined
    } else {
        format!("m/{}", joined)
    }
}

/// パス文字列を u32 の列にする。ハードン化 (`'` / `h`) されたレベルは bit 31 が立つ。
pub fn path_to_array(path: &str) -> Result<Vec<u32>, AppError> {
    let levels = path.strip_prefix("m/").or_else(|| path.strip_prefix("M/")).unwrap_or(path);
    levels
        .split('/')
        .filter(|level| !level.is_empty())
        .map(|level| ChildNumber::from_str(level).map(u32::from).map_err(AppError::KeyDerivation))
        .collect()
}

fn derive_pubkey<C: Verification>(
    secp: &Secp256k1<C>,
    key: &WalletKey,
    relative_path: &str,
) -> Result<CompressedPublicKey, AppError> {
    let path = DerivationPath::from_str(relative_path.trim_start_matches('/'))?;
    Ok(key.xpub.derive_pub(secp, &path)?.to_pub())
}

pub fn resolve_key_origin<C: Verification>(
    secp: &Secp256k1<C>,
    wallet: &WalletDescriptor,
    relative_path: &str,
) -> Result<KeyOriginInfo, AppError> {
    let key = WalletKey::from_str(&wallet.extended_key)?;
    let pubkey = derive_pubkey(secp, &key, relative_path)?;
    let path = absolute_path(&key.origin_path, relative_path);
    log::debug!("鍵の由来を解決しました: [{}]{} -> {}", hex::encode(key.master_fingerprint), path, pubkey);

    Ok(KeyOriginInfo { master_fingerprint: key.master_fingerprint, path, pubkey })
}

pub fn resolve_script<C: Verification>(
    secp: &Secp256k1<C>,
    wallet: &WalletDescriptor,
    path: &str,
) -> Result<ScriptBuf, AppError> {
    match Policy::from_policy_str(&wallet.policy)? {
        Policy::Wpkh => {
            let key = WalletKey::from_str(&wallet.extended_key)?;
            let pubkey = derive_pubkey(secp, &key, path)?;
            Ok(ScriptBuf::new_p2wpkh(&pubkey.wpubkey_hash()))
        }
    }
}

impl KeyOriginInfo {
    /// PSBT の BIP32 導出フィールドに入れる (フィンガープリント, パス) の組。
    pub fn to_key_source(&self) -> Result<KeySource, AppError> {
        let path: Vec<ChildNumber> = path_to_array(&self.path)?.into_iter().map(ChildNumber::from).collect();
        Ok((Fingerprint::from(self.master_fingerprint), DerivationPath::from(path)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Speculos の既定ニーモニックのアカウント鍵
    pub(crate) const TEST_WALLET_KEY: &str = "[f5acc2fd/84'/1'/0']tpubDCtKfsNyRhULjZ9XMS4VKKtVcPdVDi8MKUbcSD9MJDyjRu1A2ND5MiipozyyspBT9bg8upEp7a8EAgFxNxXn1d7QkdbL52Ty5jiSLcxPt1P";

    pub(crate) fn test_wallet() -> WalletDescriptor {
        WalletDescriptor { extended_key: TEST_WALLET_KEY.to_string(), policy: "wpkh(@0/**)".to_string() }
    }

    #[test]
    fn parses_annotated_key() {
        let key = WalletKey::from_str(TEST_WALLET_KEY).unwrap();
        assert_eq!(key.master_fingerprint, [0xf5, 0xac, 0xc2, 0xfd]);
        assert_eq!(key.origin_path, "84'/1'/0'");

        let h = TEST_WALLET_KEY.replace("84'/1'/0'", "84h/1h/0h");
        assert_eq!(WalletKey::from_str(&h).unwrap().origin_path, "84h/1h/0h");
    }

    #[test]
    fn rejects_malformed_keys() {
        let xpub = TEST_WALLET_KEY.split_once(']').unwrap().1;
        let cases = [
            xpub.to_string(),
            format!("f5acc2fd/84'/1'/0']{}", xpub),
            format!("[f5acc2fd/84'/1'/0'{}", xpub),
            format!("[f5acc2/84'/1'/0']{}", xpub),
            format!("[f5acc2fz/84'/1'/0']{}", xpub),
            format!("[f5acc2fd]{}", xpub),
            format!("[f5acc2fd/84'/x/0']{}", xpub),
            "[f5acc2fd/84'/1'/0']tpubNotAKey".to_string(),
            "[f5acc2fd/84'/1'/0']".to_string(),
        ];
        for case in cases {
            assert!(
                matches!(WalletKey::from_str(&case), Err(AppError::MalformedWalletKey(_))),
                "accepted {}",
                case
            );
        }
    }

    #[test]
    fn resolves_key_origin_of_first_receive_address() {
        let secp = Secp256k1::verification_only();
        let info = resolve_key_origin(&secp, &test_wallet(), "0/0").unwrap();
        assert_eq!(info.master_fingerprint, [0xf5, 0xac, 0xc2, 0xfd]);
        assert_eq!(info.path, "m/84'/1'/0'/0/0");
        assert_eq!(
            info.pubkey.to_string(),
            "027cb75d34b005c4eb9f62bbf2c457d7638e813e757efcec8fa68677d950b63662"
        );
    }

    #[test]
    fn key_origin_resolution_is_deterministic() {
        let secp = Secp256k1::verification_only();
        let a = resolve_key_origin(&secp, &test_wallet(), "1/7").unwrap();
        let b = resolve_key_origin(&secp, &test_wallet(), "1/7").unwrap();
        assert_eq!(a, b);
        assert_ne!(a.pubkey, resolve_key_origin(&secp, &test_wallet(), "1/8").unwrap().pubkey);
    }

    #[test]
    fn hardened_relative_path_cannot_be_derived() {
        let secp = Secp256k1::verification_only();
        assert!(matches!(
            resolve_key_origin(&secp, &test_wallet(), "0'/1"),
            Err(AppError::KeyDerivation(_))
        ));
    }

    #[test]
    fn joins_paths() {
        assert_eq!(absolute_path("84'/1'/0'", "0/1"), "m/84'/1'/0'/0/1");
        assert_eq!(absolute_path("84'/1'/0'/", "0/1"), "m/84'/1'/0'/0/1");
        assert_eq!(absolute_path("84'/1'/0'", "/0/1"), "m/84'/1'/0'/0/1");
        assert_eq!(absolute_path("m/84'/1'/0'", "0/1"), "m/84'/1'/0'/0/1");
    }

    #[test]
    fn wpkh_script_for_path() {
        let secp = Secp256k1::verification_only();
        let script = resolve_script(&secp, &test_wallet(), "0/0").unwrap();
        assert!(script.is_p2wpkh());
        assert_eq!(hex::encode(script.as_bytes()), "00141347e82a037b5dbb38cf8c4759f242b1f5c7e09a");
    }

    #[test]
    fn unsupported_policy_is_rejected_before_derivation() {
        let secp = Secp256k1::verification_only();
        let wallet = WalletDescriptor { extended_key: "garbage".to_string(), policy: "pkh(@0/**)".to_string() };
        assert!(matches!(resolve_script(&secp, &wallet, "0/0"), Err(AppError::UnsupportedPolicy(_))));
    }

    #[test]
    fn hardened_levels_set_bit_31() {
        assert_eq!(path_to_array("m/44'/0h/0'/1/2").unwrap(), vec![44 + 0x8000_0000, 0x8000_0000, 0x8000_0000, 1, 2]);
        assert_eq!(path_to_array("0/1").unwrap(), vec![0, 1]);
        assert!(path_to_array("m/44'/abc").is_err());
    }

    #[test]
    fn key_origin_converts_to_key_source() {
        let secp = Secp256k1::verification_only();
        let info = resolve_key_origin(&secp, &test_wallet(), "0/1").unwrap();
        let (fingerprint, path) = info.to_key_source().unwrap();
        assert_eq!(fingerprint.to_bytes(), info.master_fingerprint);
        assert_eq!(path.to_u32_vec(), vec![0x8000_0054, 0x8000_0001, 0x8000_0000, 0, 1]);
        assert_eq!(path.to_string(), "84'/1'/0'/0/1");
    }
}
