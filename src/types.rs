use bitcoin::{Amount, CompressedPublicKey, ScriptBuf, Sequence, TxOut};

use crate::error::AppError;

/// 既定のsequence。RBFとロックタイムを有効にする値 (0xfffffffd)。
pub const DEFAULT_SEQUENCE: Sequence = Sequence::ENABLE_RBF_NO_LOCKTIME;

/// `"[<fingerprint>/<origin>]<xpub>"` 形式の鍵と、スクリプトテンプレートの組。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletDescriptor {
    pub extended_key: String,
    pub policy: String,
}

/// 対応しているスクリプトテンプレート。現状は単一鍵の P2WPKH のみ。
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Policy {
    Wpkh,
}

impl Policy {
    pub fn from_policy_str(policy: &str) -> Result<Self, AppError> {
        if policy.trim_start().starts_with("wpkh(") {
            Ok(Policy::Wpkh)
        } else {
            Err(AppError::UnsupportedPolicy(policy.to_string()))
        }
    }
}

/// 公開鍵とその由来 (マスターフィンガープリントと絶対パス)。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyOriginInfo {
    pub master_fingerprint: [u8; 4],
    /// "m/" から始まる絶対パス
    pub path: String,
    pub pubkey: CompressedPublicKey,
}

/// JSON の `forge` オブジェクトを検証したもの。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForgeSpec {
    pub recipient: String,
    pub input_count: u32,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrevoutSource {
    /// 実在する前トランザクションとその出力インデックス
    Real { tx: Vec<u8>, index: u32 },
    /// 資金トランザクションを偽造する
    Forged(ForgeSpec),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDescriptor {
    pub source: PrevoutSource,
    pub sequence: Option<u32>,
    pub sighash_type: Option<u32>,
    pub redeem_script: Option<ScriptBuf>,
    pub recipient: Option<String>,
}

impl InputDescriptor {
    /// BIP32メタデータに使うパス。直接の `recipient` が `forge.recipient` より優先される。
    pub fn derivation_path(&self) -> Option<&str> {
        match (&self.recipient, &self.source) {
            (Some(path), _) => Some(path),
            (None, PrevoutSource::Forged(spec)) => Some(&spec.recipient),
            (None, PrevoutSource::Real { .. }) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSelector {
    Address(String),
    Script(ScriptBuf),
    Path(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDescriptor {
    pub selector: OutputSelector,
    pub value: Amount,
    pub recipient: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDescriptor {
    pub version: u32,
    pub locktime: u32,
    pub inputs: Vec<InputDescriptor>,
    pub outputs: Vec<OutputDescriptor>,
}

/// 検証済みのディスクリプタファイル全体。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub tx: TransactionDescriptor,
    pub wallet: WalletDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrevoutRecord {
    pub tx: Vec<u8>,
    pub index: u32,
}

#[derive(Debug, Clone)]
pub struct ResolvedInput {
    pub prevout: PrevoutRecord,
    pub previous_tx: bitcoin::Transaction,
    /// `previous_tx.output[prevout.index]` の写し
    pub witness_utxo: TxOut,
    pub sequence: Sequence,
    pub sighash_type: Option<u32>,
    pub redeem_script: Option<ScriptBuf>,
    pub key_origin: Option<KeyOriginInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOutput {
    pub script: ScriptBuf,
    pub value: Amount,
    pub key_origin: Option<KeyOriginInfo>,
}
