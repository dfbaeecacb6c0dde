use std::path::PathBuf;
use bitcoin::address::ParseError as BitcoinAddressError;
use bitcoin::bip32::Error as Bip32Error;
use bitcoin::sighash::P2wpkhError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/Oエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSONパースエラー ファイル: {file_path:?}, 詳細: {source}")]
    JsonParse {
        file_path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSONパースエラー: {0}")]
    Json(#[from] serde_json::Error),

    #[error("必須フィールド \"{field}\" がありません (対象: {object})")]
    MissingField {
        field: &'static str,
        object: String,
    },

    #[error("ウォレット鍵の形式が不正です: {0}")]
    MalformedWalletKey(String),

    #[error("未対応のポリシーです: \"{0}\"")]
    UnsupportedPolicy(String),

    #[error("出力 {output_index} のスクリプト指定が不正です ('address', 'script', 'path' のいずれか1つが必要): {detail}")]
    UnsupportedOutputSelector {
        output_index: usize,
        detail: String,
    },

    #[error("forge指定が不正です: {0}")]
    InvalidForgeSpec(String),

    #[error("デコードエラー: {0}")]
    Decode(String),

    #[error("BIP32鍵導出エラー: {0}")]
    KeyDerivation(#[from] Bip32Error),

    #[error("Bitcoinアドレスエラー: {0}")]
    Address(#[from] BitcoinAddressError),

    #[error("Sighash計算エラー (入力インデックス {input_index}): {source}")]
    Sighash {
        input_index: usize,
        #[source]
        source: P2wpkhError,
    },

    #[error("入力検証エラー: {0}")]
    InputValidation(String),
}

impl AppError {
    pub fn missing(field: &'static str, object: impl Into<String>) -> Self {
        AppError::MissingField { field, object: object.into() }
    }
}
