//! PSBT v2 の中身を人が読める形で出力する。
//!
//! 診断用なので、存在しないフィールドはエラーにせず `undefined` と表示する。

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bitcoin::bip32::KeySource;
use bitcoin::consensus::encode::serialize_hex;
use psbt_v2::v2::Psbt;

use crate::error::AppError;

const UNDEFINED: &str = "undefined";

fn or_undefined<T>(value: Option<T>, render: impl FnOnce(T) -> String) -> String {
    value.map(render).unwrap_or_else(|| UNDEFINED.to_string())
}

/// `[<fingerprint>]84'/1'/0'/0/0` 形式。
pub fn derivation_to_string((fingerprint, path): &KeySource) -> String {
    format!("[{}]{}", fingerprint, path)
}

fn push_derivations<'a>(lines: &mut Vec<String>, derivations: impl IntoIterator<Item = (String, &'a KeySource)>) {
    for (n, (pubkey, source)) in derivations.into_iter().enumerate() {
        if n == 0 {
            lines.push("  Bip32 derivations:".to_string());
        }
        lines.push(format!("    Public key: {}", pubkey));
        lines.push(format!("    Path: {}", derivation_to_string(source)));
    }
}

/// デシリアライズ済みの PSBT をレポート文字列にする。
pub fn render(psbt: &Psbt) -> String {
    let global = &psbt.global;
    let mut lines = vec![
        "Global".to_string(),
        format!("  Tx version: {}", global.tx_version),
        format!("  Locktime: {}", or_undefined(global.fallback_lock_time, |l| l.to_consensus_u32().to_string())),
        format!("  Input count: {}", global.input_count),
        format!("  Output count: {}", global.output_count),
        format!("  PSBT version: {}", global.version.to_u32()),
        format!("  Modifiable: {:02x}", global.tx_modifiable_flags),
        String::new(),
        "Inputs".to_string(),
    ];

    for (i, input) in psbt.inputs.iter().enumerate() {
        lines.push(format!("  Input {}", i));
        lines.push(format!("  Previous txid: {}", input.previous_txid));
        lines.push(format!("  Output index: {}", input.spent_output_index));
        lines.push(format!("  Sequence: {}", or_undefined(input.sequence, |s| s.0.to_string())));
        lines.push(format!("  Sighash type: {}", or_undefined(input.sighash_type, |t| t.to_u32().to_string())));
        lines.push(format!("  Non-witness UTXO: {}", or_undefined(input.non_witness_utxo.as_ref(), serialize_hex)));
        lines.push(format!(
            "  Witness UTXO: {}",
            or_undefined(input.witness_utxo.as_ref(), |utxo| format!(
                "\n    Amount: {}\n    Script: {}",
                utxo.value.to_sat(),
                hex::encode(utxo.script_pubkey.as_bytes())
            ))
        ));
        lines.push(format!(
            "  Redeem script: {}",
            or_undefined(input.redeem_script.as_ref(), |s| hex::encode(s.as_bytes()))
        ));
        push_derivations(&mut lines, input.bip32_derivations.iter().map(|(pk, source)| (pk.to_string(), source)));
        push_derivations(
            &mut lines,
            input.tap_key_origins.iter().map(|(xonly, (_, source))| (xonly.to_string(), source)),
        );
        lines.push(format!(
            "  Witness script: {}",
            or_undefined(input.witness_script.as_ref(), |s| hex::encode(s.as_bytes()))
        ));
        lines.push(format!(
            "  Final scriptsig: {}",
            or_undefined(input.final_script_sig.as_ref(), |s| hex::encode(s.as_bytes()))
        ));
        lines.push(format!("  Final witness: {}", or_undefined(input.final_script_witness.as_ref(), serialize_hex)));
        lines.push("  Partial signatures: (not supported by the printer)".to_string());
        lines.push(String::new());
    }

    lines.push("Outputs".to_string());
    for (i, output) in psbt.outputs.iter().enumerate() {
        lines.push(format!("  Output {}", i));
        lines.push(format!("  Amount: {}", output.amount.to_sat()));
        lines.push(format!("  Script: {}", hex::encode(output.script_pubkey.as_bytes())));
        push_derivations(&mut lines, output.bip32_derivations.iter().map(|(pk, source)| (pk.to_string(), source)));
        lines.push(String::new());
    }

    lines.join("\n")
}

/// シリアライズされた PSBT をデコードしてレポートにする。
/// 任意フィールドの欠落は `undefined` になるが、PSBT 自体が壊れていればエラーを返す。
pub fn print_psbt(bytes: &[u8]) -> Result<String, AppError> {
    // DeserializeError は Display を持たないので Debug で包む
    let psbt = Psbt::deserialize(bytes).map_err(|e| AppError::Decode(format!("PSBTのデシリアライズに失敗: {:?}", e)))?;
    Ok(render(&psbt))
}

pub fn print_psbt_base64(encoded: &str) -> Result<String, AppError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| AppError::Decode(format!("PSBTのbase64デコードに失敗: {}", e)))?;
    print_psbt(&bytes)
}
