use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bitcoin::{
    absolute::LockTime,
    secp256k1::{All, Secp256k1},
    transaction, Network, OutPoint, PublicKey, TxOut,
};
use psbt_v2::v2::{Global, InputBuilder, OutputBuilder, Psbt};
use psbt_v2::PsbtSighashType;

use crate::{
    error::AppError,
    resolver::resolve_descriptor,
    types::{Descriptor, ResolvedInput, ResolvedOutput},
};

/// 解決済みの入出力から PSBT v2 を組み立て、シリアライズしたバイト列を返す。
///
/// 入力 `i` / 出力 `i` のフィールドはすべて `inputs[i]` / `outputs[i]` から取る。
pub fn assemble(
    inputs: &[ResolvedInput],
    outputs: &[ResolvedOutput],
    tx_version: u32,
    locktime: u32,
) -> Result<Vec<u8>, AppError> {
    let global = Global {
        version: psbt_v2::V2,
        tx_version: transaction::Version(tx_version as i32),
        fallback_lock_time: Some(LockTime::from_consensus(locktime)),
        input_count: inputs.len(),
        output_count: outputs.len(),
        ..Global::default()
    };

    let mut psbt = Psbt { global, inputs: Vec::with_capacity(inputs.len()), outputs: Vec::with_capacity(outputs.len()) };

    for input in inputs {
        let outpoint = OutPoint { txid: input.previous_tx.compute_txid(), vout: input.prevout.index };
        let mut psbt_input = InputBuilder::new(&outpoint)
            .legacy_fund(input.previous_tx.clone())
            .segwit_fund(input.witness_utxo.clone())
            .build();
        psbt_input.sequence = Some(input.sequence);
        psbt_input.sighash_type = input.sighash_type.map(PsbtSighashType::from_u32);
        if let Some(script) = &input.redeem_script {
            psbt_input.redeem_script = Some(script.clone());
            psbt_input.witness_script = Some(script.clone());
        }
        if let Some(origin) = &input.key_origin {
            psbt_input.bip32_derivations.insert(PublicKey::from(origin.pubkey), origin.to_key_source()?);
        }
        psbt.inputs.push(psbt_input);
    }

    for output in outputs {
        let mut psbt_output =
            OutputBuilder::new(TxOut { value: output.value, script_pubkey: output.script.clone() }).build();
        if let Some(origin) = &output.key_origin {
            psbt_output.bip32_derivations.insert(PublicKey::from(origin.pubkey), origin.to_key_source()?);
        }
        psbt.outputs.push(psbt_output);
    }

    Ok(psbt.serialize())
}

/// ディスクリプタを解決して PSBT を作る。
pub fn create_psbt(secp: &Secp256k1<All>, descriptor: &Descriptor, network: Network) -> Result<Vec<u8>, AppError> {
    let (inputs, outputs) = resolve_descriptor(secp, descriptor, network)?;
    let bytes = assemble(&inputs, &outputs, descriptor.tx.version, descriptor.tx.locktime)?;
    log::info!("PSBTを作成しました ({} バイト)。", bytes.len());
    Ok(bytes)
}

pub fn to_base64(psbt: &[u8]) -> String {
    STANDARD.encode(psbt)
}
