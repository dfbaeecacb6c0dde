use std::str::FromStr;

use bitcoin::{consensus::encode, secp256k1::{All, Secp256k1}, Address, Network, Sequence, Transaction};

use crate::{
    error::AppError,
    forge::forge_prevout,
    types::{
        Descriptor, InputDescriptor, OutputDescriptor, OutputSelector, PrevoutRecord, ResolvedInput, ResolvedOutput,
        WalletDescriptor, DEFAULT_SEQUENCE,
    },
    wallet::{resolve_key_origin, resolve_script},
};

/// 入出力を宣言順に解決する。返す配列の添字はそのまま PSBT の入出力インデックスになる。
pub fn resolve_descriptor(
    secp: &Secp256k1<All>,
    descriptor: &Descriptor,
    network: Network,
) -> Result<(Vec<ResolvedInput>, Vec<ResolvedOutput>), AppError> {
    let wallet = &descriptor.wallet;

    let inputs = descriptor
        .tx
        .inputs
        .iter()
        .enumerate()
        .map(|(input_index, input)| {
            let prevout = forge_prevout(secp, wallet, input)?;
            resolve_input(secp, wallet, input_index, input, prevout)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let outputs = descriptor
        .tx
        .outputs
        .iter()
        .enumerate()
        .map(|(output_index, output)| resolve_output(secp, wallet, output_index, output, network))
        .collect::<Result<Vec<_>, _>>()?;

    log::info!("ディスクリプタを解決しました (入力: {}, 出力: {})。", inputs.len(), outputs.len());
    Ok((inputs, outputs))
}

pub fn resolve_input(
    secp: &Secp256k1<All>,
    wallet: &WalletDescriptor,
    input_index: usize,
    input: &InputDescriptor,
    prevout: PrevoutRecord,
) -> Result<ResolvedInput, AppError> {
    let previous_tx: Transaction = encode::deserialize(&prevout.tx).map_err(|e| {
        AppError::Decode(format!("入力 {} の前トランザクションをデコードできません: {}", input_index, e))
    })?;
    let witness_utxo = previous_tx
        .output
        .get(prevout.index as usize)
        .cloned()
        .ok_or_else(|| {
            AppError::Decode(format!(
                "入力 {} の出力インデックス {} は範囲外です (出力数: {})",
                input_index,
                prevout.index,
                previous_tx.output.len()
            ))
        })?;

    let key_origin = input
        .derivation_path()
        .map(|path| resolve_key_origin(secp, wallet, path))
        .transpose()?;

    log::debug!(
        "入力 {} を解決しました: prevout={}:{}, value={}, 鍵の由来={:?}",
        input_index,
        previous_tx.compute_txid(),
        prevout.index,
        witness_utxo.value,
        key_origin.as_ref().map(|k| &k.path)
    );

    Ok(ResolvedInput {
        prevout,
        previous_tx,
        witness_utxo,
        sequence: input.sequence.map(Sequence).unwrap_or(DEFAULT_SEQUENCE),
        sighash_type: input.sighash_type,
        redeem_script: input.redeem_script.clone(),
        key_origin,
    })
}

pub fn resolve_output(
    secp: &Secp256k1<All>,
    wallet: &WalletDescriptor,
    output_index: usize,
    output: &OutputDescriptor,
    network: Network,
) -> Result<ResolvedOutput, AppError> {
    let (script, mut key_origin) = match &output.selector {
        OutputSelector::Address(address) => {
            let address = Address::from_str(address)?.require_network(network)?;
            (address.script_pubkey(), None)
        }
        OutputSelector::Script(script) => (script.clone(), None),
        OutputSelector::Path(path) => {
            (resolve_script(secp, wallet, path)?, Some(resolve_key_origin(secp, wallet, path)?))
        }
    };

    // recipient はスクリプトの決め方に関係なく鍵の由来を上書きする
    if let Some(recipient) = &output.recipient {
        key_origin = Some(resolve_key_origin(secp, wallet, recipient)?);
    }

    log::debug!(
        "出力 {} を解決しました: {:?}, value={}, 鍵の由来={:?}",
        output_index,
        output.selector,
        output.value,
        key_origin.as_ref().map(|k| &k.path)
    );
    Ok(ResolvedOutput { script, value: output.value, key_origin })
}
