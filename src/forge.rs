use bitcoin::{
    absolute::LockTime, consensus::encode, ecdsa, hashes::Hash, secp256k1::{All, Message, Secp256k1, SecretKey},
    sighash::{EcdsaSighashType, SighashCache}, transaction::Version, Amount, CompressedPublicKey, OutPoint, Script,
    ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use rand::RngCore;

use crate::{
    error::AppError,
    types::{Descriptor, InputDescriptor, PrevoutRecord, PrevoutSource, WalletDescriptor},
    wallet::resolve_script,
};

/// 偽造トランザクションの資金出力は常に先頭
pub const FORGED_OUTPUT_INDEX: u32 = 0;

// 偽造入力1つ分の鍵と、それが使う (架空の) UTXO
struct SyntheticInput {
    secret_key: SecretKey,
    public_key: CompressedPublicKey,
    script_pubkey: ScriptBuf,
    value: Amount,
}

/// `recipient_script` に `total_amount` sats を支払う、署名済みの資金トランザクションを作る。
///
/// 入力は乱数の txid と鍵から作った P2WPKH で、実在するチェーン上の出力は参照しない。
/// 各入力の額は `total_amount / input_count` (切り捨て) なので、入力合計は出力額より
/// 最大 `input_count - 1` sats 少なくなり得る。
pub fn forge_funding_transaction(
    secp: &Secp256k1<All>,
    recipient_script: &Script,
    input_count: u32,
    total_amount: u64,
) -> Result<Transaction, AppError> {
    if input_count == 0 {
        return Err(AppError::InvalidForgeSpec("inputCount は1以上である必要があります".to_string()));
    }
    if total_amount == 0 {
        return Err(AppError::InvalidForgeSpec("amount は1以上である必要があります".to_string()));
    }
    if recipient_script.is_empty() {
        return Err(AppError::InvalidForgeSpec("受取スクリプトが空です".to_string()));
    }

    let mut rng = rand::thread_rng();
    let input_value = Amount::from_sat(total_amount / u64::from(input_count));

    let synthetic_inputs: Vec<SyntheticInput> = (0..input_count)
        .map(|_| {
            let (secret_key, public_key) = secp.generate_keypair(&mut rng);
            let public_key = CompressedPublicKey(public_key);
            SyntheticInput {
                secret_key,
                public_key,
                script_pubkey: ScriptBuf::new_p2wpkh(&public_key.wpubkey_hash()),
                value: input_value,
            }
        })
        .collect();

    let mut transaction = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: synthetic_inputs
            .iter()
            .map(|_| {
                let mut fake_txid = [0u8; 32];
                rng.fill_bytes(&mut fake_txid);
                TxIn {
                    previous_output: OutPoint::new(Txid::from_byte_array(fake_txid), 0),
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                }
            })
            .collect(),
        output: vec![TxOut {
            value: Amount::from_sat(total_amount),
            script_pubkey: recipient_script.to_owned(),
        }],
    };

    // 1. 署名ハッシュ計算と署名 (transaction は不変借用のみ)
    let mut signatures: Vec<ecdsa::Signature> = Vec::with_capacity(synthetic_inputs.len());
    {
        let mut sighash_cache = SighashCache::new(&transaction);
        for (input_index, input) in synthetic_inputs.iter().enumerate() {
            let sighash = sighash_cache
                .p2wpkh_signature_hash(input_index, &input.script_pubkey, input.value, EcdsaSighashType::All)
                .map_err(|source| AppError::Sighash { input_index, source })?;
            let message = Message::from_digest(sighash.to_byte_array());
            signatures.push(ecdsa::Signature {
                signature: secp.sign_ecdsa(&message, &input.secret_key),
                sighash_type: EcdsaSighashType::All,
            });
        }
    }

    // 2. witness の適用 (ここで初めて transaction を変更する)
    for (input_index, (signature, input)) in signatures.iter().zip(&synthetic_inputs).enumerate() {
        transaction.input[input_index].witness = Witness::p2wpkh(signature, &input.public_key.0);
    }

    log::debug!(
        "資金トランザクションを偽造しました: txid={}, 入力数={}, 金額={} sats",
        transaction.compute_txid(),
        input_count,
        total_amount
    );
    Ok(transaction)
}

/// 入力1つ分の prevout。`forge` 指定があれば偽造し、なければ `tx`/`index` をそのまま使う。
pub fn forge_prevout(
    secp: &Secp256k1<All>,
    wallet: &WalletDescriptor,
    input: &InputDescriptor,
) -> Result<PrevoutRecord, AppError> {
    match &input.source {
        PrevoutSource::Real { tx, index } => Ok(PrevoutRecord { tx: tx.clone(), index: *index }),
        PrevoutSource::Forged(spec) => {
            let script = resolve_script(secp, wallet, &spec.recipient)?;
            let tx = forge_funding_transaction(secp, &script, spec.input_count, spec.amount)?;
            Ok(PrevoutRecord { tx: encode::serialize(&tx), index: FORGED_OUTPUT_INDEX })
        }
    }
}

/// 宣言された入力ごとに1つ、入力順で prevout を返す。
pub fn forge_prevouts(secp: &Secp256k1<All>, descriptor: &Descriptor) -> Result<Vec<PrevoutRecord>, AppError> {
    log::info!("prevoutの解決を開始します (入力数: {})。", descriptor.tx.inputs.len());
    descriptor
        .tx
        .inputs
        .iter()
        .map(|input| forge_prevout(secp, &descriptor.wallet, input))
        .collect()
}
