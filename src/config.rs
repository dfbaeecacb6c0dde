use std::fs;
use std::path::Path;

use bitcoin::{Amount, ScriptBuf};
use serde::Deserialize;

use crate::error::AppError;
use crate::types::{
    Descriptor, ForgeSpec, InputDescriptor, OutputDescriptor, OutputSelector, PrevoutSource, TransactionDescriptor,
    WalletDescriptor,
};

// serde の段階では全フィールドを Option で受け、欠落は validate() で MissingField にする

#[derive(Deserialize, Debug)]
pub struct DescriptorFile {
    pub tx: Option<TxConfig>,
    pub wallet: Option<String>,
    pub policy: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct TxConfig {
    pub version: Option<u32>,
    pub locktime: Option<u32>,
    pub inputs: Option<Vec<InputConfig>>,
    pub outputs: Option<Vec<OutputConfig>>,
}

#[derive(Deserialize, Debug)]
pub struct InputConfig {
    pub tx: Option<String>, // 前トランザクションの16進数
    pub index: Option<u32>,
    pub sequence: Option<u32>,
    #[serde(alias = "sighashType")]
    pub sighash_type: Option<u32>,
    pub redeem_script: Option<String>,
    pub recipient: Option<String>,
    pub forge: Option<ForgeConfig>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ForgeConfig {
    pub recipient: Option<String>,
    // 負の値も InvalidForgeSpec として扱うため符号付きで受ける
    pub input_count: Option<i64>,
    pub amount: Option<i64>,
}

#[derive(Deserialize, Debug)]
pub struct OutputConfig {
    pub address: Option<String>,
    pub script: Option<String>,
    pub path: Option<String>,
    pub value: Option<u64>,
    pub recipient: Option<String>,
}

impl DescriptorFile {
    /// 鍵導出などを始める前に、必須フィールドと入出力の形をすべて検証する。
    pub fn validate(self) -> Result<Descriptor, AppError> {
        let tx = self.tx.ok_or_else(|| AppError::missing("tx", "descriptor"))?;
        let wallet = self.wallet.ok_or_else(|| AppError::missing("wallet", "descriptor"))?;
        let policy = self.policy.ok_or_else(|| AppError::missing("policy", "descriptor"))?;
        let version = tx.version.ok_or_else(|| AppError::missing("version", "tx"))?;
        let inputs = tx.inputs.ok_or_else(|| AppError::missing("inputs", "tx"))?;
        let outputs = tx.outputs.ok_or_else(|| AppError::missing("outputs", "tx"))?;

        let inputs = inputs
            .into_iter()
            .enumerate()
            .map(|(i, input)| input.validate(i))
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = outputs
            .into_iter()
            .enumerate()
            .map(|(i, output)| output.validate(i))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Descriptor {
            tx: TransactionDescriptor { version, locktime: tx.locktime.unwrap_or(0), inputs, outputs },
            wallet: WalletDescriptor { extended_key: wallet, policy },
        })
    }
}

impl InputConfig {
    fn validate(self, input_index: usize) -> Result<InputDescriptor, AppError> {
        let object = format!("tx.inputs[{}]", input_index);

        let source = match self.forge {
            Some(forge) => {
                if self.tx.is_some() {
                    return Err(AppError::InputValidation(format!(
                        "{}: 'tx' と 'forge' は同時に指定できません",
                        object
                    )));
                }
                PrevoutSource::Forged(forge.validate(&format!("{}.forge", object))?)
            }
            None => {
                let tx_hex = self.tx.ok_or_else(|| AppError::missing("tx", object.clone()))?;
                let index = self.index.ok_or_else(|| AppError::missing("index", object.clone()))?;
                let tx = hex::decode(tx_hex.trim())
                    .map_err(|e| AppError::Decode(format!("{}.tx の16進数デコードに失敗: {}", object, e)))?;
                PrevoutSource::Real { tx, index }
            }
        };

        let redeem_script = self
            .redeem_script
            .map(|script_hex| decode_script(&script_hex, &format!("{}.redeem_script", object)))
            .transpose()?;

        Ok(InputDescriptor {
            source,
            sequence: self.sequence,
            sighash_type: self.sighash_type,
            redeem_script,
            recipient: self.recipient,
        })
    }
}

impl ForgeConfig {
    fn validate(self, object: &str) -> Result<ForgeSpec, AppError> {
        let recipient = self.recipient.ok_or_else(|| AppError::missing("recipient", object))?;
        let input_count = self.input_count.ok_or_else(|| AppError::missing("inputCount", object))?;
        let amount = self.amount.ok_or_else(|| AppError::missing("amount", object))?;

        let input_count = u32::try_from(input_count)
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| AppError::InvalidForgeSpec(format!("{}.inputCount が不正です: {}", object, input_count)))?;
        let amount = u64::try_from(amount)
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| AppError::InvalidForgeSpec(format!("{}.amount が不正です: {}", object, amount)))?;

        Ok(ForgeSpec { recipient, input_count, amount })
    }
}

impl OutputConfig {
    fn validate(self, output_index: usize) -> Result<OutputDescriptor, AppError> {
        let object = format!("tx.outputs[{}]", output_index);

        let selector = match (self.address, self.script, self.path) {
            (Some(address), None, None) => OutputSelector::Address(address),
            (None, Some(script_hex), None) => {
                OutputSelector::Script(decode_script(&script_hex, &format!("{}.script", object))?)
            }
            (None, None, Some(path)) => OutputSelector::Path(path),
            (None, None, None) => {
                return Err(AppError::UnsupportedOutputSelector {
                    output_index,
                    detail: "いずれも指定されていません".to_string(),
                });
            }
            _ => {
                return Err(AppError::UnsupportedOutputSelector {
                    output_index,
                    detail: "複数指定されています".to_string(),
                });
            }
        };
        let value = self.value.ok_or_else(|| AppError::missing("value", object))?;

        Ok(OutputDescriptor { selector, value: Amount::from_sat(value), recipient: self.recipient })
    }
}

fn decode_script(script_hex: &str, field: &str) -> Result<ScriptBuf, AppError> {
    hex::decode(script_hex.trim())
        .map(ScriptBuf::from_bytes)
        .map_err(|e| AppError::Decode(format!("{} の16進数デコードに失敗: {}", field, e)))
}

pub fn parse_descriptor(json: &str) -> Result<Descriptor, AppError> {
    let file: DescriptorFile = serde_json::from_str(json)?;
    log::debug!("入力設定ファイルのパース成功: {:?}", file);
    file.validate()
}

pub fn load_descriptor(path: &Path) -> Result<Descriptor, AppError> {
    let content = fs::read_to_string(path).map_err(|e| {
        log::error!("入力ファイルの読み込みに失敗しました: {:?}", path);
        AppError::Io(e)
    })?;

    parse_descriptor(&content).map_err(|e| match e {
        AppError::Json(source) => {
            log::error!("入力JSONのパースに失敗しました。");
            AppError::JsonParse { file_path: path.to_path_buf(), source }
        }
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEMO: &str = include_str!("../demos/forged_wpkh.json");

    fn with_tx(tx: &str) -> String {
        format!(
            r#"{{ "wallet": "[f5acc2fd/84'/1'/0']tpub", "policy": "wpkh(@0)", "tx": {} }}"#,
            tx
        )
    }

    fn expect_missing(json: &str, expected: &'static str) {
        match parse_descriptor(json) {
            Err(AppError::MissingField { field, .. }) => assert_eq!(field, expected),
            other => panic!("expected MissingField({}), got {:?}", expected, other),
        }
    }

    #[test]
    fn demo_descriptor_validates() {
        let descriptor = parse_descriptor(DEMO).unwrap();
        assert_eq!(descriptor.wallet.policy, "wpkh(@0/**)");
        assert_eq!(descriptor.tx.version, 2);
        assert_eq!(descriptor.tx.locktime, 0);
        assert_eq!(
            descriptor.tx.inputs[0].source,
            PrevoutSource::Forged(ForgeSpec { recipient: "0/0".to_string(), input_count: 1, amount: 100_000 })
        );
        assert_eq!(descriptor.tx.outputs[0].selector, OutputSelector::Path("0/1".to_string()));
        assert_eq!(descriptor.tx.outputs[0].value, Amount::from_sat(99_000));
    }

    #[test]
    fn missing_top_level_fields() {
        expect_missing(r#"{ "wallet": "w", "policy": "p" }"#, "tx");
        expect_missing(r#"{ "policy": "p", "tx": {} }"#, "wallet");
        expect_missing(r#"{ "wallet": "w", "tx": {} }"#, "policy");
        expect_missing(&with_tx(r#"{ "inputs": [], "outputs": [] }"#), "version");
        expect_missing(&with_tx(r#"{ "version": 2, "outputs": [] }"#), "inputs");
        expect_missing(&with_tx(r#"{ "version": 2, "inputs": [] }"#), "outputs");
    }

    #[test]
    fn missing_outputs_reported_before_input_problems() {
        // 入力側の不備より先に outputs の欠落が検出される
        expect_missing(&with_tx(r#"{ "version": 2, "inputs": [ {} ] }"#), "outputs");
    }

    #[test]
    fn input_shapes() {
        expect_missing(&with_tx(r#"{ "version": 2, "inputs": [ {} ], "outputs": [] }"#), "tx");
        expect_missing(&with_tx(r#"{ "version": 2, "inputs": [ { "tx": "00" } ], "outputs": [] }"#), "index");
        expect_missing(
            &with_tx(r#"{ "version": 2, "inputs": [ { "forge": { "recipient": "0/0", "inputCount": 1 } } ], "outputs": [] }"#),
            "amount",
        );
        expect_missing(
            &with_tx(r#"{ "version": 2, "inputs": [ { "forge": { "inputCount": 1, "amount": 5 } } ], "outputs": [] }"#),
            "recipient",
        );

        let both = with_tx(
            r#"{ "version": 2, "inputs": [ { "tx": "00", "index": 0, "forge": { "recipient": "0/0", "inputCount": 1, "amount": 5 } } ], "outputs": [] }"#,
        );
        assert!(matches!(parse_descriptor(&both), Err(AppError::InputValidation(_))));

        let bad_hex = with_tx(r#"{ "version": 2, "inputs": [ { "tx": "zz", "index": 0 } ], "outputs": [] }"#);
        assert!(matches!(parse_descriptor(&bad_hex), Err(AppError::Decode(_))));
    }

    #[test]
    fn forge_parameters_must_be_positive() {
        for (count, amount) in [(0, 100), (-1, 100), (1, 0), (1, -5)] {
            let json = with_tx(&format!(
                r#"{{ "version": 2, "inputs": [ {{ "forge": {{ "recipient": "0/0", "inputCount": {}, "amount": {} }} }} ], "outputs": [] }}"#,
                count, amount
            ));
            assert!(
                matches!(parse_descriptor(&json), Err(AppError::InvalidForgeSpec(_))),
                "inputCount={} amount={}",
                count,
                amount
            );
        }
    }

    #[test]
    fn input_optional_fields_carry_through() {
        let json = with_tx(
            r#"{ "version": 2, "locktime": 800000, "inputs": [ { "tx": "0200", "index": 3, "sequence": 4294967295, "sighashType": 1, "redeem_script": "0014aa", "recipient": "1/2" } ], "outputs": [] }"#,
        );
        let descriptor = parse_descriptor(&json).unwrap();
        let input = &descriptor.tx.inputs[0];
        assert_eq!(descriptor.tx.locktime, 800_000);
        assert_eq!(input.source, PrevoutSource::Real { tx: vec![0x02, 0x00], index: 3 });
        assert_eq!(input.sequence, Some(0xffff_ffff));
        assert_eq!(input.sighash_type, Some(1));
        assert_eq!(input.redeem_script.as_ref().unwrap().as_bytes(), &[0x00, 0x14, 0xaa]);
        assert_eq!(input.recipient.as_deref(), Some("1/2"));
    }

    #[test]
    fn output_selectors() {
        let none = with_tx(r#"{ "version": 2, "inputs": [], "outputs": [ { "value": 1 } ] }"#);
        assert!(matches!(
            parse_descriptor(&none),
            Err(AppError::UnsupportedOutputSelector { output_index: 0, .. })
        ));

        let two = with_tx(r#"{ "version": 2, "inputs": [], "outputs": [ { "address": "tb1qxyz", "script": "6a", "value": 1 } ] }"#);
        assert!(matches!(parse_descriptor(&two), Err(AppError::UnsupportedOutputSelector { output_index: 0, .. })));

        let two_second = with_tx(r#"{ "version": 2, "inputs": [], "outputs": [ { "script": "6a", "value": 1 }, { "script": "6a", "path": "0/1", "value": 1 } ] }"#);
        assert!(matches!(
            parse_descriptor(&two_second),
            Err(AppError::UnsupportedOutputSelector { output_index: 1, .. })
        ));

        expect_missing(&with_tx(r#"{ "version": 2, "inputs": [], "outputs": [ { "script": "6a" } ] }"#), "value");

        let script = with_tx(r#"{ "version": 2, "inputs": [], "outputs": [ { "script": "6a01ff", "value": 0, "recipient": "0/9" } ] }"#);
        let output = &parse_descriptor(&script).unwrap().tx.outputs[0];
        assert_eq!(output.selector, OutputSelector::Script(ScriptBuf::from_bytes(vec![0x6a, 0x01, 0xff])));
        assert_eq!(output.recipient.as_deref(), Some("0/9"));
    }

    #[test]
    fn load_descriptor_reads_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/forged_wpkh.json");
        assert_eq!(load_descriptor(&path).unwrap(), parse_descriptor(DEMO).unwrap());
    }

    #[test]
    fn load_descriptor_reports_file_errors() {
        let missing = std::env::temp_dir().join("psbt-forge-cli-no-such-descriptor.json");
        assert!(matches!(load_descriptor(&missing), Err(AppError::Io(_))));

        let broken = std::env::temp_dir().join(format!("psbt-forge-cli-broken-{}.json", std::process::id()));
        fs::write(&broken, "{ \"wallet\": ").unwrap();
        let result = load_descriptor(&broken);
        fs::remove_file(&broken).unwrap();
        match result {
            Err(AppError::JsonParse { file_path, .. }) => assert_eq!(file_path, broken),
            other => panic!("expected JsonParse, got {:?}", other),
        }

        // 構文は正しいが必須フィールドが欠けている場合は MissingField のまま
        let incomplete = std::env::temp_dir().join(format!("psbt-forge-cli-incomplete-{}.json", std::process::id()));
        fs::write(&incomplete, r#"{ "wallet": "w", "policy": "p" }"#).unwrap();
        let result = load_descriptor(&incomplete);
        fs::remove_file(&incomplete).unwrap();
        assert!(matches!(result, Err(AppError::MissingField { field: "tx", .. })));
    }
}
