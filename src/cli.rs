use clap::{Parser, Subcommand};
use std::path::PathBuf;
use bitcoin::Network as BitcoinNetwork;
use crate::error::AppError;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct CliArgs {
    /// 使用するネットワーク ("bitcoin", "testnet", "regtest")
    #[clap(short, long, value_parser, default_value = "testnet", global = true)]
    pub network: String,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// ディスクリプタJSONからPSBT v2を作成し、base64で出力する
    Create {
        /// ウォレットとトランザクションを記述したJSONファイルへのパス
        #[clap(short, long, value_parser)]
        input_file: PathBuf,

        /// base64のPSBTを保存するファイルへのパス
        #[clap(short, long, value_parser)]
        output_file: Option<PathBuf>,

        /// 作成したPSBTの中身も表示する
        #[clap(long)]
        inspect: bool,
    },

    /// 各入力のprevout (偽造または指定された前トランザクション) を出力する
    Forge {
        #[clap(short, long, value_parser)]
        input_file: PathBuf,
    },

    /// base64のPSBTの中身を表示する
    Print {
        psbt: String,
    },
}

pub fn parse_network(network_str: &str) -> Result<BitcoinNetwork, AppError> {
    match network_str.to_lowercase().as_str() {
        "bitcoin" | "mainnet" => Ok(BitcoinNetwork::Bitcoin),
        "testnet" => Ok(BitcoinNetwork::Testnet),
        "regtest" => Ok(BitcoinNetwork::Regtest),
        s => Err(AppError::InputValidation(format!("無効なネットワークが指定されました: {}", s))),
    }
}
