use std::fs::File;
use std::io::Write;
use std::path::Path;
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::Network;
use clap::Parser;

mod assembler;
mod cli;
mod config;
mod error;
mod forge;
mod inspector;
mod resolver;
mod types;
mod wallet;

use cli::{CliArgs, Command, parse_network};
use error::AppError;

fn main() -> Result<(), AppError> {
    env_logger::init();

    let args = CliArgs::parse();
    log::info!("アプリケーションを開始します。引数: {:?}", args);

    let cli_network = parse_network(&args.network)?;
    log::info!("指定されたネットワーク: {:?}", cli_network);

    let secp: Secp256k1<All> = Secp256k1::new();

    match args.command {
        Command::Create { input_file, output_file, inspect } => {
            run_create(&secp, &input_file, output_file.as_deref(), inspect, cli_network)?
        }
        Command::Forge { input_file } => run_forge(&secp, &input_file)?,
        Command::Print { psbt } => println!("{}", inspector::print_psbt_base64(&psbt)?),
    }

    log::info!("処理が正常に完了しました。");
    Ok(())
}

fn run_create(
    secp: &Secp256k1<All>,
    input_file: &Path,
    output_file: Option<&Path>,
    inspect: bool,
    network: Network,
) -> Result<(), AppError> {
    let descriptor = config::load_descriptor(input_file)?;
    log::info!("ディスクリプタを読み込みました: {:?}", input_file);

    let psbt = assembler::create_psbt(secp, &descriptor, network)?;
    let encoded = assembler::to_base64(&psbt);

    if inspect {
        println!("{}", inspector::print_psbt(&psbt)?);
    }
    println!("{}", encoded);

    if let Some(path) = output_file {
        let mut file = File::create(path).map_err(|e| {
            log::error!("出力ファイルの作成に失敗しました: {:?}", path);
            AppError::Io(e)
        })?;
        file.write_all(encoded.as_bytes()).map_err(|e| {
            log::error!("出力ファイルへの書き込みに失敗しました。");
            AppError::Io(e)
        })?;
        log::info!("PSBTを {:?} に保存しました。", path);
    }
    Ok(())
}

fn run_forge(secp: &Secp256k1<All>, input_file: &Path) -> Result<(), AppError> {
    let descriptor = config::load_descriptor(input_file)?;
    let prevouts = forge::forge_prevouts(secp, &descriptor)?;
    log::info!("prevoutを {} 件解決しました。", prevouts.len());

    for prevout in &prevouts {
        println!("Prevout:");
        println!("{}", hex::encode(&prevout.tx));
        println!("Output index: {}", prevout.index);
    }
    Ok(())
}
