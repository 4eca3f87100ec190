// Entry point for the ledger CLI
use clap::Parser;
use data_encoding::HEXLOWER;
use log::{error, LevelFilter};
use pow_ledger::{
    address_to_pub_key_hash, validate_address, Blockchain, Command, Opt, Transaction, UTXOSet,
    Wallets, GLOBAL_CONFIG,
};
use std::process;

fn main() {
    // Info by default, RUST_LOG still wins
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let opt = Opt::parse();

    if let Err(e) = run_command(opt.command) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn open_blockchain() -> pow_ledger::Result<Blockchain> {
    Blockchain::open_blockchain(GLOBAL_CONFIG.get_blocks_path(), GLOBAL_CONFIG.get_difficulty())
}

fn run_command(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Createblockchain { address } => {
            if !validate_address(&address) {
                return Err(format!("Invalid address: {address}").into());
            }
            // Genesis and its outputs are indexed in the same commit
            let blockchain = Blockchain::create_blockchain(
                &address,
                GLOBAL_CONFIG.get_blocks_path(),
                GLOBAL_CONFIG.get_difficulty(),
            )?;
            println!(
                "Done! Genesis block {}",
                HEXLOWER.encode(&blockchain.get_tip_hash())
            );
        }
        Command::Createwallet => {
            let mut wallets = Wallets::load(GLOBAL_CONFIG.get_wallets_path())?;
            let address = wallets.create_wallet()?;
            wallets.save()?;
            println!("Your new address: {address}")
        }
        Command::GetBalance { address } => {
            let pub_key_hash = address_to_pub_key_hash(&address)?;
            let utxo_set = UTXOSet::new(open_blockchain()?);
            let balance = utxo_set.get_balance(&pub_key_hash)?;
            println!("Balance of {address}: {balance}");
        }
        Command::ListAddresses => {
            let wallets = Wallets::load(GLOBAL_CONFIG.get_wallets_path())?;
            for address in wallets.get_addresses() {
                println!("{address}")
            }
        }
        Command::Send { from, to, amount } => {
            if !validate_address(&from) {
                return Err(format!("Invalid sender address: {from}").into());
            }
            if !validate_address(&to) {
                return Err(format!("Invalid recipient address: {to}").into());
            }
            let wallets = Wallets::load(GLOBAL_CONFIG.get_wallets_path())?;
            let wallet = wallets
                .get_wallet(&from)
                .ok_or_else(|| format!("No local wallet for {from}"))?;

            let blockchain = open_blockchain()?;
            let utxo_set = UTXOSet::new(blockchain.clone());
            let transaction = Transaction::new_utxo_transaction(wallet, &to, amount, &utxo_set)?;
            // The sender mines the block and collects the subsidy
            let coinbase = Transaction::new_coinbase_tx(&from, None)?;
            let block = blockchain.mine_block(&[coinbase, transaction])?;
            println!(
                "Success! Mined block {} at height {}",
                HEXLOWER.encode(block.get_hash()),
                block.get_height()
            )
        }
        Command::Printchain => {
            for block in open_blockchain()?.iterator() {
                let block = block?;
                print!("{block}");
                println!()
            }
        }
        Command::Reindexutxo => {
            let utxo_set = UTXOSet::new(open_blockchain()?);
            utxo_set.reindex()?;
            let count = utxo_set.count_transactions()?;
            println!("Done! There are {count} transactions in the UTXO set.");
        }
    }
    Ok(())
}
