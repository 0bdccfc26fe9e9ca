//! CLI entry point for samlidp-meta: store export/import tool.
//!
//! Imports write to the store only.  A running server picks up imported
//! services on its next start.  Plaintext passwords in an import are hashed
//! with the configured Argon2 parameters.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use samlidp::credentials::{Argon2Hasher, CredentialManager};
use samlidp::serialization::{
    export_store, import_store, ExportOptions, ImportOptions, ALL_KINDS,
};
use samlidp::store::Store;

#[derive(Parser)]
#[command(name = "samlidp-meta", about = "samlidp store export/import tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export records to JSON
    Export {
        #[arg(long, default_value = "samlidp.example.yaml")]
        config: PathBuf,
        #[arg(long, default_value = "-")]
        output: String,
        /// Comma-separated resource kinds (default: all)
        #[arg(long)]
        kinds: Option<String>,
        #[arg(long, default_value_t = false)]
        include_credentials: bool,
    },
    /// Import records from JSON
    Import {
        #[arg(long, default_value = "samlidp.example.yaml")]
        config: PathBuf,
        #[arg(long, default_value = "-")]
        input: String,
        /// Delete every stored record of each imported kind first
        #[arg(long, default_value_t = false)]
        replace: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let rc = match cli.command {
        Commands::Export {
            config,
            output,
            kinds,
            include_credentials,
        } => run_export(config, output, kinds, include_credentials).await,
        Commands::Import {
            config,
            input,
            replace,
        } => run_import(config, input, replace).await,
    };
    std::process::exit(rc);
}

fn open_store(config: &PathBuf) -> anyhow::Result<Arc<dyn Store>> {
    let config = samlidp::config::load_config(config)?;
    samlidp::store::open(&config.store)
}

/// Store plus the credential manager that hashes imported passwords.
fn open_for_import(config: &PathBuf) -> anyhow::Result<(Arc<dyn Store>, CredentialManager)> {
    let config = samlidp::config::load_config(config)?;
    let hasher = Argon2Hasher::new(&config.idp.password_hash)?;
    let store = samlidp::store::open(&config.store)?;
    Ok((store, CredentialManager::new(Arc::new(hasher))))
}

async fn run_export(
    config: PathBuf,
    output: String,
    kinds: Option<String>,
    include_credentials: bool,
) -> i32 {
    let kind_list: Vec<String> = match kinds {
        Some(k) => {
            let list: Vec<String> = k.split(',').map(|s| s.trim().to_string()).collect();
            for name in &list {
                if !ALL_KINDS.contains(&name.as_str()) {
                    eprintln!("Error: invalid resource kind: {}", name);
                    return 1;
                }
            }
            list
        }
        None => ALL_KINDS.iter().map(|s| s.to_string()).collect(),
    };

    let store = match open_store(&config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error opening store: {}", e);
            return 1;
        }
    };

    let opts = ExportOptions {
        kinds: kind_list,
        include_credentials,
    };

    match export_store(store.as_ref(), &opts).await {
        Ok(result) => {
            if output == "-" {
                println!("{}", result);
            } else {
                if let Err(e) = std::fs::write(&output, format!("{}\n", result)) {
                    eprintln!("Error writing output: {}", e);
                    return 1;
                }
                eprintln!("Exported to {}", output);
            }
            0
        }
        Err(e) => {
            eprintln!("Error exporting: {}", e);
            1
        }
    }
}

async fn run_import(config: PathBuf, input: String, replace: bool) -> i32 {
    let json_str = if input == "-" {
        use std::io::Read;
        let mut buf = String::new();
        if let Err(e) = std::io::stdin().read_to_string(&mut buf) {
            eprintln!("Error reading stdin: {}", e);
            return 1;
        }
        buf
    } else {
        match std::fs::read_to_string(&input) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Error reading input: {}", e);
                return 1;
            }
        }
    };

    let (store, credentials) = match open_for_import(&config) {
        Ok(opened) => opened,
        Err(e) => {
            eprintln!("Error opening store: {}", e);
            return 1;
        }
    };

    let opts = ImportOptions { replace };

    match import_store(store.as_ref(), &credentials, &json_str, &opts).await {
        Ok(result) => {
            for kind in ALL_KINDS {
                if let Some(count) = result.counts.get(*kind) {
                    let skip = result.skipped.get(*kind).unwrap_or(&0);
                    let mut msg = format!("  {}: {} imported", kind, count);
                    if *skip > 0 {
                        msg.push_str(&format!(", {} skipped", skip));
                    }
                    eprintln!("{}", msg);
                }
            }
            for w in &result.warnings {
                eprintln!("  WARNING: {}", w);
            }
            0
        }
        Err(e) => {
            eprintln!("Error importing: {}", e);
            1
        }
    }
}
