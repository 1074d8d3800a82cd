//! Folio pretraining entry point.
//!
//! Accepts either flag-style arguments or a single `<file>.json` whose keys
//! are the flag names.

use clap::Parser;
use folio_training::{LoggingConfig, PretrainArgs, json_config_path};
use std::ffi::OsString;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let argv: Vec<OsString> = std::env::args_os().collect();
    let args = match json_config_path(&argv) {
        Some(path) => PretrainArgs::from_json_file(&path)?,
        None => PretrainArgs::parse_from(argv),
    };
    let bundle = args.finalize()?;

    LoggingConfig::for_rank(bundle.training.local_rank)
        .with_level_override(bundle.training.log_level.as_deref())?
        .init()?;

    let results = folio_training::run(&bundle).await?;
    if !results.is_empty() {
        tracing::info!("Finished with {} evaluation metrics", results.len());
    }
    Ok(())
}
