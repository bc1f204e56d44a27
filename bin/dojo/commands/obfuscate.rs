//! Obfuscate command - obfuscate a single HTML file

use crate::style::*;
use anyhow::{Context, Result};
use dojo::obfuscation::{default_output_path, process_file};
use std::path::PathBuf;

pub async fn run(input: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let output = output.unwrap_or_else(|| default_output_path(&input));
    let report = process_file(&input, &output)
        .await
        .with_context(|| format!("Failed to obfuscate {}", input.display()))?;

    print_success(&format!("Wrote {}", report.output.display()));
    print_key_value("Original MD5", &report.original_md5);
    print_key_value("Obfuscated MD5", &report.obfuscated_md5);
    Ok(())
}
