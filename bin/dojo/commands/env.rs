//! Env command - validate and scaffold `.env` files

use crate::style::*;
use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use dialoguer::{theme::ColorfulTheme, Confirm, Input, Password};
use dojo::envcheck::{self, EnvFile, EnvReport, Profile, CATALOG, DATABASE_PARTS};
use dojo::launcher::Network;
use std::path::PathBuf;

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum ProfileArg {
    MinerCentralised,
    MinerDecentralised,
    Validator,
}

impl From<ProfileArg> for Profile {
    fn from(arg: ProfileArg) -> Self {
        match arg {
            ProfileArg::MinerCentralised => Profile::MinerCentralised,
            ProfileArg::MinerDecentralised => Profile::MinerDecentralised,
            ProfileArg::Validator => Profile::Validator,
        }
    }
}

/// Table of every variable the profile uses. Values are never shown.
pub fn print_report(report: &EnvReport) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Variable").fg(Color::Cyan),
            Cell::new("Status").fg(Color::Cyan),
            Cell::new("Detail").fg(Color::Cyan),
        ]);

    for spec in CATALOG.iter().filter(|s| s.used_by.contains(&report.profile)) {
        let invalid = report.invalid.iter().find(|i| i.name == spec.name);
        let (status, color, detail) = if report.missing.iter().any(|m| m == spec.name) {
            ("missing", Color::Red, spec.description.to_string())
        } else if report.empty.iter().any(|m| m == spec.name) {
            ("empty", Color::Red, spec.description.to_string())
        } else if let Some(invalid) = invalid {
            ("invalid", Color::Yellow, invalid.reason.clone())
        } else {
            ("ok", Color::Green, String::new())
        };
        table.add_row(vec![
            Cell::new(spec.name),
            Cell::new(status).fg(color),
            Cell::new(detail),
        ]);
    }

    print_section(&format!("Environment for {}", report.profile));
    println!("{}", table);
    for note in &report.notes {
        print_info(note);
    }
    if report.is_ok() {
        print_success(&report.summary());
    } else {
        print_warning(&report.summary());
    }
}

pub fn check(profile: Profile, file: Option<PathBuf>, network: Option<&str>) -> Result<()> {
    print_header("Environment check");

    let network = network
        .map(|n| n.parse::<Network>().map_err(anyhow::Error::msg))
        .transpose()?;
    let path = file.unwrap_or_else(|| PathBuf::from(profile.env_file()));
    let env = EnvFile::load(&path).with_context(|| format!("Failed to read {}", path.display()))?;

    print_key_value("File", &path.display().to_string());
    if let Some(network) = network {
        print_key_value("Network", network.as_str());
    }

    let report = envcheck::check(profile, &env, network);
    print_report(&report);

    if !report.is_ok() {
        bail!("{} problem(s) in {}", report.problem_count(), path.display());
    }
    Ok(())
}

fn prompt_values(profile: Profile) -> Result<Vec<(&'static str, String)>> {
    let theme = ColorfulTheme::default();
    let mut values = Vec::new();

    // the DB_* parts are only required as a group, so ask for them too
    for spec in CATALOG.iter().filter(|s| {
        s.required.contains(&profile)
            || (DATABASE_PARTS.contains(&s.name) && s.used_by.contains(&profile))
    }) {
        println!("  {}", style_dim(spec.description));
        let value: String = if spec.secret {
            Password::with_theme(&theme)
                .with_prompt(format!("  {}", spec.name))
                .allow_empty_password(true)
                .interact()?
        } else {
            let mut input = Input::<String>::with_theme(&theme)
                .with_prompt(format!("  {}", spec.name))
                .allow_empty(true);
            if let Some(default) = spec.default {
                input = input.default(default.to_string());
            }
            input.interact_text()?
        };
        values.push((spec.name, value));
    }

    Ok(values)
}

/// Replace `NAME=` lines of a template with the given values
fn fill_template(template: &str, values: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    for line in template.lines() {
        let filled = values
            .iter()
            .find(|(name, _)| line.split_once('=').map(|(k, _)| k) == Some(*name))
            .map(|(name, value)| format!("{}={}", name, value));
        out.push_str(filled.as_deref().unwrap_or(line));
        out.push('\n');
    }
    out
}

pub fn init(profile: Profile, output: Option<PathBuf>, interactive: bool, force: bool) -> Result<()> {
    print_header("Environment template");

    let path = output.unwrap_or_else(|| PathBuf::from(profile.env_file()));
    if path.exists() && !force {
        let overwrite = interactive
            && Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt(format!("  {} exists. Overwrite?", path.display()))
                .default(false)
                .interact()?;
        if !overwrite {
            bail!("{} already exists (use --force to overwrite)", path.display());
        }
    }

    let template = envcheck::render_template(profile);
    let content = if interactive {
        fill_template(&template, &prompt_values(profile)?)
    } else {
        template
    };

    std::fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    print_success(&format!("Wrote {} template to {}", profile, style_cyan(&path.display().to_string())));

    if !interactive {
        print_info(&format!(
            "Fill in the blank values, then run `dojo env check {}`",
            match profile {
                Profile::MinerCentralised => "miner-centralised",
                Profile::MinerDecentralised => "miner-decentralised",
                Profile::Validator => "validator",
            }
        ));
    }
    Ok(())
}
