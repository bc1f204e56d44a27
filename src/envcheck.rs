//! Operator Environment Surface
//!
//! Every miner and validator service is configured through a flat `.env`
//! file. This module knows which variables each deployment profile needs,
//! loads env files, checks them before a launch and renders templates.
//!
//! Secret values never leave this module: reports and `Debug` output only
//! name variables.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::WANDB_PROJECTS;
use crate::error::{DojoError, Result};
use crate::launcher::Network;

/// Deployment profile a `.env` file is written for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Profile {
    MinerCentralised,
    MinerDecentralised,
    Validator,
}

impl Profile {
    pub const ALL: [Profile; 3] = [
        Profile::MinerCentralised,
        Profile::MinerDecentralised,
        Profile::Validator,
    ];

    /// Env file the compose services of this profile read
    pub fn env_file(&self) -> &'static str {
        match self {
            Profile::MinerCentralised | Profile::MinerDecentralised => ".env",
            Profile::Validator => ".env.validator",
        }
    }

    fn uses_database(&self) -> bool {
        matches!(self, Profile::MinerDecentralised | Profile::Validator)
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Profile::MinerCentralised => f.write_str("miner (centralised)"),
            Profile::MinerDecentralised => f.write_str("miner (decentralised)"),
            Profile::Validator => f.write_str("validator"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Category {
    Wallet,
    Miner,
    Infrastructure,
    Validator,
}

impl Category {
    fn title(&self) -> &'static str {
        match self {
            Category::Wallet => "Bittensor wallet",
            Category::Miner => "Miner network settings",
            Category::Infrastructure => "Worker API infrastructure",
            Category::Validator => "Validator services",
        }
    }
}

/// Shape a value must have
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Port,
    Url,
    Count,
    WandbProject,
}

#[derive(Debug, Clone, Copy)]
pub struct EnvSpec {
    pub name: &'static str,
    pub category: Category,
    /// Profiles that fail the preflight without this variable
    pub required: &'static [Profile],
    /// Profiles whose template lists this variable
    pub used_by: &'static [Profile],
    pub secret: bool,
    pub default: Option<&'static str>,
    pub kind: ValueKind,
    pub description: &'static str,
}

const MINERS: &[Profile] = &[Profile::MinerCentralised, Profile::MinerDecentralised];
const ALL: &[Profile] = &Profile::ALL;
const DECENTRALISED: &[Profile] = &[Profile::MinerDecentralised];
const VALIDATOR: &[Profile] = &[Profile::Validator];
const DATABASE_USERS: &[Profile] = &[Profile::MinerDecentralised, Profile::Validator];
const NONE: &[Profile] = &[];

/// Components of a database connection, alternative to `DATABASE_URL`
pub const DATABASE_PARTS: [&str; 4] = ["DB_HOST", "DB_NAME", "DB_USERNAME", "DB_PASSWORD"];

macro_rules! spec {
    ($name:literal, $cat:ident, $req:expr, $used:expr, $secret:literal, $default:expr, $kind:ident, $desc:literal) => {
        EnvSpec {
            name: $name,
            category: Category::$cat,
            required: $req,
            used_by: $used,
            secret: $secret,
            default: $default,
            kind: ValueKind::$kind,
            description: $desc,
        }
    };
}

pub const CATALOG: &[EnvSpec] = &[
    // Wallet
    spec!("BITTENSOR_DIR", Wallet, ALL, ALL, false, Some("$HOME/.bittensor"), Text,
        "Directory holding the bittensor wallets"),
    spec!("WALLET_COLDKEY", Wallet, ALL, ALL, false, None, Text, "Coldkey wallet name"),
    spec!("WALLET_HOTKEY", Wallet, ALL, ALL, false, None, Text, "Hotkey name under the coldkey"),
    // Miner
    spec!("DOJO_API_BASE_URL", Miner, MINERS, MINERS, false, None, Url,
        "Dojo worker API the miner forwards tasks to"),
    spec!("DOJO_API_KEY", Miner, MINERS, MINERS, true, None, Text,
        "API key issued by the Dojo worker API"),
    spec!("AXON_PORT", Miner, MINERS, MINERS, false, Some("8888"), Port,
        "Port the miner axon listens on"),
    spec!("TASK_MAX_RESULTS", Miner, NONE, MINERS, false, Some("1"), Count,
        "Worker results collected per task"),
    // Decentralised worker API infrastructure
    spec!("REDIS_HOST", Infrastructure, DATABASE_USERS, DATABASE_USERS, false, Some("redis"), Text,
        "Redis host"),
    spec!("REDIS_PORT", Infrastructure, DATABASE_USERS, DATABASE_USERS, false, Some("6379"), Port,
        "Redis port"),
    spec!("REDIS_USERNAME", Infrastructure, NONE, DECENTRALISED, false, None, Text,
        "Redis username"),
    spec!("REDIS_PASSWORD", Infrastructure, NONE, DECENTRALISED, true, None, Text,
        "Redis password"),
    spec!("DB_HOST", Infrastructure, NONE, DATABASE_USERS, false, Some("postgres:5432"), Text,
        "Postgres host and port"),
    spec!("DB_NAME", Infrastructure, NONE, DATABASE_USERS, false, Some("db"), Text,
        "Postgres database name"),
    spec!("DB_USERNAME", Infrastructure, NONE, DATABASE_USERS, false, None, Text,
        "Postgres user"),
    spec!("DB_PASSWORD", Infrastructure, NONE, DATABASE_USERS, true, None, Text,
        "Postgres password"),
    spec!("DATABASE_URL", Infrastructure, NONE, DATABASE_USERS, true, None, Url,
        "Full Postgres URL, overrides the DB_* parts"),
    spec!("AWS_ACCESS_KEY_ID", Infrastructure, DECENTRALISED, DECENTRALISED, true, None, Text,
        "S3 access key"),
    spec!("AWS_SECRET_ACCESS_KEY", Infrastructure, DECENTRALISED, DECENTRALISED, true, None, Text,
        "S3 secret key"),
    spec!("AWS_REGION", Infrastructure, DECENTRALISED, DECENTRALISED, false, None, Text,
        "S3 region"),
    spec!("S3_BUCKET_NAME", Infrastructure, DECENTRALISED, DECENTRALISED, false, None, Text,
        "Bucket for task attachments"),
    spec!("S3_PUBLIC_URL", Infrastructure, DECENTRALISED, DECENTRALISED, false, None, Url,
        "Public URL of the bucket"),
    spec!("JWT_SECRET", Infrastructure, DECENTRALISED, DECENTRALISED, true, None, Text,
        "Secret used to sign worker sessions"),
    spec!("ETHEREUM_NODE", Infrastructure, DECENTRALISED, DECENTRALISED, false, None, Url,
        "Ethereum node URL for worker wallet login"),
    // Validator
    spec!("WANDB_API_KEY", Validator, VALIDATOR, VALIDATOR, true, None, Text,
        "Weights & Biases API key"),
    spec!("WANDB_PROJECT_NAME", Validator, VALIDATOR, VALIDATOR, false, Some("dojo-mainnet"), WandbProject,
        "Weights & Biases project (dojo-mainnet or dojo-testnet)"),
    spec!("OPENROUTER_API_KEY", Validator, VALIDATOR, VALIDATOR, true, None, Text,
        "OpenRouter key for synthetic generation"),
    spec!("TOGETHER_API_KEY", Validator, NONE, VALIDATOR, true, None, Text,
        "Together AI key"),
    spec!("OPENAI_API_KEY", Validator, NONE, VALIDATOR, true, None, Text, "OpenAI key"),
    spec!("LANGFUSE_PUBLIC_KEY", Validator, VALIDATOR, VALIDATOR, false, None, Text,
        "Langfuse public key"),
    spec!("LANGFUSE_SECRET_KEY", Validator, VALIDATOR, VALIDATOR, true, None, Text,
        "Langfuse secret key"),
    spec!("LANGFUSE_HOST", Validator, NONE, VALIDATOR, false, Some("https://us.cloud.langfuse.com"), Url,
        "Langfuse host"),
    spec!("SYNTHETIC_API_URL", Validator, VALIDATOR, VALIDATOR, false, Some("http://synthetic-api:5003"), Url,
        "Synthetic QA generation service"),
];

pub fn lookup(name: &str) -> Option<&'static EnvSpec> {
    CATALOG.iter().find(|s| s.name == name)
}

fn is_secret(name: &str) -> bool {
    lookup(name).map(|s| s.secret).unwrap_or(false)
}

// ============================================================================
// ENV FILES
// ============================================================================

/// Key/value pairs from a dotenv file, optionally backed by the process env
#[derive(Clone, Default)]
pub struct EnvFile {
    path: Option<PathBuf>,
    values: BTreeMap<String, String>,
    use_process_env: bool,
}

impl EnvFile {
    /// Parse a dotenv file. Process env values fill in what the file lacks.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let iter = dotenv::from_path_iter(path)
            .map_err(|e| DojoError::Config(format!("Cannot read {}: {}", path.display(), e)))?;

        let mut values = BTreeMap::new();
        for item in iter {
            let (key, value) = item.map_err(|e| {
                DojoError::Config(format!("Malformed line in {}: {}", path.display(), e))
            })?;
            values.insert(key, value);
        }
        debug!("Loaded {} variables from {}", values.len(), path.display());

        Ok(Self {
            path: Some(path.to_path_buf()),
            values,
            use_process_env: true,
        })
    }

    /// In-memory env, no process fallback
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            path: None,
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            use_process_env: false,
        }
    }

    /// Process env only
    pub fn process() -> Self {
        Self {
            use_process_env: true,
            ..Default::default()
        }
    }

    pub fn with_process_env(mut self, enabled: bool) -> Self {
        self.use_process_env = enabled;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, name: &str) -> Option<String> {
        if let Some(value) = self.values.get(name) {
            return Some(value.clone());
        }
        if self.use_process_env {
            return std::env::var(name).ok();
        }
        None
    }

    /// Value if set and not blank
    pub fn non_empty(&self, name: &str) -> Option<String> {
        self.get(name).filter(|v| !v.trim().is_empty())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for EnvFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted: BTreeMap<&str, &str> = self
            .values
            .iter()
            .map(|(k, v)| {
                let shown = if is_secret(k) { "[REDACTED]" } else { v.as_str() };
                (k.as_str(), shown)
            })
            .collect();
        f.debug_struct("EnvFile")
            .field("path", &self.path)
            .field("values", &redacted)
            .field("use_process_env", &self.use_process_env)
            .finish()
    }
}

// ============================================================================
// PREFLIGHT
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct InvalidValue {
    pub name: String,
    pub reason: String,
}

/// Outcome of checking an env against a profile
#[derive(Debug, Clone, Serialize)]
pub struct EnvReport {
    pub profile: Profile,
    /// Required variables that are not set at all
    pub missing: Vec<String>,
    /// Required variables set to an empty value
    pub empty: Vec<String>,
    pub invalid: Vec<InvalidValue>,
    pub notes: Vec<String>,
}

impl EnvReport {
    pub fn is_ok(&self) -> bool {
        self.missing.is_empty() && self.empty.is_empty() && self.invalid.is_empty()
    }

    pub fn problem_count(&self) -> usize {
        self.missing.len() + self.empty.len() + self.invalid.len()
    }

    /// Single-line summary without values
    pub fn summary(&self) -> String {
        if self.is_ok() {
            return format!("{} environment OK", self.profile);
        }
        let mut parts = Vec::new();
        if !self.missing.is_empty() {
            parts.push(format!("missing: {}", self.missing.join(", ")));
        }
        if !self.empty.is_empty() {
            parts.push(format!("empty: {}", self.empty.join(", ")));
        }
        if !self.invalid.is_empty() {
            let names: Vec<&str> = self.invalid.iter().map(|i| i.name.as_str()).collect();
            parts.push(format!("invalid: {}", names.join(", ")));
        }
        format!("{} environment incomplete ({})", self.profile, parts.join("; "))
    }
}

/// Check `env` against everything `profile` needs
pub fn check(profile: Profile, env: &EnvFile, network: Option<Network>) -> EnvReport {
    let mut report = EnvReport {
        profile,
        missing: Vec::new(),
        empty: Vec::new(),
        invalid: Vec::new(),
        notes: Vec::new(),
    };

    for spec in CATALOG.iter().filter(|s| s.used_by.contains(&profile)) {
        let required = spec.required.contains(&profile);
        match env.get(spec.name) {
            None if required => report.missing.push(spec.name.to_string()),
            Some(v) if v.trim().is_empty() && required => report.empty.push(spec.name.to_string()),
            Some(v) if !v.trim().is_empty() => {
                if let Err(reason) = validate_value(spec.kind, v.trim(), network) {
                    report.invalid.push(InvalidValue {
                        name: spec.name.to_string(),
                        reason,
                    });
                }
            }
            _ => {}
        }
    }

    if profile.uses_database() && resolve_database_url(env).is_none() {
        for part in DATABASE_PARTS {
            match env.get(part) {
                None => report.missing.push(part.to_string()),
                Some(v) if v.trim().is_empty() => report.empty.push(part.to_string()),
                _ => {}
            }
        }
        report
            .notes
            .push("Set DATABASE_URL, or all of DB_HOST, DB_NAME, DB_USERNAME, DB_PASSWORD".to_string());
    }

    report
}

fn validate_value(
    kind: ValueKind,
    value: &str,
    network: Option<Network>,
) -> std::result::Result<(), String> {
    match kind {
        ValueKind::Text => Ok(()),
        ValueKind::Port => match value.parse::<u16>() {
            Ok(0) | Err(_) => Err(format!("not a valid port: {}", value)),
            Ok(_) => Ok(()),
        },
        ValueKind::Count => value
            .parse::<u32>()
            .map(|_| ())
            .map_err(|_| format!("not a whole number: {}", value)),
        ValueKind::Url => reqwest::Url::parse(value)
            .map(|_| ())
            .map_err(|e| format!("not a URL ({})", e)),
        ValueKind::WandbProject => {
            if !WANDB_PROJECTS.contains(&value) {
                return Err(format!("must be one of {}", WANDB_PROJECTS.join(", ")));
            }
            match network {
                Some(network) if value != network.wandb_project() => Err(format!(
                    "{} does not match network {}",
                    value, network
                )),
                _ => Ok(()),
            }
        }
    }
}

/// `DATABASE_URL`, or a URL assembled from the `DB_*` parts
pub fn resolve_database_url(env: &EnvFile) -> Option<String> {
    if let Some(url) = env.non_empty("DATABASE_URL") {
        return Some(url);
    }
    let host = env.non_empty("DB_HOST")?;
    let name = env.non_empty("DB_NAME")?;
    let user = env.non_empty("DB_USERNAME")?;
    let password = env.non_empty("DB_PASSWORD")?;

    // Percent-encode credentials
    let mut url = reqwest::Url::parse(&format!("postgresql://{}/", host.trim())).ok()?;
    url.set_username(&user).ok()?;
    url.set_password(Some(&password)).ok()?;
    url.set_path(&name);
    Some(url.to_string())
}

// ============================================================================
// TEMPLATES
// ============================================================================

/// Commented `.env` template for a profile. Secrets are left blank.
pub fn render_template(profile: Profile) -> String {
    let mut out = format!(
        "# Dojo {} environment\n# Save as {} and fill in every blank value.\n",
        profile,
        profile.env_file()
    );

    for category in [
        Category::Wallet,
        Category::Miner,
        Category::Infrastructure,
        Category::Validator,
    ] {
        let specs: Vec<&EnvSpec> = CATALOG
            .iter()
            .filter(|s| s.category == category && s.used_by.contains(&profile))
            .collect();
        if specs.is_empty() {
            continue;
        }

        out.push_str(&format!("\n# --- {} ---\n", category.title()));
        for spec in specs {
            let tag = if spec.required.contains(&profile) {
                "required"
            } else {
                "optional"
            };
            out.push_str(&format!("# {} ({})\n", spec.description, tag));
            let value = if spec.secret { "" } else { spec.default.unwrap_or("") };
            out.push_str(&format!("{}={}\n", spec.name, value));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn complete_centralised() -> EnvFile {
        EnvFile::from_pairs([
            ("BITTENSOR_DIR", "/root/.bittensor"),
            ("WALLET_COLDKEY", "ck"),
            ("WALLET_HOTKEY", "hk"),
            ("DOJO_API_BASE_URL", "https://dojo-api.tensorplex.ai"),
            ("DOJO_API_KEY", "sk-123"),
            ("AXON_PORT", "8888"),
        ])
    }

    #[test]
    fn test_catalog_names_are_unique() {
        let mut names: Vec<&str> = CATALOG.iter().map(|s| s.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), CATALOG.len());
    }

    #[test]
    fn test_required_is_subset_of_used_by() {
        for spec in CATALOG {
            for profile in spec.required {
                assert!(spec.used_by.contains(profile), "{}", spec.name);
            }
        }
    }

    #[test]
    fn test_complete_centralised_env_passes() {
        let report = check(Profile::MinerCentralised, &complete_centralised(), None);
        assert!(report.is_ok(), "{}", report.summary());
    }

    #[test]
    fn test_missing_and_empty_are_reported_separately() {
        let env = EnvFile::from_pairs([
            ("BITTENSOR_DIR", "/root/.bittensor"),
            ("WALLET_COLDKEY", ""),
            ("DOJO_API_BASE_URL", "https://dojo-api.tensorplex.ai"),
            ("DOJO_API_KEY", "sk-123"),
            ("AXON_PORT", "8888"),
        ]);
        let report = check(Profile::MinerCentralised, &env, None);
        assert!(!report.is_ok());
        assert_eq!(report.missing, vec!["WALLET_HOTKEY".to_string()]);
        assert_eq!(report.empty, vec!["WALLET_COLDKEY".to_string()]);
    }

    #[test]
    fn test_invalid_port_and_url() {
        let mut pairs: Vec<(String, String)> = vec![
            ("BITTENSOR_DIR".into(), "/b".into()),
            ("WALLET_COLDKEY".into(), "ck".into()),
            ("WALLET_HOTKEY".into(), "hk".into()),
            ("DOJO_API_KEY".into(), "k".into()),
        ];
        pairs.push(("AXON_PORT".into(), "99999".into()));
        pairs.push(("DOJO_API_BASE_URL".into(), "dojo api".into()));
        let report = check(Profile::MinerCentralised, &EnvFile::from_pairs(pairs), None);
        let names: Vec<&str> = report.invalid.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["DOJO_API_BASE_URL", "AXON_PORT"]);
    }

    #[test]
    fn test_optional_variables_may_be_absent() {
        // TASK_MAX_RESULTS is optional, but validated when present
        let report = check(Profile::MinerCentralised, &complete_centralised(), None);
        assert!(report.is_ok());

        let mut env = complete_centralised();
        env.values.insert("TASK_MAX_RESULTS".into(), "many".into());
        let report = check(Profile::MinerCentralised, &env, None);
        assert_eq!(report.invalid[0].name, "TASK_MAX_RESULTS");
    }

    #[test]
    fn test_database_url_or_parts() {
        let with_url = EnvFile::from_pairs([("DATABASE_URL", "postgresql://u:p@db:5432/dojo")]);
        assert_eq!(
            resolve_database_url(&with_url).as_deref(),
            Some("postgresql://u:p@db:5432/dojo")
        );

        let with_parts = EnvFile::from_pairs([
            ("DB_HOST", "postgres-vali:5432"),
            ("DB_NAME", "db"),
            ("DB_USERNAME", "user"),
            ("DB_PASSWORD", "pw"),
        ]);
        assert_eq!(
            resolve_database_url(&with_parts).as_deref(),
            Some("postgresql://user:pw@postgres-vali:5432/db")
        );

        let partial = EnvFile::from_pairs([("DB_HOST", "postgres:5432")]);
        assert!(resolve_database_url(&partial).is_none());
    }

    #[test]
    fn test_database_url_encodes_credentials() {
        let env = EnvFile::from_pairs([
            ("DB_HOST", "postgres-vali:5432"),
            ("DB_NAME", "db"),
            ("DB_USERNAME", "dojo:admin"),
            ("DB_PASSWORD", "p@ss/w#rd"),
        ]);
        let url = resolve_database_url(&env).unwrap();
        let parsed = reqwest::Url::parse(&url).unwrap();
        assert_eq!(parsed.host_str(), Some("postgres-vali"));
        assert_eq!(parsed.port(), Some(5432));
        assert_eq!(parsed.username(), "dojo%3Aadmin");
        assert_eq!(parsed.password(), Some("p%40ss%2Fw%23rd"));
        assert_eq!(parsed.path(), "/db");
        assert_eq!(parsed.fragment(), None);
    }

    #[test]
    fn test_validator_database_rule() {
        let env = EnvFile::from_pairs([("DB_HOST", "postgres:5432"), ("DB_NAME", "")]);
        let report = check(Profile::Validator, &env, None);
        assert!(report.missing.contains(&"DB_USERNAME".to_string()));
        assert!(report.empty.contains(&"DB_NAME".to_string()));
        assert!(!report.notes.is_empty());

        let env = EnvFile::from_pairs([("DATABASE_URL", "postgresql://u:p@h/db")]);
        let report = check(Profile::Validator, &env, None);
        assert!(!report.missing.iter().any(|m| m.starts_with("DB_")));
    }

    #[test]
    fn test_wandb_project_must_match_network() {
        let env = EnvFile::from_pairs([("WANDB_PROJECT_NAME", "dojo-testnet")]);
        let report = check(Profile::Validator, &env, Some(Network::Mainnet));
        assert!(report.invalid.iter().any(|i| i.name == "WANDB_PROJECT_NAME"));

        let report = check(Profile::Validator, &env, Some(Network::Testnet));
        assert!(!report.invalid.iter().any(|i| i.name == "WANDB_PROJECT_NAME"));
    }

    #[test]
    fn test_load_env_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file, "WALLET_COLDKEY=ck").unwrap();
        writeln!(file, "DOJO_API_KEY=\"secret value\"").unwrap();
        writeln!(file, "AXON_PORT=").unwrap();

        let env = EnvFile::load(file.path()).unwrap().with_process_env(false);
        assert_eq!(env.len(), 3);
        assert_eq!(env.get("WALLET_COLDKEY").as_deref(), Some("ck"));
        assert_eq!(env.get("DOJO_API_KEY").as_deref(), Some("secret value"));
        assert_eq!(env.get("AXON_PORT").as_deref(), Some(""));
        assert!(env.non_empty("AXON_PORT").is_none());
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let err = EnvFile::load("/nonexistent/.env").unwrap_err();
        assert!(matches!(err, DojoError::Config(_)));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let env = EnvFile::from_pairs([("DOJO_API_KEY", "sk-live-123"), ("AXON_PORT", "8888")]);
        let debug = format!("{:?}", env);
        assert!(!debug.contains("sk-live-123"));
        assert!(debug.contains("[REDACTED]"));
        assert!(debug.contains("8888"));
    }

    #[test]
    fn test_template_lists_profile_variables_only() {
        let template = render_template(Profile::MinerCentralised);
        assert!(template.contains("DOJO_API_KEY=\n"));
        assert!(template.contains("AXON_PORT=8888\n"));
        assert!(!template.contains("JWT_SECRET"));
        assert!(!template.contains("WANDB_API_KEY"));

        let template = render_template(Profile::Validator);
        assert!(template.contains("WANDB_PROJECT_NAME=dojo-mainnet\n"));
        assert!(template.contains("DATABASE_URL="));
        assert!(!template.contains("DOJO_API_KEY"));
    }

    #[test]
    fn test_rendered_template_reports_blank_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, render_template(Profile::MinerCentralised)).unwrap();

        let env = EnvFile::load(&path).unwrap().with_process_env(false);
        let report = check(Profile::MinerCentralised, &env, None);
        assert!(report.empty.contains(&"DOJO_API_KEY".to_string()));
        assert!(report.empty.contains(&"WALLET_COLDKEY".to_string()));
    }
}
