//! Application configuration for SenseIndex.
//!
//! User config lives at `~/.senseindex/senseindex.toml`. Host crawlers can
//! instead hand over a flat key/value property mapping; both are parsed into
//! the same validated [`FilterConfig`] once at startup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SenseIndexError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "senseindex.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".senseindex";

/// Host property keys.
pub const MATRIX_DIRECTORY_KEY: &str = "matrixDirectory";
pub const FIELDS_TO_DISAMBIGUATE_KEY: &str = "fieldsToDisambiguate";
pub const FIELDS_TO_PREPROCESS_KEY: &str = "filenameAndUrlFieldsToPreprocess";
pub const MAX_VARIANTS_KEY: &str = "maxVariantsPerSentence";

/// Prefix the host crawler's property files put in front of every key.
pub const PROPERTY_PREFIX: &str = "springSenseIndexingFilter.";

/// A configured field name: no whitespace, no commas.
static FIELD_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s,]+$").expect("field name regex"));

// ---------------------------------------------------------------------------
// Config structs (matching senseindex.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Field selection and engine settings.
    #[serde(default)]
    pub filter: FilterSection,

    /// Engine bridge process settings.
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Worker pool settings.
    #[serde(default)]
    pub workers: WorkersConfig,
}

/// `[filter]` section. Field lists are comma-separated, as in host properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSection {
    /// Matrix/model directory handed to the engine factory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix_directory: Option<String>,

    /// Text fields to run through the engine.
    #[serde(default)]
    pub fields_to_disambiguate: String,

    /// URL or filesystem path fields to normalize into phrases.
    #[serde(default)]
    pub filename_and_url_fields_to_preprocess: String,

    /// Upper bound on variants the engine returns per sentence.
    #[serde(default = "default_max_variants")]
    pub max_variants_per_sentence: usize,
}

impl Default for FilterSection {
    fn default() -> Self {
        Self {
            matrix_directory: None,
            fields_to_disambiguate: String::new(),
            filename_and_url_fields_to_preprocess: String::new(),
            max_variants_per_sentence: default_max_variants(),
        }
    }
}

fn default_max_variants() -> usize {
    3
}

/// `[bridge]` section: how to launch the out-of-process engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Executable to spawn, one process per worker.
    #[serde(default = "default_bridge_command")]
    pub command: String,

    /// Arguments placed before `--matrix <dir>`.
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the bridge process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command: default_bridge_command(),
            args: Vec::new(),
            working_dir: None,
        }
    }
}

fn default_bridge_command() -> String {
    "springsense-bridge".into()
}

/// `[workers]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Number of concurrent document workers.
    #[serde(default = "default_worker_count")]
    pub count: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
        }
    }
}

fn default_worker_count() -> usize {
    4
}

// ---------------------------------------------------------------------------
// FieldSet / FieldSelection
// ---------------------------------------------------------------------------

/// An ordered, duplicate-free set of field names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSet(Vec<String>);

impl FieldSet {
    /// Parse a comma-separated list: split, trim, dedupe (first wins).
    ///
    /// A blank list is an empty set. Empty entries between commas and names
    /// containing whitespace are rejected.
    pub fn parse(list: &str) -> Result<Self> {
        let mut names: Vec<String> = Vec::new();
        if list.trim().is_empty() {
            return Ok(Self(names));
        }

        for raw in list.split(',') {
            let name = raw.trim();
            if name.is_empty() {
                return Err(SenseIndexError::validation(format!(
                    "empty field name in list '{list}'"
                )));
            }
            if !FIELD_NAME_RE.is_match(name) {
                return Err(SenseIndexError::validation(format!(
                    "invalid field name '{name}' in list '{list}'"
                )));
            }
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }

        Ok(Self(names))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|n| n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Which fields get normalized and which get disambiguated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSelection {
    pub preprocess: FieldSet,
    pub disambiguate: FieldSet,
}

// ---------------------------------------------------------------------------
// FilterConfig (runtime, validated)
// ---------------------------------------------------------------------------

/// Validated filter configuration, immutable for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterConfig {
    /// Engine matrix directory. Required when any field is disambiguated.
    pub matrix_directory: Option<PathBuf>,
    pub fields: FieldSelection,
    pub max_variants_per_sentence: usize,
}

impl FilterConfig {
    /// Build from the `[filter]` TOML section.
    pub fn from_section(section: &FilterSection) -> Result<Self> {
        let config = Self {
            matrix_directory: section
                .matrix_directory
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            fields: FieldSelection {
                preprocess: FieldSet::parse(&section.filename_and_url_fields_to_preprocess)?,
                disambiguate: FieldSet::parse(&section.fields_to_disambiguate)?,
            },
            max_variants_per_sentence: section.max_variants_per_sentence,
        };
        config.validate()?;
        Ok(config)
    }

    /// Build from a host property mapping.
    ///
    /// Each key is looked up with [`PROPERTY_PREFIX`] first, then bare.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self> {
        let lookup = |key: &str| property(props, key);

        let max_variants_per_sentence = match lookup(MAX_VARIANTS_KEY) {
            Some(raw) => raw.trim().parse::<usize>().map_err(|e| {
                SenseIndexError::validation(format!("{MAX_VARIANTS_KEY} '{raw}': {e}"))
            })?,
            None => default_max_variants(),
        };

        let section = FilterSection {
            matrix_directory: lookup(MATRIX_DIRECTORY_KEY).map(String::from),
            fields_to_disambiguate: lookup(FIELDS_TO_DISAMBIGUATE_KEY)
                .unwrap_or_default()
                .to_string(),
            filename_and_url_fields_to_preprocess: lookup(FIELDS_TO_PREPROCESS_KEY)
                .unwrap_or_default()
                .to_string(),
            max_variants_per_sentence,
        };

        Self::from_section(&section)
    }

    /// Reject configurations that could only fail later, at field-access time.
    pub fn validate(&self) -> Result<()> {
        if self.max_variants_per_sentence == 0 {
            return Err(SenseIndexError::validation(
                "max_variants_per_sentence must be at least 1",
            ));
        }

        if !self.fields.disambiguate.is_empty() && self.matrix_directory.is_none() {
            return Err(SenseIndexError::config(format!(
                "{MATRIX_DIRECTORY_KEY} is required when {FIELDS_TO_DISAMBIGUATE_KEY} is set"
            )));
        }

        Ok(())
    }

    /// Whether any field needs the disambiguation engine.
    pub fn needs_engine(&self) -> bool {
        !self.fields.disambiguate.is_empty()
    }
}

/// Look up `key` with [`PROPERTY_PREFIX`] first, then bare.
fn property<'a>(props: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    props
        .get(&format!("{PROPERTY_PREFIX}{key}"))
        .or_else(|| props.get(key))
        .map(String::as_str)
}

/// Parse a Java-style `.properties` text into a key/value mapping.
///
/// Supports `key=value` and `key: value`, `#`/`!` comment lines, and blank
/// lines. Later keys override earlier ones.
pub fn parse_properties(content: &str) -> HashMap<String, String> {
    let mut props = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let Some(idx) = line.find(['=', ':']) else {
            props.insert(line.to_string(), String::new());
            continue;
        };
        let (key, value) = line.split_at(idx);
        props.insert(key.trim().to_string(), value[1..].trim().to_string());
    }
    props
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.senseindex/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| SenseIndexError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.senseindex/senseindex.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SenseIndexError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        SenseIndexError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Load a host property file and parse it into a [`FilterConfig`].
pub fn load_properties_from(path: &Path) -> Result<FilterConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SenseIndexError::io(path, e))?;
    FilterConfig::from_properties(&parse_properties(&content))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| SenseIndexError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| SenseIndexError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| SenseIndexError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
