use crate::heuristics::{ClassifierDefaults, Insulation, TapChanger};
use serde::Deserialize;
use std::{fs, path::Path};
use toml_edit::{DocumentMut, Item, Table, value};

/// Default config location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = ".config/powtr.toml";

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// CSV attribute list used to build the prompt and resolve index keys.
    #[serde(default)]
    pub attribute_list: Option<String>,
    #[serde(default)]
    pub vision: VisionSection,
    #[serde(default)]
    pub loader: LoaderSection,
    #[serde(default)]
    pub heuristics: HeuristicsSection,
}

fn default_db_path() -> String {
    "nameplates/nameplates.db".to_string()
}

#[derive(Debug, Deserialize)]
pub struct VisionSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Overridden by the `GEMINI_API_KEY` environment variable.
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_temperature() -> f64 {
    0.2
}
fn default_top_p() -> f64 {
    0.8
}
fn default_max_output_tokens() -> u32 {
    4096
}
fn default_timeout_secs() -> u64 {
    120
}

impl Default for VisionSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_output_tokens: default_max_output_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoaderSection {
    /// Used when a row has no usable `Plant`.
    #[serde(default = "default_site_id")]
    pub site_id: String,
}

fn default_site_id() -> String {
    "SBK0".to_string()
}

impl Default for LoaderSection {
    fn default() -> Self {
        Self {
            site_id: default_site_id(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HeuristicsSection {
    /// `O`, `D` or `-`.
    #[serde(default = "default_type")]
    pub default_type: String,
    /// `O`, `F` or `N`.
    #[serde(default = "default_tap")]
    pub default_tap: String,
}

fn default_type() -> String {
    "O".to_string()
}
fn default_tap() -> String {
    "F".to_string()
}

impl Default for HeuristicsSection {
    fn default() -> Self {
        Self {
            default_type: default_type(),
            default_tap: default_tap(),
        }
    }
}

impl HeuristicsSection {
    pub fn classifier_defaults(&self) -> Result<ClassifierDefaults, Box<dyn std::error::Error>> {
        let single = |s: &str, field: &str| -> Result<char, String> {
            let mut chars = s.trim().chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c),
                _ => Err(format!("heuristics.{field} must be a single character, got {s:?}")),
            }
        };
        let t = single(&self.default_type, "default_type")?;
        let tap = single(&self.default_tap, "default_tap")?;
        Ok(ClassifierDefaults {
            insulation: Insulation::from_char(t)
                .ok_or_else(|| format!("heuristics.default_type must be O, D or -, got {t:?}"))?,
            tap: TapChanger::from_char(tap)
                .ok_or_else(|| format!("heuristics.default_tap must be O, F or N, got {tap:?}"))?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            attribute_list: None,
            vision: VisionSection::default(),
            loader: LoaderSection::default(),
            heuristics: HeuristicsSection::default(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load `path`, or fall back to defaults when the file does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write `vision.api_key` in place, keeping the rest of the file as is.
    /// The file and its `[vision]` table are created if missing.
    pub fn update_api_key(
        path: impl AsRef<Path>,
        new_key: &str,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let path = path.as_ref();
        let content = if path.exists() {
            fs::read_to_string(path)?
        } else {
            String::new()
        };
        let mut doc = content.parse::<DocumentMut>()?;

        if !doc.contains_table("vision") {
            doc.insert("vision", Item::Table(Table::new()));
        }
        doc["vision"]["api_key"] = value(new_key);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, doc.to_string())?;
        Ok(())
    }
}
