//! Key catalog
//!
//! Descriptor table of the keys the application knows about, parsed from
//! `docs/key-catalog.csv`. The catalog resolves textual key specs typed at the
//! console and turns user input into wire values of the right kind. Enum value
//! types declare their labels through [`EnumChoices`] so forms can list and
//! parse them without any runtime introspection.

use crate::key::KeyId;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;
use tracing::info;

/// Value kind carried by a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    String,
    Enum,
    Action,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::Enum => "enum",
            ValueKind::Action => "action",
        };
        f.write_str(name)
    }
}

/// What callers may do with a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Access {
    #[serde(rename = "r")]
    Read,
    #[serde(rename = "rw")]
    ReadWrite,
    #[serde(rename = "x")]
    Action,
}

impl Access {
    pub fn is_writable(self) -> bool {
        self == Access::ReadWrite
    }
}

/// One catalog row
#[derive(Debug, Clone, Deserialize)]
pub struct KeyDescriptor {
    pub domain: String,
    pub parameter: String,
    pub kind: ValueKind,
    pub access: Access,
    pub indexed: bool,
    #[serde(default)]
    pub default: String,
    #[serde(default)]
    pub choices: String,
    #[serde(default)]
    pub description: String,
}

impl KeyDescriptor {
    /// `Domain.Parameter`
    pub fn name(&self) -> String {
        format!("{}.{}", self.domain, self.parameter)
    }

    /// Enum labels, in declaration order
    pub fn choices(&self) -> Vec<&str> {
        if self.choices.is_empty() {
            return Vec::new();
        }
        self.choices.split('|').map(str::trim).collect()
    }

    /// Default wire value, if the row declares one
    pub fn default_value(&self) -> Option<Value> {
        if self.default.is_empty() || self.kind == ValueKind::Action {
            return None;
        }
        self.parse_value(&self.default).ok()
    }

    /// Concrete key ids for this descriptor
    ///
    /// Indexed keys expand to sub-indices `0..instances`.
    pub fn key_ids(&self, instances: u32) -> Vec<KeyId> {
        if self.indexed {
            (0..instances)
                .map(|i| KeyId::indexed(self.domain.clone(), self.parameter.clone(), i))
                .collect()
        } else {
            vec![KeyId::new(self.domain.clone(), self.parameter.clone())]
        }
    }

    /// Parse user text into a wire value of this key's kind
    pub fn parse_value(&self, text: &str) -> Result<Value> {
        let text = text.trim();
        match self.kind {
            ValueKind::Bool => match text.to_ascii_lowercase().as_str() {
                "true" | "on" | "yes" | "1" => Ok(Value::Bool(true)),
                "false" | "off" | "no" | "0" => Ok(Value::Bool(false)),
                _ => anyhow::bail!("Expected a boolean for {}, got: {}", self.name(), text),
            },
            ValueKind::Int => {
                let n = text
                    .parse::<i64>()
                    .with_context(|| format!("Expected an integer for {}, got: {}", self.name(), text))?;
                Ok(Value::from(n))
            }
            ValueKind::Float => {
                let n = text
                    .parse::<f64>()
                    .with_context(|| format!("Expected a number for {}, got: {}", self.name(), text))?;
                serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .with_context(|| format!("Not a finite number: {}", text))
            }
            ValueKind::String => Ok(Value::String(text.to_string())),
            ValueKind::Enum => {
                let label = self
                    .choices()
                    .into_iter()
                    .find(|c| c.eq_ignore_ascii_case(text))
                    .with_context(|| {
                        format!(
                            "Unknown value '{}' for {} (choices: {})",
                            text,
                            self.name(),
                            self.choices().join(", ")
                        )
                    })?;
                Ok(Value::String(label.to_string()))
            }
            ValueKind::Action => {
                if text.is_empty() {
                    Ok(Value::Null)
                } else {
                    // Structured arguments are JSON; anything else is a plain string
                    Ok(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
                }
            }
        }
    }

    /// Check that a Rust enum declares exactly this row's choices
    pub fn check_choices<E: EnumChoices>(&self) -> Result<()> {
        let declared = E::labels();
        if declared != self.choices() {
            anyhow::bail!(
                "{} choices {:?} do not match catalog {:?}",
                self.name(),
                declared,
                self.choices()
            );
        }
        Ok(())
    }
}

/// Compile-time choice table for enum-valued keys
pub trait EnumChoices: Copy + PartialEq + 'static {
    const CHOICES: &'static [(Self, &'static str)];

    fn label(self) -> &'static str {
        Self::CHOICES
            .iter()
            .find(|(value, _)| *value == self)
            .map(|(_, label)| *label)
            .unwrap_or("?")
    }

    fn from_label(label: &str) -> Option<Self> {
        Self::CHOICES
            .iter()
            .find(|(_, l)| l.eq_ignore_ascii_case(label))
            .map(|(value, _)| *value)
    }

    fn labels() -> Vec<&'static str> {
        Self::CHOICES.iter().map(|(_, label)| *label).collect()
    }
}

/// Key descriptor table
#[derive(Debug, Clone)]
pub struct KeyCatalog {
    descriptors: Vec<KeyDescriptor>,
    /// Position in `descriptors` by `Domain.Parameter`
    by_name: HashMap<String, usize>,
}

impl KeyCatalog {
    /// Load from CSV text
    pub fn load_from_string(csv_content: &str) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(csv_content.as_bytes());
        let mut descriptors = Vec::new();
        let mut by_name = HashMap::new();

        for (row, result) in reader.deserialize().enumerate() {
            let descriptor: KeyDescriptor =
                result.with_context(|| format!("Failed to parse catalog row {}", row + 1))?;

            if descriptor.kind == ValueKind::Enum && descriptor.choices().is_empty() {
                anyhow::bail!("Enum key {} declares no choices", descriptor.name());
            }
            if !descriptor.default.is_empty() && descriptor.kind != ValueKind::Action {
                descriptor
                    .parse_value(&descriptor.default)
                    .with_context(|| format!("Invalid default for {}", descriptor.name()))?;
            }

            if by_name.insert(descriptor.name(), descriptors.len()).is_some() {
                anyhow::bail!("Duplicate catalog entry: {}", descriptor.name());
            }
            descriptors.push(descriptor);
        }

        info!("Loaded {} key descriptors", descriptors.len());
        Ok(Self {
            descriptors,
            by_name,
        })
    }

    pub fn descriptors(&self) -> &[KeyDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Descriptor for a key, ignoring its index
    pub fn get(&self, key: &KeyId) -> Option<&KeyDescriptor> {
        self.by_name.get(&key.name()).map(|&i| &self.descriptors[i])
    }

    /// Resolve `Domain.Parameter[index]` typed by a user
    pub fn resolve(&self, spec: &str) -> Result<KeyId> {
        let key = KeyId::parse(spec)
            .with_context(|| format!("Malformed key '{}' (expected Domain.Parameter[index])", spec))?;
        let descriptor = self
            .get(&key)
            .with_context(|| format!("Unknown key: {}", key.name()))?;

        match (descriptor.indexed, key.index()) {
            (true, None) => anyhow::bail!("{} needs an index, e.g. {}[0]", key.name(), key.name()),
            (false, Some(_)) => anyhow::bail!("{} is not indexed", key.name()),
            _ => Ok(key),
        }
    }

    /// Parse user text for a key
    pub fn parse_value(&self, key: &KeyId, text: &str) -> Result<Value> {
        let descriptor = self
            .get(key)
            .with_context(|| format!("Unknown key: {}", key.name()))?;
        descriptor.parse_value(text)
    }
}

/// Default embedded catalog
pub const DEFAULT_CSV: &str = include_str!("../docs/key-catalog.csv");

static DEFAULT_CATALOG: OnceLock<KeyCatalog> = OnceLock::new();

/// Load the embedded catalog (cached after first parse)
pub fn load_default_catalog() -> Result<KeyCatalog> {
    if let Some(catalog) = DEFAULT_CATALOG.get() {
        return Ok(catalog.clone());
    }

    let catalog = KeyCatalog::load_from_string(DEFAULT_CSV)?;
    // Ignore error if another thread set it first
    let _ = DEFAULT_CATALOG.set(catalog.clone());
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Units {
        Metric,
        Imperial,
    }

    impl EnumChoices for Units {
        const CHOICES: &'static [(Self, &'static str)] =
            &[(Units::Metric, "Metric"), (Units::Imperial, "Imperial")];
    }

    #[test]
    fn test_load_default_catalog() {
        let catalog = load_default_catalog().unwrap();
        assert!(catalog.len() > 10);

        let height = catalog
            .get(&KeyId::new("FlightController", "HeightLimit"))
            .unwrap();
        assert_eq!(height.kind, ValueKind::Int);
        assert!(height.access.is_writable());
        assert_eq!(height.default_value(), Some(json!(120)));
    }

    #[test]
    fn test_resolve_checks_indexing() {
        let catalog = load_default_catalog().unwrap();

        assert_eq!(
            catalog.resolve("Camera.SDCardState[1]").unwrap(),
            KeyId::indexed("Camera", "SDCardState", 1)
        );
        assert!(catalog.resolve("Camera.SDCardState").is_err());
        assert!(catalog.resolve("FlightController.HeightLimit[0]").is_err());
        assert!(catalog.resolve("Camera.Nope[0]").is_err());
        assert!(catalog.resolve("garbage").is_err());
    }

    #[test]
    fn test_parse_value_by_kind() {
        let catalog = load_default_catalog().unwrap();
        let height = KeyId::new("FlightController", "HeightLimit");
        let flying = KeyId::new("FlightController", "IsFlying");
        let card = KeyId::indexed("Camera", "SDCardState", 0);

        assert_eq!(catalog.parse_value(&height, " 150 ").unwrap(), json!(150));
        assert!(catalog.parse_value(&height, "high").is_err());
        assert_eq!(catalog.parse_value(&flying, "on").unwrap(), json!(true));
        assert_eq!(catalog.parse_value(&card, "full").unwrap(), json!("Full"));
        assert!(catalog.parse_value(&card, "melted").is_err());
    }

    #[test]
    fn test_indexed_defaults_expand() {
        let catalog = load_default_catalog().unwrap();
        let charge = catalog
            .get(&KeyId::indexed("Battery", "ChargeRemaining", 0))
            .unwrap();
        assert_eq!(
            charge.key_ids(2),
            vec![
                KeyId::indexed("Battery", "ChargeRemaining", 0),
                KeyId::indexed("Battery", "ChargeRemaining", 1),
            ]
        );

        let format = catalog
            .get(&KeyId::indexed("Camera", "FormatSDCard", 0))
            .unwrap();
        assert_eq!(format.default_value(), None);
    }

    #[test]
    fn test_enum_choices_match_catalog() {
        let catalog = load_default_catalog().unwrap();
        let units = catalog.get(&KeyId::new("Preferences", "UnitSystem")).unwrap();
        units.check_choices::<Units>().unwrap();

        assert_eq!(Units::Imperial.label(), "Imperial");
        assert_eq!(Units::from_label("metric"), Some(Units::Metric));
        assert_eq!(Units::from_label("furlongs"), None);
    }

    #[test]
    fn test_rejects_duplicates_and_bad_defaults() {
        let dup = "domain,parameter,kind,access,indexed,default,choices,description\n\
                   A,B,int,r,false,1,,\n\
                   A,B,int,r,false,2,,\n";
        assert!(KeyCatalog::load_from_string(dup).is_err());

        let bad = "domain,parameter,kind,access,indexed,default,choices,description\n\
                   A,B,int,r,false,lots,,\n";
        assert!(KeyCatalog::load_from_string(bad).is_err());
    }
}
