//! Tiered hardware metadata: loading, schema checks and typed views.
//!
//! Metadata comes in three tiers. The vendor tier carries conventions shared
//! by every family of one silicon vendor, the family tier carries the
//! register/memory/peripheral description of one MCU line, and the optional
//! peripheral tier carries overrides for a single peripheral kind. Tiers are
//! merged by the resolver with most-specific-wins precedence.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::{Error as DeError, Unexpected, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

use crate::config::RegisterCase;

pub mod schema;

/// One layer in the configuration inheritance chain.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Tier {
    Vendor,
    Family,
    Peripheral,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Vendor => "vendor",
            Tier::Family => "family",
            Tier::Peripheral => "peripheral",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Malformed or non-conforming metadata input. Always carries the offending
/// file and, for structural violations, the dotted path of the field, so the
/// metadata can be fixed without reading generator source.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("{}: {source}", file.display())]
    Read {
        file: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: invalid JSON: {source}", file.display())]
    Parse {
        file: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{}: `{path}`: expected {expected}, found {found}", file.display())]
    Mismatch {
        file: PathBuf,
        path: String,
        expected: &'static str,
        found: String,
    },
    #[error("{}: `{path}`: missing required {expected} field", file.display())]
    Missing {
        file: PathBuf,
        path: String,
        expected: &'static str,
    },
}

/// A parsed, schema-checked metadata document. The document is kept as raw
/// JSON so the resolver can fold tiers field-by-field before giving the
/// merged result a typed shape.
#[derive(Clone, Debug)]
pub struct RawMetadata {
    pub tier: Tier,
    pub path: PathBuf,
    pub document: Value,
}

/// Parse `path` and validate it against `tier`'s schema.
pub fn load(path: &Path, tier: Tier) -> Result<RawMetadata, SchemaError> {
    let text = fs::read_to_string(path).map_err(|source| SchemaError::Read {
        file: path.to_path_buf(),
        source,
    })?;
    let document: Value = serde_json::from_str(&text).map_err(|source| SchemaError::Parse {
        file: path.to_path_buf(),
        source,
    })?;
    schema::check(tier, &document, path)?;
    Ok(RawMetadata {
        tier,
        path: path.to_path_buf(),
        document,
    })
}

/// Every metadata document found under one metadata root, indexed by the
/// names the documents declare for themselves.
#[derive(Debug, Default)]
pub struct MetadataSet {
    vendors: BTreeMap<String, RawMetadata>,
    families: BTreeMap<String, RawMetadata>,
    overrides: BTreeMap<(String, String), RawMetadata>,
}

impl MetadataSet {
    /// Load `root/vendors/*.json`, `root/families/*.json` and (optionally)
    /// `root/peripherals/*.json`.
    pub fn load(root: &Path) -> Result<Self, SchemaError> {
        let mut set = MetadataSet::default();

        for raw in load_dir(&root.join("vendors"), Tier::Vendor)? {
            let name = str_key(&raw, "vendor");
            set.vendors.insert(name, raw);
        }
        for raw in load_dir(&root.join("families"), Tier::Family)? {
            let name = str_key(&raw, "family");
            set.families.insert(name, raw);
        }
        let peripherals = root.join("peripherals");
        if peripherals.is_dir() {
            for raw in load_dir(&peripherals, Tier::Peripheral)? {
                let key = (str_key(&raw, "family"), str_key(&raw, "peripheral"));
                set.overrides.insert(key, raw);
            }
        }

        Ok(set)
    }

    pub fn vendor(&self, name: &str) -> Option<&RawMetadata> {
        self.vendors.get(name)
    }

    pub fn family(&self, name: &str) -> Option<&RawMetadata> {
        self.families.get(name)
    }

    pub fn family_names(&self) -> impl Iterator<Item = &str> {
        self.families.keys().map(|s| s.as_str())
    }

    pub fn peripheral_override(&self, family: &str, kind: &str) -> Option<&RawMetadata> {
        self.overrides
            .get(&(family.to_string(), kind.to_string()))
    }
}

fn load_dir(dir: &Path, tier: Tier) -> Result<Vec<RawMetadata>, SchemaError> {
    let entries = fs::read_dir(dir).map_err(|source| SchemaError::Read {
        file: dir.to_path_buf(),
        source,
    })?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    paths.sort();
    paths.iter().map(|p| load(p, tier)).collect()
}

fn str_key(raw: &RawMetadata, key: &str) -> String {
    // The schema check guarantees the key exists and is a string.
    raw.document[key].as_str().unwrap_or_default().to_string()
}

/// Parse a `0x`-prefixed hex string, tolerating `_` digit separators.
pub(crate) fn parse_hex(s: &str) -> Option<u64> {
    let t = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    u64::from_str_radix(&t.replace('_', ""), 16).ok()
}

/// Addresses and sizes may be written either as JSON integers or as
/// `"0x..."` strings; reference manuals use hex, so the fixtures do too.
pub(crate) fn de_hex<'de, D>(d: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    struct HexVisitor;

    impl<'de> Visitor<'de> for HexVisitor {
        type Value = u64;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an unsigned integer or a 0x-prefixed hex string")
        }

        fn visit_u64<E: DeError>(self, v: u64) -> Result<u64, E> {
            Ok(v)
        }

        fn visit_i64<E: DeError>(self, v: i64) -> Result<u64, E> {
            u64::try_from(v).map_err(|_| E::invalid_value(Unexpected::Signed(v), &self))
        }

        fn visit_str<E: DeError>(self, s: &str) -> Result<u64, E> {
            parse_hex(s).ok_or_else(|| E::invalid_value(Unexpected::Str(s), &self))
        }
    }

    d.deserialize_any(HexVisitor)
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    Little,
    Big,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MemoryRegionDecl {
    #[serde(deserialize_with = "de_hex")]
    pub base: u64,
    #[serde(deserialize_with = "de_hex")]
    pub size: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MemoryDecl {
    pub flash: MemoryRegionDecl,
    pub sram: MemoryRegionDecl,
    pub stack_size: u64,
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(default)]
pub struct FeaturesDecl {
    pub fpu: bool,
    pub cache: bool,
    pub mpu: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ClockDecl {
    pub frequency_hz: u64,
    pub max_hz: Option<u64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PinDecl {
    pub pin: String,
    pub signal: String,
    #[serde(default)]
    pub alternate: u8,
}

#[derive(Clone, Debug, Deserialize)]
pub struct InterruptDecl {
    pub name: String,
    pub value: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub lsb: u32,
    pub msb: u32,
}

fn default_register_width() -> u32 {
    32
}

fn default_access() -> String {
    "rw".to_string()
}

#[derive(Clone, Debug, Deserialize)]
pub struct RegisterDecl {
    pub name: String,
    #[serde(deserialize_with = "de_hex")]
    pub offset: u64,
    #[serde(default = "default_register_width")]
    pub width: u32,
    #[serde(default = "default_access")]
    pub access: String,
    #[serde(default, deserialize_with = "de_hex")]
    pub reset: u64,
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RegisterBlockDecl {
    #[serde(deserialize_with = "de_hex")]
    pub size: u64,
    pub registers: Vec<RegisterDecl>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct OperationDecl {
    pub name: String,
    pub register: String,
    pub kind: String,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub divisor: Option<u64>,
    #[serde(default)]
    pub doc: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PeripheralDecl {
    pub name: String,
    pub kind: String,
    #[serde(deserialize_with = "de_hex")]
    pub base_address: u64,
    pub clock_domain: String,
    #[serde(default)]
    pub signals: Vec<String>,
}

/// Typed view of a fully merged (vendor ⊕ family) document. Produced by the
/// resolver; never deserialized from a single tier on its own.
#[derive(Clone, Debug, Deserialize)]
pub struct FamilyView {
    pub family: String,
    pub vendor: String,
    pub architecture: String,
    pub endianness: Endianness,
    pub register_case: RegisterCase,
    #[serde(default)]
    pub families: Vec<String>,
    pub mcus: Vec<String>,
    pub memory: MemoryDecl,
    #[serde(default)]
    pub features: FeaturesDecl,
    pub clocks: BTreeMap<String, ClockDecl>,
    pub peripherals: Vec<PeripheralDecl>,
    pub pins: Vec<PinDecl>,
    #[serde(default)]
    pub interrupts: Vec<InterruptDecl>,
    pub register_blocks: BTreeMap<String, RegisterBlockDecl>,
    #[serde(default)]
    pub operations: BTreeMap<String, Vec<OperationDecl>>,
}

/// Typed view of a peripheral-tier override document.
#[derive(Clone, Debug, Deserialize)]
pub struct PeripheralView {
    pub family: String,
    pub peripheral: String,
    #[serde(default, deserialize_with = "de_hex_opt")]
    pub size: Option<u64>,
    #[serde(default)]
    pub registers: Option<Vec<RegisterDecl>>,
    #[serde(default)]
    pub operations: Option<Vec<OperationDecl>>,
}

fn de_hex_opt<'de, D>(d: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    de_hex(d).map(Some)
}
