use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value, json};
use tracing::warn;

use crate::error::RepairError;
use crate::runtime::{Browser, RepairConfig, Tld};

pub const DEFAULT_VERSION: &str = "3.9.2";
pub const DEFAULT_EDITION: &str = "Premium";
pub const DEFAULT_DB_USER: &str = "root";

/// Descriptive spellings accepted on read, paired with the key actually
/// written. When both are present the written key wins and the other stays
/// an unknown key.
const KEY_ALIASES: [(&str, &str); 3] = [
    ("ds-plugins", "pluginList"),
    ("desktop", "desktopPath"),
    ("documents", "documentsPath"),
];

/// A preference that is normally a string.
///
/// Whatever JSON value was on disk is kept as is, so an untouched document
/// writes back unchanged even when the host application stored a number,
/// a boolean or `null` there.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldValue(Option<Value>);

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self(Some(Value::String(value.into())))
    }

    pub fn raw(value: Value) -> Self {
        Self(Some(value))
    }

    /// The string content; empty for a missing, null or non-string value.
    pub fn as_str(&self) -> &str {
        self.0.as_ref().and_then(Value::as_str).unwrap_or_default()
    }

    pub fn as_value(&self) -> Option<&Value> {
        self.0.as_ref()
    }

    pub fn is_missing(&self) -> bool {
        self.0.is_none()
    }

    fn is_text(&self, value: &str) -> bool {
        matches!(&self.0, Some(Value::String(current)) if current == value)
    }
}

impl PartialEq<str> for FieldValue {
    fn eq(&self, other: &str) -> bool {
        self.is_text(other)
    }
}

impl PartialEq<&str> for FieldValue {
    fn eq(&self, other: &&str) -> bool {
        self.is_text(other)
    }
}

impl PartialEq<String> for FieldValue {
    fn eq(&self, other: &String) -> bool {
        self.is_text(other)
    }
}

impl Serialize for FieldValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match &self.0 {
            Some(value) => value.serialize(serializer),
            None => serializer.serialize_unit(),
        }
    }
}

// Only called for keys that are present, so `null` stays distinct from a
// missing key.
impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Value::deserialize(deserializer).map(Self::raw)
    }
}

/// The host application's preferences file.
///
/// Field order is the serialized key order. Keys this tool does not know
/// about are carried through `extra` untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceDocument {
    #[serde(default, skip_serializing_if = "FieldValue::is_missing")]
    pub version: FieldValue,
    #[serde(default, skip_serializing_if = "FieldValue::is_missing")]
    pub edition: FieldValue,
    #[serde(default, skip_serializing_if = "FieldValue::is_missing")]
    pub web_owner: FieldValue,
    #[serde(default, skip_serializing_if = "FieldValue::is_missing")]
    pub db_user: FieldValue,
    #[serde(default, skip_serializing_if = "FieldValue::is_missing")]
    pub db_pass: FieldValue,
    #[serde(default, skip_serializing_if = "FieldValue::is_missing")]
    pub browser: FieldValue,
    #[serde(default, skip_serializing_if = "FieldValue::is_missing")]
    pub tld: FieldValue,
    #[serde(
        rename = "ds-plugins",
        default,
        skip_serializing_if = "FieldValue::is_missing"
    )]
    pub plugin_list: FieldValue,
    #[serde(
        rename = "desktop",
        default,
        skip_serializing_if = "FieldValue::is_missing"
    )]
    pub desktop_path: FieldValue,
    #[serde(
        rename = "documents",
        default,
        skip_serializing_if = "FieldValue::is_missing"
    )]
    pub documents_path: FieldValue,
    #[serde(default, deserialize_with = "deserialize_sites")]
    pub sites: BTreeMap<String, SiteRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteEntry {
    #[serde(default, skip_serializing_if = "FieldValue::is_missing")]
    pub site_name: FieldValue,
    #[serde(default, skip_serializing_if = "FieldValue::is_missing")]
    pub site_path: FieldValue,
    #[serde(default, skip_serializing_if = "FieldValue::is_missing")]
    pub ip_address: FieldValue,
    #[serde(default, skip_serializing_if = "FieldValue::is_missing")]
    pub db_name: FieldValue,
    #[serde(default, skip_serializing_if = "FieldValue::is_missing")]
    pub db_user: FieldValue,
    #[serde(default, skip_serializing_if = "FieldValue::is_missing")]
    pub db_pass: FieldValue,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One value of the `sites` mapping. Anything that is not an object is
/// kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SiteRecord {
    Entry(SiteEntry),
    Other(Value),
}

impl SiteRecord {
    pub fn entry(&self) -> Option<&SiteEntry> {
        match self {
            Self::Entry(entry) => Some(entry),
            Self::Other(_) => None,
        }
    }
}

/// Values that seed a brand new preferences file.
#[derive(Debug, Clone)]
pub struct DocumentSeed {
    pub browser: Browser,
    pub tld: Tld,
    pub desktop_dir: Option<PathBuf>,
    pub documents_dir: PathBuf,
}

impl DocumentSeed {
    pub fn from_config(config: &RepairConfig, desktop_dir: Option<PathBuf>) -> Self {
        Self {
            browser: config.browser,
            tld: config.tld.clone(),
            desktop_dir,
            documents_dir: config.document_dir.clone(),
        }
    }
}

impl PreferenceDocument {
    pub fn with_defaults(seed: &DocumentSeed) -> Self {
        Self {
            version: FieldValue::text(DEFAULT_VERSION),
            edition: FieldValue::text(DEFAULT_EDITION),
            web_owner: FieldValue::text(""),
            db_user: FieldValue::text(DEFAULT_DB_USER),
            db_pass: FieldValue::text(""),
            browser: FieldValue::text(seed.browser.as_str()),
            tld: FieldValue::text(seed.tld.as_str()),
            plugin_list: FieldValue::raw(json!([])),
            desktop_path: FieldValue::text(
                seed.desktop_dir
                    .as_deref()
                    .map(|path| path.to_string_lossy().to_string())
                    .unwrap_or_default(),
            ),
            documents_path: FieldValue::text(
                crate::runtime::trim_trailing_separators(&seed.documents_dir)
                    .to_string_lossy(),
            ),
            sites: BTreeMap::new(),
            extra: Map::new(),
        }
    }

    /// Parses a preferences file. Fails only when `content` is not a JSON
    /// object; every value inside it is accepted.
    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        let mut object: Map<String, Value> = serde_json::from_str(content)?;
        for (key, alias) in KEY_ALIASES {
            if !object.contains_key(key)
                && let Some(value) = object.remove(alias)
            {
                object.insert(key.to_string(), value);
            }
        }
        serde_json::from_value(Value::Object(object))
    }

    pub fn to_pretty_json(&self) -> Result<String> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut serializer)
            .context("failed to serialize preferences")?;
        String::from_utf8(out).context("serialized preferences are not UTF-8")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
    Kept,
}

/// Loaded preferences plus the bookkeeping needed to write them back only
/// when something changed.
#[derive(Debug)]
pub struct PreferencesStore {
    path: PathBuf,
    document: PreferenceDocument,
    dirty: bool,
    created: bool,
}

impl PreferencesStore {
    /// Load the preferences file at `path`. A missing file is replaced by a
    /// default document which is written to disk before returning.
    pub fn load_or_create(path: &Path, seed: &DocumentSeed) -> Result<Self> {
        if !path.exists() {
            let store = Self {
                path: path.to_path_buf(),
                document: PreferenceDocument::with_defaults(seed),
                dirty: false,
                created: true,
            };
            store.save()?;
            return Ok(store);
        }

        let content = fs::read_to_string(path).map_err(|source| RepairError::PreferencesUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let document = PreferenceDocument::from_json(&content).map_err(|source| {
            RepairError::PreferencesInvalid {
                path: path.to_path_buf(),
                source,
            }
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            document,
            dirty: false,
            created: false,
        })
    }

    pub fn document(&self) -> &PreferenceDocument {
        &self.document
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether this run created the file.
    pub fn was_created(&self) -> bool {
        self.created
    }

    /// The stored entry for `name`, if it is an object.
    pub fn site(&self, name: &str) -> Option<&SiteEntry> {
        self.document.sites.get(name).and_then(SiteRecord::entry)
    }

    /// Returns `true` when the stored browser changed.
    pub fn set_browser(&mut self, browser: Browser) -> bool {
        self.set_field(|document| &mut document.browser, browser.as_str())
    }

    /// Returns `true` when the stored top-level domain changed.
    pub fn set_tld(&mut self, tld: &Tld) -> bool {
        self.set_field(|document| &mut document.tld, tld.as_str())
    }

    /// Inserts `entry` under its site name. An existing entry is only
    /// replaced when `force` is set; a forced replacement always counts as a
    /// change.
    pub fn upsert_site(&mut self, entry: SiteEntry, force: bool) -> UpsertOutcome {
        let name = entry.site_name.as_str().to_string();
        let exists = self.document.sites.contains_key(&name);
        if exists && !force {
            return UpsertOutcome::Kept;
        }
        self.document.sites.insert(name, SiteRecord::Entry(entry));
        self.dirty = true;
        if exists {
            UpsertOutcome::Replaced
        } else {
            UpsertOutcome::Inserted
        }
    }

    pub fn save(&self) -> Result<()> {
        let rendered = self.document.to_pretty_json()?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| self.unwritable(source))?;
        }
        fs::write(&self.path, rendered).map_err(|source| self.unwritable(source))?;
        Ok(())
    }

    /// Writes the document if any mutation changed it. Returns `true` when a
    /// write occurred.
    pub fn save_if_dirty(&mut self) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        self.save()?;
        self.dirty = false;
        Ok(true)
    }

    fn set_field<F>(&mut self, field: F, value: &str) -> bool
    where
        F: FnOnce(&mut PreferenceDocument) -> &mut FieldValue,
    {
        let slot = field(&mut self.document);
        if slot.is_text(value) {
            return false;
        }
        *slot = FieldValue::text(value);
        self.dirty = true;
        true
    }

    fn unwritable(&self, source: io::Error) -> RepairError {
        RepairError::PreferencesUnwritable {
            path: self.path.clone(),
            source,
        }
    }
}

// PHP's json_encode writes an empty associative array as `[]`, and a list
// of entries when the keys happen to be sequential.
fn deserialize_sites<'de, D>(deserializer: D) -> Result<BTreeMap<String, SiteRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Sites {
        Map(BTreeMap<String, SiteRecord>),
        List(Vec<SiteRecord>),
        Null(()),
        Other(Value),
    }

    Ok(match Sites::deserialize(deserializer)? {
        Sites::Map(map) => map,
        Sites::List(list) => list
            .into_iter()
            .enumerate()
            .map(|(index, record)| {
                let name = record
                    .entry()
                    .map(|entry| entry.site_name.as_str())
                    .filter(|name| !name.is_empty())
                    .map_or_else(|| index.to_string(), str::to_string);
                (name, record)
            })
            .collect(),
        Sites::Null(()) => BTreeMap::new(),
        Sites::Other(value) => {
            warn!("ignoring malformed sites value: {value}");
            BTreeMap::new()
        }
    })
}
