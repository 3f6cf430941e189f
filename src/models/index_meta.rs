use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::conf::IndexConfig;
use crate::naming::PhysicalIndex;

#[derive(Debug, Clone, Serialize)]
pub struct IndexSettings {
    number_of_shards: u32,
    number_of_replicas: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_interval: Option<String>,
}

impl IndexSettings {
    pub fn new(number_of_shards: u32, number_of_replicas: u32) -> Self {
        Self {
            // zero shards is not a thing the cluster accepts
            number_of_shards: number_of_shards.max(1),
            number_of_replicas,
            refresh_interval: None,
        }
    }

    pub fn from_config(config: &IndexConfig) -> Self {
        Self::new(config.get_number_of_shards(), config.get_number_of_replicas())
            .refresh_interval_seconds(config.get_refresh_interval_seconds())
    }

    pub fn refresh_interval_seconds(mut self, seconds: u64) -> Self {
        self.refresh_interval = Some(format!("{seconds}s"));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Keyword,
    Text,
    Integer,
    Long,
    Double,
    Date,
}

impl FieldKind {
    fn type_name(self) -> &'static str {
        match self {
            FieldKind::Keyword => "keyword",
            FieldKind::Text => "text",
            FieldKind::Integer => "integer",
            FieldKind::Long => "long",
            FieldKind::Double => "double",
            FieldKind::Date => "date",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct FieldMapping {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Field mapping built up programmatically, so malformed mappings fail at
/// the call site instead of at the cluster.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Mappings {
    properties: BTreeMap<String, FieldMapping>,
}

impl Mappings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.properties.insert(
            name.into(),
            FieldMapping {
                kind: kind.type_name(),
            },
        );
        self
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// Template document for a rotating index family: pattern `{physical}-*`,
/// alias equal to the physical name.
#[derive(Debug, Serialize)]
pub struct IndexTemplate {
    index_patterns: Vec<String>,
    aliases: BTreeMap<String, Value>,
    settings: IndexSettings,
    mappings: Mappings,
}

impl IndexTemplate {
    pub fn for_index(index: &PhysicalIndex, settings: IndexSettings, mappings: Mappings) -> Self {
        let mut aliases = BTreeMap::new();
        aliases.insert(index.to_string(), Value::Object(Map::new()));
        Self {
            index_patterns: vec![format!("{index}-*")],
            aliases,
            settings,
            mappings,
        }
    }
}
