//! Core data model for the people sync pipeline.

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;

pub const CRATE_NAME: &str = "swpl-core";

/// Target table for persisted people rows.
pub const PEOPLE_TABLE: &str = "people";

/// Non-id columns of [`PEOPLE_TABLE`], in insert order.
pub const PEOPLE_COLUMNS: [&str; 13] = [
    "name",
    "height",
    "birth_year",
    "eye_color",
    "gender",
    "hair_color",
    "mass",
    "skin_color",
    "films",
    "homeworld",
    "species",
    "starships",
    "vehicles",
];

/// Separator used when a reference collection resolves to several names.
pub const NAME_SEPARATOR: &str = ", ";

/// Raw JSON payload of one primary person resource.
///
/// Scalars default to an empty string when absent or `null`; any other
/// non-string scalar is kept as its JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct PersonResource {
    #[serde(default, deserialize_with = "scalar_text")]
    pub name: String,
    #[serde(default, deserialize_with = "scalar_text")]
    pub height: String,
    #[serde(default, deserialize_with = "scalar_text")]
    pub birth_year: String,
    #[serde(default, deserialize_with = "scalar_text")]
    pub eye_color: String,
    #[serde(default, deserialize_with = "scalar_text")]
    pub gender: String,
    #[serde(default, deserialize_with = "scalar_text")]
    pub hair_color: String,
    #[serde(default, deserialize_with = "scalar_text")]
    pub mass: String,
    #[serde(default, deserialize_with = "scalar_text")]
    pub skin_color: String,
    #[serde(default, deserialize_with = "url_list")]
    pub films: Vec<String>,
    #[serde(default, deserialize_with = "optional_url")]
    pub homeworld: Option<String>,
    #[serde(default, deserialize_with = "url_list")]
    pub species: Vec<String>,
    #[serde(default, deserialize_with = "url_list")]
    pub starships: Vec<String>,
    #[serde(default, deserialize_with = "url_list")]
    pub vehicles: Vec<String>,
}

fn scalar_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(JsonValue::Null) => String::new(),
        Some(JsonValue::String(text)) => text,
        Some(other) => other.to_string(),
    })
}

fn url_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

fn optional_url<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let url = Option::<String>::deserialize(deserializer)?;
    Ok(url.filter(|u| !u.trim().is_empty()))
}

/// Cross-reference fields of a person and how each one is displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    Films,
    Homeworld,
    Species,
    Starships,
    Vehicles,
}

impl ReferenceKind {
    /// Field read from the referenced resource to stand in for its URL.
    pub fn display_field(self) -> &'static str {
        match self {
            ReferenceKind::Films => "title",
            _ => "name",
        }
    }
}

/// Display names resolved for every cross-reference field of one person.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedReferences {
    pub films: String,
    pub homeworld: String,
    pub species: String,
    pub starships: String,
    pub vehicles: String,
}

/// Denormalized person row, one-to-one with a persisted `people` row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FlatRecord {
    pub name: String,
    pub height: String,
    pub birth_year: String,
    pub eye_color: String,
    pub gender: String,
    pub hair_color: String,
    pub mass: String,
    pub skin_color: String,
    pub films: String,
    pub homeworld: String,
    pub species: String,
    pub starships: String,
    pub vehicles: String,
}

impl FlatRecord {
    /// Combine the scalars of a raw resource with its resolved references.
    /// Consumes the resource; nothing of it outlives the record.
    pub fn assemble(resource: PersonResource, references: ResolvedReferences) -> Self {
        Self {
            name: resource.name,
            height: resource.height,
            birth_year: resource.birth_year,
            eye_color: resource.eye_color,
            gender: resource.gender,
            hair_color: resource.hair_color,
            mass: resource.mass,
            skin_color: resource.skin_color,
            films: references.films,
            homeworld: references.homeworld,
            species: references.species,
            starships: references.starships,
            vehicles: references.vehicles,
        }
    }

    /// Field values in [`PEOPLE_COLUMNS`] order.
    pub fn column_values(&self) -> [&str; PEOPLE_COLUMNS.len()] {
        [
            &self.name,
            &self.height,
            &self.birth_year,
            &self.eye_color,
            &self.gender,
            &self.hair_color,
            &self.mass,
            &self.skin_color,
            &self.films,
            &self.homeworld,
            &self.species,
            &self.starships,
            &self.vehicles,
        ]
    }
}

/// Records handed to one persistence unit.
pub type Batch = Vec<FlatRecord>;

/// A record after the store has assigned it an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedRow {
    pub id: i64,
    pub record: FlatRecord,
}

/// Inclusive-exclusive range of primary resource ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    pub start: u32,
    pub end: u32,
}

impl IdRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn ids(&self) -> Range<u32> {
        self.start..self.end.max(self.start)
    }
}

impl Default for IdRange {
    fn default() -> Self {
        Self { start: 1, end: 83 }
    }
}

impl fmt::Display for IdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}
