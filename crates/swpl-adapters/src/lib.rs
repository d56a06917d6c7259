//! Record sources: fetch one primary resource by id and flatten its
//! cross-references into display names.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::Value as JsonValue;
use swpl_core::{FlatRecord, PersonResource, ReferenceKind, ResolvedReferences, NAME_SEPARATOR};
use swpl_storage::{FetchError, HttpFetcher};
use thiserror::Error;
use tracing::info;

pub const CRATE_NAME: &str = "swpl-adapters";

pub const DEFAULT_PEOPLE_BASE_URL: &str = "https://swapi.dev/api/people";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{url} has no string `{field}` field")]
    MissingDisplayField { url: String, field: &'static str },
}

/// Produces one flat record per primary resource id.
#[async_trait]
pub trait RecordSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    async fn fetch_record(&self, id: u32) -> Result<FlatRecord, AdapterError>;
}

/// Person records from a SWAPI-style `{base_url}/{id}` endpoint.
#[derive(Debug, Clone)]
pub struct PeopleAdapter {
    http: Arc<HttpFetcher>,
    base_url: String,
}

impl PeopleAdapter {
    pub fn new(http: Arc<HttpFetcher>, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    pub fn record_url(&self, id: u32) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), id)
    }
}

#[async_trait]
impl RecordSource for PeopleAdapter {
    fn source_id(&self) -> &'static str {
        "people"
    }

    async fn fetch_record(&self, id: u32) -> Result<FlatRecord, AdapterError> {
        info!(person_id = id, "begin");
        let resource: PersonResource = self.http.fetch_json(&self.record_url(id)).await?;
        let references = resolve_references(&self.http, &resource).await?;
        info!(person_id = id, "end");
        Ok(FlatRecord::assemble(resource, references))
    }
}

/// Resolve every cross-reference field of `resource`. The first failing
/// reference fails the whole record.
pub async fn resolve_references(
    http: &HttpFetcher,
    resource: &PersonResource,
) -> Result<ResolvedReferences, AdapterError> {
    let (films, homeworld, species, starships, vehicles) = futures::try_join!(
        resolve_names(http, ReferenceKind::Films, &resource.films),
        resolve_name(http, ReferenceKind::Homeworld, resource.homeworld.as_deref()),
        resolve_names(http, ReferenceKind::Species, &resource.species),
        resolve_names(http, ReferenceKind::Starships, &resource.starships),
        resolve_names(http, ReferenceKind::Vehicles, &resource.vehicles),
    )?;

    Ok(ResolvedReferences {
        films,
        homeworld,
        species,
        starships,
        vehicles,
    })
}

/// Fetch every URL and join the display names in list order.
pub async fn resolve_names(
    http: &HttpFetcher,
    kind: ReferenceKind,
    urls: &[String],
) -> Result<String, AdapterError> {
    let names = try_join_all(urls.iter().map(|url| fetch_display_name(http, kind, url))).await?;
    Ok(names.join(NAME_SEPARATOR))
}

pub async fn resolve_name(
    http: &HttpFetcher,
    kind: ReferenceKind,
    url: Option<&str>,
) -> Result<String, AdapterError> {
    match url {
        Some(url) => fetch_display_name(http, kind, url).await,
        None => Ok(String::new()),
    }
}

async fn fetch_display_name(
    http: &HttpFetcher,
    kind: ReferenceKind,
    url: &str,
) -> Result<String, AdapterError> {
    let value: JsonValue = http.fetch_json(url).await?;
    display_name(&value, kind).ok_or_else(|| AdapterError::MissingDisplayField {
        url: url.to_string(),
        field: kind.display_field(),
    })
}

pub fn display_name(value: &JsonValue, kind: ReferenceKind) -> Option<String> {
    value
        .get(kind.display_field())
        .and_then(JsonValue::as_str)
        .map(str::to_string)
}
