//! Credential reconciliation against the external badge catalog.
//!
//! `sync_catalog` mirrors the issuer's full badge list into the local store,
//! upserting by external entity id in one all-or-nothing batch. Field values
//! arrive as strings and are opportunistically reparsed as timestamps; a
//! value that parses as neither accepted date layout stays a plain string,
//! so format drift in the external API never fails the sync.
//!
//! `add_assertion` attaches an issued-credential record to a tracker entry,
//! refreshing the catalog once if the referenced badge is unknown locally.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use proctor_core::{
    Assertion, Badge, BadgeField, EntityKind, EntryId, NewAssertion, TrackerError,
};

use crate::repository::EntityRepository;

/// Catalog record key carrying the external entity id.
const FIELD_ENTITY_ID: &str = "entityId";
/// Catalog record key carrying the badge name.
const FIELD_NAME: &str = "name";
/// Assertion payload key referencing the badge definition.
const FIELD_BADGE_CLASS: &str = "badgeclass";

/// Client for the external badge issuer.
///
/// Returns the full catalog as key-value string maps; each record carries at
/// least `name` and `entityId`. The HTTP plumbing lives outside this crate.
#[async_trait]
pub trait BadgeCatalogClient: Send + Sync {
    async fn fetch_catalog(&self) -> anyhow::Result<Vec<BTreeMap<String, String>>>;
}

/// Maps a raw assertion payload plus the resolved badge name into the
/// stored assertion field set. The exact mapping is issuer-specific.
pub trait AssertionWrangler: Send + Sync {
    fn wrangle(
        &self,
        payload: &AssertionPayload,
        badge_name: &str,
    ) -> anyhow::Result<BTreeMap<String, String>>;
}

/// Raw issued-credential payload as delivered by the external issuer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssertionPayload(pub serde_json::Map<String, serde_json::Value>);

impl AssertionPayload {
    /// The external badge-class id this assertion refers to.
    pub fn badge_class(&self) -> Option<&str> {
        self.0.get(FIELD_BADGE_CLASS).and_then(|v| v.as_str())
    }
}

/// Mirror the external badge catalog into the local store.
///
/// The whole batch is upserted within a single transaction; a failure
/// part-way rolls everything back, so partial catalog updates are never
/// persisted. Returns the number of records mirrored.
pub async fn sync_catalog(
    repo: &dyn EntityRepository,
    client: &dyn BadgeCatalogClient,
) -> Result<usize, TrackerError> {
    let records = client
        .fetch_catalog()
        .await
        .map_err(|e| TrackerError::ExternalSync(format!("badge catalog fetch: {e:#}")))?;

    let mut badges = Vec::with_capacity(records.len());
    for record in records {
        let entity_id = record.get(FIELD_ENTITY_ID).cloned().ok_or_else(|| {
            TrackerError::ExternalSync(format!("catalog record missing '{FIELD_ENTITY_ID}'"))
        })?;
        let name = record.get(FIELD_NAME).cloned().ok_or_else(|| {
            TrackerError::ExternalSync(format!(
                "catalog record {entity_id} missing '{FIELD_NAME}'"
            ))
        })?;

        let fields = record
            .iter()
            .map(|(key, value)| (key.clone(), BadgeField::coerce(value)))
            .collect();

        badges.push(Badge {
            entity_id,
            name,
            fields,
        });
    }

    let count = badges.len();
    repo.upsert_badges(badges).await?;

    info!(count, "badge catalog synchronised");
    Ok(count)
}

/// Attach an issued-credential record to a tracker entry.
///
/// If the referenced badge is unknown locally, the catalog is refreshed once
/// before giving up with `BadgeNotFound`.
pub async fn add_assertion(
    repo: &dyn EntityRepository,
    client: &dyn BadgeCatalogClient,
    wrangler: &dyn AssertionWrangler,
    entry_id: EntryId,
    payload: &AssertionPayload,
) -> Result<Assertion, TrackerError> {
    let Some(entry) = repo.tracker_entry_by_id(entry_id).await? else {
        return Err(TrackerError::not_found(
            EntityKind::TrackerEntry,
            entry_id.to_string(),
        ));
    };

    let badge_class = payload.badge_class().ok_or_else(|| {
        TrackerError::ExternalSync(format!("assertion payload missing '{FIELD_BADGE_CLASS}'"))
    })?;

    let badge = match repo.badge_by_entity_id(badge_class).await? {
        Some(badge) => badge,
        None => {
            warn!(badge_class, "badge unknown locally, refreshing catalog");
            sync_catalog(repo, client).await?;
            repo.badge_by_entity_id(badge_class)
                .await?
                .ok_or_else(|| TrackerError::BadgeNotFound {
                    entity_id: badge_class.to_string(),
                })?
        }
    };

    let fields = wrangler
        .wrangle(payload, &badge.name)
        .map_err(|e| TrackerError::ExternalSync(format!("assertion wrangling: {e:#}")))?;

    let assertion = repo
        .insert_assertion(NewAssertion {
            assessment_tracker_id: entry.id,
            badge_name: badge.name.clone(),
            fields,
        })
        .await?;

    info!(
        entry_id = %entry.id,
        badge = %badge.name,
        "assertion recorded"
    );
    Ok(assertion)
}
