//! Conflict detection and resolution between the admin and client sides.
//!
//! Resolution rules:
//!
//! * If only one side has data, that side wins ([`ResolvedBy::SoleSource`]).
//! * Under [`ResolutionStrategy::AdminWins`] the admin snapshot always wins.
//! * Under [`ResolutionStrategy::TimestampWins`] the admin snapshot wins when
//!   the change came from the admin side or the admin `lastModified` is at
//!   least the client's ([`ResolvedBy::AdminPriority`]); otherwise the newer
//!   client snapshot wins ([`ResolvedBy::TimestampPriority`]).
//!
//! The winner is stamped with `syncedAt` and `resolvedBy` before the service
//! writes it back to both sides.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{event::EventSource, model::PropertySyncData};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// The stored version is ahead of the incoming write.
    VersionConflict,
    /// Same version, different content.
    DataDivergence,
}

/// How a conflict is to be resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    AdminWins,
    TimestampWins,
}

/// Which rule picked the winner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedBy {
    AdminPriority,
    TimestampPriority,
    SoleSource,
}

impl ResolvedBy {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolvedBy::AdminPriority => "admin_priority",
            ResolvedBy::TimestampPriority => "timestamp_priority",
            ResolvedBy::SoleSource => "sole_source",
        }
    }
}

impl fmt::Display for ResolvedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of resolving a conflict.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub winner: EventSource,
    pub resolved_by: ResolvedBy,
    /// Winning snapshot, stamped with `syncedAt` and `resolvedBy`.
    pub data: PropertySyncData,
}

/// Two disagreeing snapshots of the same property.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    pub id: String,
    #[serde(rename = "type")]
    pub conflict_type: ConflictType,
    pub property_id: String,
    /// Side whose change triggered the comparison.
    pub source: EventSource,
    pub admin_data: Option<PropertySyncData>,
    pub client_data: Option<PropertySyncData>,
    pub detected_at: DateTime<Utc>,
    pub resolution_strategy: ResolutionStrategy,
    /// Filled in by the service once the conflict has been resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
}

impl SyncConflict {
    /// Stored admin snapshot ahead of an incoming write.
    pub fn version_conflict(
        stored: PropertySyncData,
        incoming: PropertySyncData,
        source: EventSource,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conflict_type: ConflictType::VersionConflict,
            property_id: stored.id.clone(),
            source,
            admin_data: Some(stored),
            client_data: Some(incoming),
            detected_at,
            resolution_strategy: ResolutionStrategy::AdminWins,
            resolution: None,
        }
    }

    /// Compare both sides of a property and report a conflict if they differ.
    ///
    /// Returns `None` when either side is missing or both carry the same
    /// content.
    pub fn detect(
        admin: &PropertySyncData,
        client: &PropertySyncData,
        source: EventSource,
        detected_at: DateTime<Utc>,
    ) -> Option<Self> {
        if admin.same_content(client) {
            return None;
        }
        let conflict_type = if admin.version == client.version {
            ConflictType::DataDivergence
        } else {
            ConflictType::VersionConflict
        };
        Some(Self {
            id: uuid::Uuid::new_v4().to_string(),
            conflict_type,
            property_id: admin.id.clone(),
            source,
            admin_data: Some(admin.clone()),
            client_data: Some(client.clone()),
            detected_at,
            resolution_strategy: ResolutionStrategy::TimestampWins,
            resolution: None,
        })
    }

    /// Resolve using this conflict's own strategy.
    pub fn resolve(&self, now: DateTime<Utc>) -> Option<Resolution> {
        resolve(
            self.admin_data.as_ref(),
            self.client_data.as_ref(),
            self.source,
            self.resolution_strategy,
            now,
        )
    }
}

/// Pick the winning snapshot. Returns `None` only when both sides are absent.
pub fn resolve(
    admin: Option<&PropertySyncData>,
    client: Option<&PropertySyncData>,
    source: EventSource,
    strategy: ResolutionStrategy,
    now: DateTime<Utc>,
) -> Option<Resolution> {
    let (winner, resolved_by, data) = match (admin, client) {
        (None, None) => return None,
        (Some(admin), None) => (EventSource::Admin, ResolvedBy::SoleSource, admin),
        (None, Some(client)) => (EventSource::Client, ResolvedBy::SoleSource, client),
        (Some(admin), Some(client)) => {
            let admin_first = match strategy {
                ResolutionStrategy::AdminWins => true,
                ResolutionStrategy::TimestampWins => {
                    source == EventSource::Admin || admin.last_modified >= client.last_modified
                }
            };
            if admin_first {
                (EventSource::Admin, ResolvedBy::AdminPriority, admin)
            } else {
                (EventSource::Client, ResolvedBy::TimestampPriority, client)
            }
        }
    };

    let mut data = data.clone();
    data.synced_at = Some(now);
    data.resolved_by = Some(resolved_by.as_str().to_string());

    Some(Resolution {
        winner,
        resolved_by,
        data,
    })
}
