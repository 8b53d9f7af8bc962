//! Snapshots exchanged between the admin side and the client side.
//!
//! Field names serialize in camelCase to match the JSON both front ends
//! already speak.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Summary of the images attached to a property.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageSummary {
    pub image_count: usize,
    pub primary_image: Option<String>,
    pub last_image_update: Option<DateTime<Utc>>,
}

impl ImageSummary {
    /// Derive a summary from a full image list.
    pub fn from_images(images: &[ImageDescriptor]) -> Self {
        let primary_image = images
            .iter()
            .find(|image| image.is_primary)
            .or_else(|| images.first())
            .map(|image| image.url.clone());
        let last_image_update = images.iter().filter_map(|image| image.uploaded_at).max();

        Self {
            image_count: images.len(),
            primary_image,
            last_image_update,
        }
    }
}

/// Versioned snapshot of a property record.
///
/// `version` increases monotonically on the admin side and is the basis of
/// version conflict detection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySyncData {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(flatten)]
    pub images: ImageSummary,
    pub last_modified: DateTime<Utc>,
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
}

impl PropertySyncData {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        version: u64,
        last_modified: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: String::new(),
            images: ImageSummary::default(),
            last_modified,
            version,
            synced_at: None,
            resolved_by: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Compare the record content, ignoring the sync stamps.
    pub fn same_content(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.address == other.address
            && self.images == other.images
            && self.last_modified == other.last_modified
            && self.version == other.version
    }

    /// Build the property view of a client-side record.
    pub fn from_client(data: &ClientPropertyData) -> Self {
        Self {
            id: data.property_id.clone(),
            name: data.name.clone(),
            address: data.address.clone(),
            images: ImageSummary::from_images(&data.images),
            last_modified: data.last_modified,
            version: data.version,
            synced_at: data.synced_at,
            resolved_by: None,
        }
    }
}

/// Property as cached by the client portal, including the full image list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPropertyData {
    pub property_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub images: Vec<ImageDescriptor>,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
}

impl ClientPropertyData {
    /// Client record carrying `property`'s fields and the given image list.
    pub fn from_property(property: &PropertySyncData, images: Vec<ImageDescriptor>) -> Self {
        Self {
            property_id: property.id.clone(),
            name: property.name.clone(),
            address: property.address.clone(),
            images,
            last_modified: property.last_modified,
            version: property.version,
            synced_at: property.synced_at,
        }
    }

    /// Client record with no property fields yet, only images.
    pub fn empty(property_id: impl Into<String>, last_modified: DateTime<Utc>) -> Self {
        Self {
            property_id: property_id.into(),
            name: String::new(),
            address: String::new(),
            images: Vec::new(),
            last_modified,
            version: 0,
            synced_at: None,
        }
    }
}

/// An uploaded image.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDescriptor {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_primary: bool,
}

/// Incident severity. Declaration order is the severity order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
    Emergency,
}

impl Severity {
    /// Critical and emergency incidents take the emergency fast path.
    pub fn is_emergency(self) -> bool {
        self >= Severity::Critical
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
            Severity::Emergency => "emergency",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    #[default]
    Open,
    Acknowledged,
    InProgress,
    Resolved,
}

/// Incident record.
///
/// `id` may be absent on creation, in which case the event id is used.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentSyncData {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub property_id: Option<String>,
    #[serde(rename = "type", default = "default_incident_type")]
    pub incident_type: String,
    pub severity: Severity,
    #[serde(default)]
    pub status: IncidentStatus,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

fn default_incident_type() -> String {
    "unspecified".to_string()
}

impl IncidentSyncData {
    pub fn new(property_id: impl Into<String>, severity: Severity) -> Self {
        Self {
            id: None,
            property_id: Some(property_id.into()),
            incident_type: default_incident_type(),
            severity,
            status: IncidentStatus::Open,
            description: None,
            created_at: None,
            updated_at: None,
            resolved_at: None,
        }
    }
}

/// Health of one subsystem (cameras, AI engine, dispatch, ...).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubsystemHealth {
    pub name: String,
    pub health: f64,
    #[serde(default)]
    pub status: Option<String>,
}

/// Aggregate system health snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemHealthSyncData {
    pub overall_health: f64,
    #[serde(default)]
    pub subsystems: Vec<SubsystemHealth>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraStatusData {
    pub camera_id: String,
    pub status: String,
    #[serde(default)]
    pub property_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiDetectionData {
    pub camera_id: String,
    pub detection_type: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub property_id: Option<String>,
}
