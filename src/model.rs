use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// One attendance record as it travels inside a QR code or manual entry.
///
/// Read with an internal `type` tag. Written only through
/// [`to_wire`](Self::to_wire), which fixes the key order to
/// `{"name","time","type":"member","membershipId"}` or
/// `{"name","time","type":"guest","referrer"}`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AttendancePayload {
    Member {
        name: String,
        time: String,
        #[serde(rename = "membershipId")]
        membership_id: String,
    },
    Guest {
        name: String,
        time: String,
        referrer: String,
    },
}

impl AttendancePayload {
    pub fn name(&self) -> &str {
        match self {
            AttendancePayload::Member { name, .. } | AttendancePayload::Guest { name, .. } => name,
        }
    }

    pub fn kind(&self) -> AttendeeKind {
        match self {
            AttendancePayload::Member { .. } => AttendeeKind::Member,
            AttendancePayload::Guest { .. } => AttendeeKind::Guest,
        }
    }

    /// Canonical wire text, keys in `name, time, type, <detail>` order.
    pub fn to_wire(&self) -> serde_json::Result<String> {
        let wire = match self {
            AttendancePayload::Member {
                name,
                time,
                membership_id,
            } => WirePayload {
                name,
                time,
                kind: AttendeeKind::Member.as_str(),
                membership_id: Some(membership_id),
                referrer: None,
            },
            AttendancePayload::Guest {
                name,
                time,
                referrer,
            } => WirePayload {
                name,
                time,
                kind: AttendeeKind::Guest.as_str(),
                membership_id: None,
                referrer: Some(referrer),
            },
        };
        serde_json::to_string(&wire)
    }

    /// Best-effort read of scanned text; `None` for anything that is not the
    /// structured wire form. Never used to reject a submission.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text.trim()).ok()
    }
}

#[derive(Serialize)]
struct WirePayload<'a> {
    name: &'a str,
    time: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(rename = "membershipId", skip_serializing_if = "Option::is_none")]
    membership_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    referrer: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AttendeeKind {
    Member,
    Guest,
}

impl AttendeeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendeeKind::Member => "member",
            AttendeeKind::Guest => "guest",
        }
    }
}

/// A scan that could not be delivered yet. Persisted as part of the offline
/// queue list; never mutated once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueuedSubmission {
    pub id: String,
    pub payload: String,
    #[serde(rename = "enqueuedAt")]
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedSubmission {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload: payload.into(),
            enqueued_at: Utc::now(),
        }
    }
}

/// Terminal result of a single foreground submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// The service acknowledged the scan; carries its confirmation message.
    Delivered { message: String },
    /// Delivery failed; the scan now lives in the offline queue under `id`.
    Queued { id: String },
}

/// User-facing notification for every terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Delivered { message: String },
    SavedOffline { pending: usize },
    Synced { delivered: usize, pending: usize },
    ValidationFailed { reason: String },
    CameraUnavailable { reason: String },
}

impl Notice {
    pub fn text(&self) -> String {
        match self {
            Notice::Delivered { message } => message.clone(),
            Notice::SavedOffline { pending } => format!(
                "Saved locally, will sync when back online ({} pending)",
                pending
            ),
            Notice::Synced { delivered, pending } => {
                format!("Synced {} offline scan(s), {} still pending", delivered, pending)
            }
            Notice::ValidationFailed { reason } => reason.clone(),
            Notice::CameraUnavailable { reason } => {
                format!("Camera unavailable ({}); use manual entry", reason)
            }
        }
    }
}

/// ISO-8601 instant with millisecond precision and a `Z` suffix.
pub(crate) fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
