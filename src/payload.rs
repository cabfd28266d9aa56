//! Builders for the canonical attendance payload text.
//!
//! Manual entry does not pass through here: typed or pasted text is handed to
//! the coordinator verbatim and the remote service validates it.
use crate::model::{timestamp_now, AttendancePayload};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("{0} is required")]
    EmptyField(&'static str),
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Build a member check-in payload stamped with the current instant.
pub fn build_member_payload(name: &str, membership_id: &str) -> Result<String, PayloadError> {
    let name = required("name", name)?;
    let membership_id = required("membershipId", membership_id)?;
    let payload = AttendancePayload::Member {
        name: name.to_string(),
        time: timestamp_now(),
        membership_id: membership_id.to_string(),
    };
    Ok(payload.to_wire()?)
}

/// Build a guest check-in payload stamped with the current instant.
pub fn build_guest_payload(name: &str, referrer: &str) -> Result<String, PayloadError> {
    let name = required("name", name)?;
    let referrer = required("referrer", referrer)?;
    let payload = AttendancePayload::Guest {
        name: name.to_string(),
        time: timestamp_now(),
        referrer: referrer.to_string(),
    };
    Ok(payload.to_wire()?)
}

fn required<'a>(field: &'static str, value: &'a str) -> Result<&'a str, PayloadError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(PayloadError::EmptyField(field));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    #[test]
    fn member_payload_is_trimmed_and_stamped() {
        let before = Utc::now();
        let text = build_member_payload("  larrylo ", " ANCHOR-001\n").unwrap();
        let parsed = AttendancePayload::parse(&text).unwrap();
        match parsed {
            AttendancePayload::Member {
                name,
                time,
                membership_id,
            } => {
                assert_eq!(name, "larrylo");
                assert_eq!(membership_id, "ANCHOR-001");
                let stamped: DateTime<Utc> = time.parse().unwrap();
                assert!(stamped >= before - chrono::Duration::milliseconds(1));
                assert!(time.ends_with('Z'));
            }
            other => panic!("expected member, got {:?}", other),
        }
        assert!(text.contains(r#""type":"member""#));
        assert!(!text.contains("referrer"));
    }

    #[test]
    fn guest_payload_shape() {
        let text = build_guest_payload("Amy", "larrylo").unwrap();
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["type"], "guest");
        assert_eq!(v["referrer"], "larrylo");
        assert!(v.get("membershipId").is_none());
    }

    #[test]
    fn empty_name_is_rejected() {
        let err = build_member_payload("", "ANCHOR-001").unwrap_err();
        assert!(matches!(err, PayloadError::EmptyField("name")));
        assert_eq!(err.to_string(), "name is required");
    }

    #[test]
    fn whitespace_only_fields_are_rejected() {
        assert!(matches!(
            build_member_payload("larrylo", "   "),
            Err(PayloadError::EmptyField("membershipId"))
        ));
        assert!(matches!(
            build_guest_payload("\t", "larrylo"),
            Err(PayloadError::EmptyField("name"))
        ));
        assert!(matches!(
            build_guest_payload("Amy", ""),
            Err(PayloadError::EmptyField("referrer"))
        ));
    }
}
