// ============================================================================
// Derived row status
// ============================================================================
//
// The checklist screens render a status computed from a row's verification
// history rather than stored on the row itself: most recent verification
// wins, all three checks must pass, and special note values override the
// result. Pure functions over rows, recomputed after every reconciliation.
//
// ============================================================================

use chrono::{DateTime, NaiveDate, Utc};

use crate::core::Row;

const NOTE_WITH_GUNSMITH: &str = "With Gunsmith";
const NOTE_RENTED_OUT: &str = "Currently Rented Out";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Highlight {
    None,
    /// All checks passed on the latest verification.
    Verified,
    /// Out of rotation, no checks expected.
    WithGunsmith,
    /// Currently rented, no checks expected.
    RentedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowStatus {
    pub highlight: Highlight,
    pub morning_checked: bool,
    pub evening_checked: bool,
}

/// Latest verification row by `created_at`, RFC 3339. Rows without a
/// parseable timestamp lose to any row with one.
fn latest<'a>(verifications: &'a [Row]) -> Option<&'a Row> {
    verifications.iter().max_by_key(|row| {
        row.text("created_at")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    })
}

/// Derive the display status of a maintenance row from its verification
/// child rows. `today` is passed in so the cutoff is testable.
pub fn derive_status(row: &Row, verifications: &[Row], today: NaiveDate) -> RowStatus {
    let notes = row.text("rental_notes").unwrap_or_default();
    let with_gunsmith = notes == NOTE_WITH_GUNSMITH;
    let rented_out = notes == NOTE_RENTED_OUT;

    let latest = latest(verifications);

    let verified = latest.is_some_and(|v| {
        v.bool("serial_verified").unwrap_or(false)
            && v.bool("condition_verified").unwrap_or(false)
            && v.bool("magazine_attached").unwrap_or(false)
    });

    let verified_today = latest
        .and_then(|v| v.text("verification_date"))
        .and_then(|d| d.parse::<NaiveDate>().ok())
        .is_some_and(|d| d == today);

    // out-of-rotation rows carry no check marks regardless of history
    let checks_apply = !with_gunsmith && !rented_out && verified_today;
    let time_of_day = latest.and_then(|v| v.text("verification_time"));

    RowStatus {
        highlight: if verified {
            Highlight::Verified
        } else if with_gunsmith {
            Highlight::WithGunsmith
        } else if rented_out {
            Highlight::RentedOut
        } else {
            Highlight::None
        },
        morning_checked: checks_apply && time_of_day == Some("morning"),
        evening_checked: checks_apply && time_of_day == Some("evening"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RowId;
    use serde_json::json;

    fn firearm(notes: &str) -> Row {
        Row::new("firearms_maintenance", RowId::from("g1")).with("rental_notes", json!(notes))
    }

    fn verification(created: &str, date: &str, time: &str, all_passed: bool) -> Row {
        Row::new("firearm_verifications", RowId::from(created))
            .with("firearm_id", json!("g1"))
            .with("created_at", json!(created))
            .with("verification_date", json!(date))
            .with("verification_time", json!(time))
            .with("serial_verified", json!(all_passed))
            .with("condition_verified", json!(all_passed))
            .with("magazine_attached", json!(true))
    }

    fn today() -> NaiveDate {
        "2024-06-01".parse().unwrap()
    }

    #[test]
    fn test_all_checks_passed_is_verified() {
        let v = vec![verification("2024-06-01T08:00:00Z", "2024-06-01", "morning", true)];
        let status = derive_status(&firearm(""), &v, today());
        assert_eq!(status.highlight, Highlight::Verified);
        assert!(status.morning_checked);
        assert!(!status.evening_checked);
    }

    #[test]
    fn test_latest_verification_wins() {
        let v = vec![
            verification("2024-06-01T08:00:00Z", "2024-06-01", "morning", true),
            verification("2024-06-01T18:00:00Z", "2024-06-01", "evening", false),
        ];
        let status = derive_status(&firearm(""), &v, today());
        assert_eq!(status.highlight, Highlight::None);
        assert!(status.evening_checked);
        assert!(!status.morning_checked);
    }

    #[test]
    fn test_stale_verification_carries_no_checks() {
        let v = vec![verification("2024-05-30T08:00:00Z", "2024-05-30", "morning", true)];
        let status = derive_status(&firearm(""), &v, today());
        assert_eq!(status.highlight, Highlight::Verified);
        assert!(!status.morning_checked);
    }

    #[test]
    fn test_note_overrides_suppress_checks() {
        let v = vec![verification("2024-06-01T08:00:00Z", "2024-06-01", "morning", false)];
        let status = derive_status(&firearm("With Gunsmith"), &v, today());
        assert_eq!(status.highlight, Highlight::WithGunsmith);
        assert!(!status.morning_checked);

        let status = derive_status(&firearm("Currently Rented Out"), &v, today());
        assert_eq!(status.highlight, Highlight::RentedOut);
    }

    #[test]
    fn test_no_history() {
        let status = derive_status(&firearm(""), &[], today());
        assert_eq!(status.highlight, Highlight::None);
        assert!(!status.morning_checked);
        assert!(!status.evening_checked);
    }
}
