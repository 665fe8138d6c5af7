//! Lost-patient reactivation: find patients who stopped coming, then reach
//! out to them through a campaign or direct messages.

pub mod campaigns;
pub mod classifier;
pub mod dispatch;

use uuid::Uuid;

use crate::error::ApiError;

/// Upper bound on patient ids accepted in a single request.
pub const MAX_PATIENTS_PER_REQUEST: usize = 500;

/// Parses the `patientIds` array of a request body. Missing, empty, oversized
/// or malformed lists are rejected before anything is written.
pub fn parse_patient_ids(raw: Option<&[String]>, empty_message: &str) -> Result<Vec<Uuid>, ApiError> {
    let raw = match raw {
        Some(ids) if !ids.is_empty() => ids,
        _ => return Err(ApiError::validation(empty_message)),
    };
    if raw.len() > MAX_PATIENTS_PER_REQUEST {
        return Err(ApiError::validation(format!(
            "Too many patients selected (max {MAX_PATIENTS_PER_REQUEST})"
        )));
    }
    raw.iter()
        .map(|s| {
            Uuid::parse_str(s.trim())
                .map_err(|_| ApiError::validation("Invalid patient IDs"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_empty_and_malformed() {
        assert!(parse_patient_ids(None, "empty").is_err());
        assert!(parse_patient_ids(Some(&[]), "empty").is_err());

        let bad = vec!["not-a-uuid".to_string()];
        let err = parse_patient_ids(Some(&bad), "empty").unwrap_err();
        assert_eq!(err.message(), "Invalid patient IDs");
    }

    #[test]
    fn keeps_order_and_duplicates() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let raw = vec![a.to_string(), format!(" {b} "), a.to_string()];
        assert_eq!(parse_patient_ids(Some(&raw), "empty").unwrap(), vec![a, b, a]);
    }

    #[test]
    fn caps_request_size() {
        let raw: Vec<String> = (0..=MAX_PATIENTS_PER_REQUEST)
            .map(|_| Uuid::new_v4().to_string())
            .collect();
        assert!(parse_patient_ids(Some(&raw), "empty").is_err());
    }
}
