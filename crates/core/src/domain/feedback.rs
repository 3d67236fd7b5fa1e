use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::booking::ReferenceId;
use crate::errors::DomainError;

pub const MAX_FEEDBACK_COMMENT_CHARS: usize = 1_000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripFeedback {
    pub reference_id: ReferenceId,
    pub rating: u8,
    pub comments: Option<String>,
    pub driver_on_time: Option<bool>,
    pub vehicle_clean: Option<bool>,
    pub actual_fare: Option<Decimal>,
    pub submitted_by: String,
    pub submitted_at: DateTime<Utc>,
}

impl TripFeedback {
    pub fn validate(&self) -> Result<(), DomainError> {
        let mut problems = Vec::new();
        if !(1..=5).contains(&self.rating) {
            problems.push("rating must be between 1 and 5".to_string());
        }
        if let Some(fare) = self.actual_fare {
            if fare < Decimal::ZERO {
                problems.push("actual_fare cannot be negative".to_string());
            }
        }
        if let Some(comments) = &self.comments {
            if comments.chars().count() > MAX_FEEDBACK_COMMENT_CHARS {
                problems.push(format!(
                    "comments must be at most {MAX_FEEDBACK_COMMENT_CHARS} characters"
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(DomainError::Validation(problems))
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::TripFeedback;
    use crate::domain::booking::ReferenceId;

    fn feedback(rating: u8) -> TripFeedback {
        TripFeedback {
            reference_id: ReferenceId("TX-261018-AAAAAA".to_string()),
            rating,
            comments: Some("Driver was early".to_string()),
            driver_on_time: Some(true),
            vehicle_clean: None,
            actual_fare: Some(Decimal::new(90_000, 2)),
            submitted_by: "E1001".to_string(),
            submitted_at: Utc::now(),
        }
    }

    #[test]
    fn rating_must_be_in_range() {
        assert!(feedback(5).validate().is_ok());
        assert!(feedback(0).validate().is_err());
        assert!(feedback(6).validate().is_err());
    }

    #[test]
    fn negative_fare_is_rejected() {
        let mut entry = feedback(4);
        entry.actual_fare = Some(Decimal::new(-1, 0));
        assert!(entry.validate().is_err());
    }
}
