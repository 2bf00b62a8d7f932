//! Form checks that run before anything touches the network.

use std::fmt;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::BookingDraft;

pub const MIN_PASSWORD_LENGTH: usize = 4;
pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "field", rename_all = "snake_case")]
pub enum FieldKind {
    Name,
    Email,
    Password,
    RepeatPassword,
    Title,
    Description,
    StartTime,
    EndTime,
    RejectionReason,
    Rating,
    Message,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FieldKind::Name => "Name",
            FieldKind::Email => "Email",
            FieldKind::Password => "Password",
            FieldKind::RepeatPassword => "Password confirmation",
            FieldKind::Title => "Title",
            FieldKind::Description => "Short description",
            FieldKind::StartTime => "Start time",
            FieldKind::EndTime => "End time",
            FieldKind::RejectionReason => "Rejection reason",
            FieldKind::Rating => "Rating",
            FieldKind::Message => "Message",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: FieldKind },

    #[error("{field} is invalid")]
    Invalid { field: FieldKind },

    #[error("{field} must be at least {min} characters")]
    TooShort { field: FieldKind, min: usize },

    #[error("Passwords do not match")]
    Mismatch { field: FieldKind },

    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: FieldKind, min: u8, max: u8 },

    #[error("Start time must be before end time")]
    StartNotBeforeEnd,

    #[error("Start time must be in the future")]
    StartInPast,
}

impl ValidationError {
    pub fn field(&self) -> FieldKind {
        match self {
            ValidationError::Required { field }
            | ValidationError::Invalid { field }
            | ValidationError::TooShort { field, .. }
            | ValidationError::Mismatch { field }
            | ValidationError::OutOfRange { field, .. } => *field,
            ValidationError::StartNotBeforeEnd => FieldKind::EndTime,
            ValidationError::StartInPast => FieldKind::StartTime,
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignInForm {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for SignInForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignInForm")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct SignUpForm {
    pub username: String,
    pub email: String,
    pub password: String,
    pub repeat_password: String,
}

impl fmt::Debug for SignUpForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignUpForm")
            .field("username", &self.username)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

fn required(value: &str, field: FieldKind) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::Required { field })
    } else {
        Ok(())
    }
}

fn email(value: &str) -> Result<(), ValidationError> {
    required(value, FieldKind::Email)?;
    if EMAIL.is_match(value.trim()) {
        Ok(())
    } else {
        Err(ValidationError::Invalid {
            field: FieldKind::Email,
        })
    }
}

pub fn validate_sign_in(form: &SignInForm) -> Result<(), ValidationError> {
    email(&form.email)?;
    if form.password.is_empty() {
        return Err(ValidationError::Required {
            field: FieldKind::Password,
        });
    }
    Ok(())
}

pub fn validate_sign_up(form: &SignUpForm) -> Result<(), ValidationError> {
    required(&form.username, FieldKind::Name)?;
    email(&form.email)?;

    if form.password.is_empty() {
        return Err(ValidationError::Required {
            field: FieldKind::Password,
        });
    }
    if form.password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ValidationError::TooShort {
            field: FieldKind::Password,
            min: MIN_PASSWORD_LENGTH,
        });
    }

    if form.repeat_password.is_empty() {
        return Err(ValidationError::Required {
            field: FieldKind::RepeatPassword,
        });
    }
    if form.repeat_password != form.password {
        return Err(ValidationError::Mismatch {
            field: FieldKind::RepeatPassword,
        });
    }
    Ok(())
}

pub fn validate_booking(draft: &BookingDraft, now: DateTime<Utc>) -> Result<(), ValidationError> {
    required(&draft.title, FieldKind::Title)?;
    required(&draft.short_description, FieldKind::Description)?;
    if draft.desired_start_time >= draft.desired_end_time {
        return Err(ValidationError::StartNotBeforeEnd);
    }
    if draft.desired_start_time <= now {
        return Err(ValidationError::StartInPast);
    }
    Ok(())
}

/// Returns the trimmed reason.
pub fn validate_rejection_reason(reason: &str) -> Result<&str, ValidationError> {
    required(reason, FieldKind::RejectionReason)?;
    Ok(reason.trim())
}

pub fn validate_rating(stars: u8) -> Result<(), ValidationError> {
    if (MIN_RATING..=MAX_RATING).contains(&stars) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field: FieldKind::Rating,
            min: MIN_RATING,
            max: MAX_RATING,
        })
    }
}

/// Returns the trimmed message body.
pub fn validate_message(content: &str) -> Result<&str, ValidationError> {
    required(content, FieldKind::Message)?;
    Ok(content.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn sign_up() -> SignUpForm {
        SignUpForm {
            username: "Lan".into(),
            email: "lan@example.vn".into(),
            password: "hunter2".into(),
            repeat_password: "hunter2".into(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    fn draft(start_in_hours: i64, length_hours: i64) -> BookingDraft {
        let start = now() + Duration::hours(start_in_hours);
        BookingDraft {
            lawyer_id: "l1".into(),
            title: "Land dispute".into(),
            short_description: "Boundary with neighbour".into(),
            desired_start_time: start,
            desired_end_time: start + Duration::hours(length_hours),
            attachment: None,
        }
    }

    #[test]
    fn sign_in_checks_email_then_password() {
        let mut form = SignInForm {
            email: "lan@example".into(),
            password: String::new(),
        };
        assert_eq!(
            validate_sign_in(&form),
            Err(ValidationError::Invalid { field: FieldKind::Email })
        );

        form.email = "lan@example.vn".into();
        assert_eq!(
            validate_sign_in(&form),
            Err(ValidationError::Required { field: FieldKind::Password })
        );

        form.password = "x".into();
        assert!(validate_sign_in(&form).is_ok());
    }

    #[test]
    fn sign_up_rules() {
        assert!(validate_sign_up(&sign_up()).is_ok());

        let mut form = sign_up();
        form.username = "  ".into();
        assert_eq!(validate_sign_up(&form).unwrap_err().field(), FieldKind::Name);

        let mut form = sign_up();
        form.password = "abc".into();
        form.repeat_password = "abc".into();
        assert!(matches!(
            validate_sign_up(&form),
            Err(ValidationError::TooShort { min: MIN_PASSWORD_LENGTH, .. })
        ));

        let mut form = sign_up();
        form.repeat_password = "hunter3".into();
        assert_eq!(
            validate_sign_up(&form),
            Err(ValidationError::Mismatch { field: FieldKind::RepeatPassword })
        );
    }

    #[test]
    fn booking_window_rules() {
        assert!(validate_booking(&draft(24, 1), now()).is_ok());
        assert_eq!(
            validate_booking(&draft(24, 0), now()),
            Err(ValidationError::StartNotBeforeEnd)
        );
        assert_eq!(
            validate_booking(&draft(-1, 2), now()),
            Err(ValidationError::StartInPast)
        );

        let mut blank = draft(24, 1);
        blank.short_description = String::new();
        assert_eq!(
            validate_booking(&blank, now()).unwrap_err().field(),
            FieldKind::Description
        );
    }

    #[test]
    fn rejection_reason_is_trimmed_and_required() {
        assert_eq!(validate_rejection_reason("  forged card "), Ok("forged card"));
        assert!(validate_rejection_reason(" \n").is_err());
    }

    #[test]
    fn blank_messages_are_rejected() {
        assert!(validate_message("   ").is_err());
        assert_eq!(validate_message(" hi "), Ok("hi"));
    }

    #[test]
    fn errors_read_like_form_hints() {
        let err = ValidationError::Required { field: FieldKind::Description };
        assert_eq!(err.to_string(), "Short description is required");
    }

    proptest! {
        #[test]
        fn rating_accepts_exactly_one_to_five(stars in any::<u8>()) {
            prop_assert_eq!(validate_rating(stars).is_ok(), (1..=5).contains(&stars));
        }
    }
}
