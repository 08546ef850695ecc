use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{AppError, AppResult};

const SYSTEM_SUBJECT: &str = "system";

/// Stable identifier of the actor that performs a write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a validated user identifier from a subject claim.
    pub fn new(subject: impl Into<String>) -> AppResult<Self> {
        let subject = subject.into();
        let trimmed = subject.trim();
        if trimmed.is_empty() {
            return Err(AppError::Validation(
                "user identifier must not be empty".to_owned(),
            ));
        }

        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the sentinel used for writes without an authenticated user.
    #[must_use]
    pub fn system() -> Self {
        Self(SYSTEM_SUBJECT.to_owned())
    }

    /// Returns whether this identifier is the system sentinel.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.0 == SYSTEM_SUBJECT
    }

    /// Returns the subject string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for UserId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}
