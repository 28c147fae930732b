/**
 * Authentication State
 *
 * Sign-up form validation and the signed-in/signed-out state held by
 * `ChatClient`. Validation runs before any backend call, in the order the
 * form shows its errors: password confirmation, password length, username.
 */

use crate::backend::AuthUser;
use crate::shared::messaging::{validate_username, Profile};
use crate::shared::SharedError;

/// Minimum password length accepted at sign-up
pub const MIN_PASSWORD_LEN: usize = 6;

/// Authentication state
#[derive(Debug, Clone, Default, PartialEq)]
pub enum AuthState {
    #[default]
    SignedOut,
    SignedIn { user: AuthUser, profile: Profile },
}

impl AuthState {
    pub fn is_signed_in(&self) -> bool {
        matches!(self, AuthState::SignedIn { .. })
    }

    pub fn profile(&self) -> Option<&Profile> {
        match self {
            AuthState::SignedIn { profile, .. } => Some(profile),
            AuthState::SignedOut => None,
        }
    }
}

/// Sign-up form input
#[derive(Debug, Clone, Default)]
pub struct SignUpForm {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl SignUpForm {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
        confirm_password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            confirm_password: confirm_password.into(),
        }
    }

    /// Check the form, returning the trimmed username
    pub fn validate(&self) -> Result<String, SharedError> {
        if self.password != self.confirm_password {
            return Err(SharedError::validation("confirm_password", "Passwords do not match"));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(SharedError::validation(
                "password",
                format!("Password must be at least {} characters", MIN_PASSWORD_LEN),
            ));
        }
        let username = validate_username(&self.username)?;
        if self.email.trim().is_empty() {
            return Err(SharedError::validation("email", "Email is required"));
        }
        Ok(username)
    }
}
