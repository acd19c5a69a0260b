use super::provider::IdentityUser;
use serde::Serialize;

/// Public profile fields of the signed-in user, for presentation only.
///
/// Replaced wholesale after each successful establish; absent when signed out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSnapshot {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

impl UserSnapshot {
    #[must_use]
    pub fn from_user(user: &dyn IdentityUser) -> Self {
        Self {
            uid: user.uid().to_string(),
            email: user.email().map(ToString::to_string),
            display_name: user.display_name().map(ToString::to_string),
            photo_url: user.photo_url().map(ToString::to_string),
        }
    }

    /// Name to greet the user with: display name, else email, else uid.
    #[must_use]
    pub fn greeting_name(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.uid)
    }
}
