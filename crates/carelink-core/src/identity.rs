//! Authenticated caller identity.
//!
//! The HTTP layer validates the bearer token and hands the resulting claims to
//! the service layer as a [`Principal`]. Roles are plain strings so new roles
//! can be introduced without touching this type.

use serde::{Deserialize, Serialize};

/// Role carried by provider accounts.
pub const ROLE_PROVIDER: &str = "PROVIDER";

/// Role carried by patient accounts.
pub const ROLE_PATIENT: &str = "PATIENT";

/// Claims of the authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    /// Stable subject id; for providers this is the provider id
    pub subject: String,
    /// Human-readable name used in outbound notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Principal {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            display_name: None,
            roles: Vec::new(),
        }
    }

    /// Shorthand for a provider principal.
    pub fn provider(subject: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self::new(subject)
            .with_display_name(display_name)
            .with_role(ROLE_PROVIDER)
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        let role = role.into();
        if !self.has_role(&role) {
            self.roles.push(role);
        }
        self
    }

    /// Role comparison ignores ASCII case.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }

    /// Name to put in outbound messages, falling back to the subject.
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.subject)
    }
}
