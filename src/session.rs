use serde::{Deserialize, Serialize};

pub const USER_HEADER: &str = "X-Dev-User";
pub const EMAIL_HEADER: &str = "X-Dev-Email";
pub const TENANT_HEADER: &str = "X-Tenant-Id";

/// Caller identity forwarded with every orchestrator call.
///
/// Supplied by the identity collaborator and passed through unchanged. On an
/// identity change the whole value is replaced; fields are never edited in
/// place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    user: String,
    email: String,
    tenant_id: String,
}

impl SessionContext {
    pub fn new(
        user: impl Into<String>,
        email: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            email: email.into(),
            tenant_id: tenant_id.into(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub(crate) fn headers(&self) -> [(&'static str, &str); 3] {
        [
            (USER_HEADER, self.user.as_str()),
            (EMAIL_HEADER, self.email.as_str()),
            (TENANT_HEADER, self.tenant_id.as_str()),
        ]
    }
}
