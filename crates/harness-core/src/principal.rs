//! The authenticated caller. Built once at the HTTP boundary (by the
//! control-plane-validating middleware in `harness-server`) and threaded
//! explicitly through every service call — no thread-local identity.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Stable identifier returned by the control plane, or `"dev-user"` in
    /// development mode.
    pub user_id: String,
}

impl Principal {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }

    /// The fixed principal used when `ENVIRONMENT=development` and auth is
    /// bypassed entirely.
    pub fn dev() -> Self {
        Self::new("dev-user")
    }

    /// Ownership check shared by template/test/suite visibility rules:
    /// visible iff `visibility == public` or `owner_id == self.user_id`.
    pub fn owns(&self, owner_id: Option<&str>) -> bool {
        owner_id == Some(self.user_id.as_str())
    }
}
