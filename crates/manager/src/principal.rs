//! Caller identity and the collaborator interfaces the manager consumes.

use std::fmt;

use zeroize::Zeroizing;

/// An authenticated caller, identified by domain and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal {
    domain: String,
    name: String,
}

impl Principal {
    /// Creates a principal.
    #[must_use]
    pub fn new(domain: impl Into<String>, name: impl Into<String>) -> Self {
        Self { domain: domain.into(), name: name.into() }
    }

    /// Domain of the principal (e.g. `sys.auth`).
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Short name of the principal (e.g. `aws`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `domain.name`, the form used in policy and log messages.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.domain, self.name)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.name)
    }
}

/// Authorization check against the policy engine.
///
/// `resource` is `domain:entity` (e.g. `sys.auth:instance`). Returns `true`
/// when `principal` may perform `action` on it.
pub trait Authorizer: Send + Sync {
    /// Checks whether `principal` may perform `action` on `resource`.
    fn access(
        &self,
        action: &str,
        resource: &str,
        principal: &Principal,
        trust_domain: Option<&str>,
    ) -> bool;
}

/// Source of secret key material for record store backends.
pub trait PrivateKeyStore: Send + Sync {
    /// Looks up a named secret for an application, e.g. a database password.
    fn get_application_secret(&self, app_name: &str, key_name: &str) -> Option<Zeroizing<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name_joins_with_dot() {
        let principal = Principal::new("sys.auth", "aws");
        assert_eq!(principal.full_name(), "sys.auth.aws");
        assert_eq!(principal.to_string(), "sys.auth.aws");
        assert_eq!(principal.domain(), "sys.auth");
        assert_eq!(principal.name(), "aws");
    }
}
