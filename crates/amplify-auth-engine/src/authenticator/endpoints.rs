//! OpenID Connect endpoints of a Keycloak-style realm.

use serde::Deserialize;

/// Resolved endpoint URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub auth: String,
    pub certs: String,
    pub logout: String,
    pub token: String,
    pub userinfo: String,
    pub well_known: String,
}

/// Per-endpoint overrides; unset entries use the realm default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointOverrides {
    pub auth: Option<String>,
    pub certs: Option<String>,
    pub logout: Option<String>,
    pub token: Option<String>,
    pub userinfo: Option<String>,
    pub well_known: Option<String>,
}

impl Endpoints {
    /// Default endpoints for `realm` under `base_url` (no trailing slash).
    pub fn for_realm(base_url: &str, realm: &str) -> Self {
        let realm_url = format!("{base_url}/auth/realms/{realm}");
        let oidc = format!("{realm_url}/protocol/openid-connect");
        Self {
            auth: format!("{oidc}/auth"),
            certs: format!("{oidc}/certs"),
            logout: format!("{oidc}/logout"),
            token: format!("{oidc}/token"),
            userinfo: format!("{oidc}/userinfo"),
            well_known: format!("{realm_url}/.well-known/openid-configuration"),
        }
    }

    pub fn with_overrides(mut self, overrides: &EndpointOverrides) -> Self {
        let pairs = [
            (&mut self.auth, &overrides.auth),
            (&mut self.certs, &overrides.certs),
            (&mut self.logout, &overrides.logout),
            (&mut self.token, &overrides.token),
            (&mut self.userinfo, &overrides.userinfo),
            (&mut self.well_known, &overrides.well_known),
        ];
        for (slot, value) in pairs {
            if let Some(value) = value {
                *slot = value.clone();
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realm_endpoints() {
        let endpoints = Endpoints::for_realm("https://login.axway.com", "Broker");
        assert_eq!(
            endpoints.token,
            "https://login.axway.com/auth/realms/Broker/protocol/openid-connect/token"
        );
        assert_eq!(
            endpoints.well_known,
            "https://login.axway.com/auth/realms/Broker/.well-known/openid-configuration"
        );
    }

    #[test]
    fn overrides_replace_single_entries() {
        let endpoints = Endpoints::for_realm("https://x", "R").with_overrides(&EndpointOverrides {
            token: Some("https://elsewhere/token".into()),
            ..EndpointOverrides::default()
        });
        assert_eq!(endpoints.token, "https://elsewhere/token");
        assert_eq!(endpoints.auth, "https://x/auth/realms/R/protocol/openid-connect/auth");
    }
}
