//! Records managed by the IdP.
//!
//! Each record is persisted as JSON in the [`Store`](crate::store::Store)
//! under `/<kind>s/<name>`.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const HTTP_POST_BINDING: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";
pub const HTTP_REDIRECT_BINDING: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";

// -- Services ----------------------------------------------------------------

/// A relying party this IdP authenticates users for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub metadata: EntityDescriptor,
}

/// Service-provider metadata.
///
/// `document` holds the XML exactly as it should be served back; the other
/// fields are what the IdP reads out of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<String>,
    #[serde(default)]
    pub sp_sso_descriptors: Vec<SpSsoDescriptor>,
    pub document: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpSsoDescriptor {
    pub protocol_support_enumeration: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authn_requests_signed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub want_assertions_signed: Option<bool>,
    #[serde(default)]
    pub name_id_formats: Vec<String>,
    #[serde(default)]
    pub assertion_consumer_services: Vec<IndexedEndpoint>,
    #[serde(default)]
    pub key_descriptors: Vec<KeyDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedEndpoint {
    pub binding: String,
    pub location: String,
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_default: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyDescriptor {
    /// `signing`, `encryption`, or absent for both.
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    /// Base64 DER certificate as it appears in `ds:X509Certificate`.
    pub certificate: String,
}

impl EntityDescriptor {
    fn endpoints(&self) -> impl Iterator<Item = &IndexedEndpoint> {
        self.sp_sso_descriptors
            .iter()
            .flat_map(|d| d.assertion_consumer_services.iter())
    }

    /// Pick the endpoint an unsolicited response is delivered to.
    ///
    /// Preference: an explicit HTTP-POST default, then the first HTTP-POST
    /// endpoint, then whatever is listed first.
    pub fn default_assertion_consumer_service(&self) -> Option<&IndexedEndpoint> {
        self.endpoints()
            .find(|e| e.binding == HTTP_POST_BINDING && e.is_default == Some(true))
            .or_else(|| self.endpoints().find(|e| e.binding == HTTP_POST_BINDING))
            .or_else(|| self.endpoints().next())
    }

    /// Find the endpoint registered at `location`.
    pub fn assertion_consumer_service(&self, location: &str) -> Option<&IndexedEndpoint> {
        self.endpoints().find(|e| e.location == location)
    }
}

// -- Users -------------------------------------------------------------------

/// A user who can sign in to the IdP.
///
/// `password` is accepted on input only; it is never serialized, so it can
/// neither be persisted nor returned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, garde::Validate)]
pub struct User {
    #[serde(default)]
    #[garde(skip)]
    pub name: String,

    #[serde(default, skip_serializing)]
    #[garde(length(min = 1, max = 1024))]
    pub password: Option<String>,

    /// Opaque credential produced by the
    /// [`CredentialHasher`](crate::credentials::CredentialHasher).
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_bytes")]
    #[garde(skip)]
    pub hashed_password: Option<Vec<u8>>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    #[garde(skip)]
    pub groups: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[garde(skip)]
    pub email: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[garde(skip)]
    pub common_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[garde(skip)]
    pub surname: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[garde(skip)]
    pub given_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[garde(skip)]
    pub scoped_affiliation: String,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => s.serialize_str(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        encoded
            .map(|e| STANDARD.decode(e).map_err(serde::de::Error::custom))
            .transpose()
    }
}

// -- Shortcuts ---------------------------------------------------------------

/// A named IDP-initiated login.
///
/// A user visiting `/login/<name>` is sent to `service_provider`.  The
/// relay state is `relay_state` when set, otherwise the trailing path
/// segment when `url_suffix_as_relay_state` is true, otherwise empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, garde::Validate)]
pub struct Shortcut {
    #[serde(default)]
    #[garde(skip)]
    pub name: String,

    /// Entity ID of the target service provider.
    #[garde(length(min = 1))]
    pub service_provider: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(length(max = 1024))]
    pub relay_state: Option<String>,

    #[serde(
        default,
        alias = "uri_suffix_as_relay_state",
        skip_serializing_if = "std::ops::Not::not"
    )]
    #[garde(skip)]
    pub url_suffix_as_relay_state: bool,
}

// -- Sessions ----------------------------------------------------------------

/// An established login, created by `/login` and addressed by its cookie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub create_time: DateTime<Utc>,
    pub expire_time: DateTime<Utc>,
    /// SAML `SessionIndex`.
    pub index: String,
    pub name_id: String,

    pub user_name: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub user_email: String,
    #[serde(default)]
    pub user_common_name: String,
    #[serde(default)]
    pub user_surname: String,
    #[serde(default)]
    pub user_given_name: String,
    #[serde(default)]
    pub user_scoped_affiliation: String,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expire_time
    }
}
