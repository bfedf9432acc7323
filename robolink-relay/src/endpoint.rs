//! Resolved camera stream endpoints.

use std::fmt;

use robolink_common::redact;
use url::Url;

use crate::onvif::ResolutionError;

/// A camera stream URI plus the credentials needed to open it.
///
/// `Display` and `Debug` never show the credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct StreamEndpoint {
    uri: Url,
    username: String,
    password: String,
}

impl StreamEndpoint {
    /// Parse a stream URI as reported by the device.
    ///
    /// Any userinfo already present in the URI is discarded.
    pub fn new(
        uri: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, ResolutionError> {
        let mut uri = Url::parse(uri.trim())
            .map_err(|e| ResolutionError::InvalidUri(format!("{}: {}", strip_userinfo(uri), e)))?;
        if uri.host_str().is_none() {
            return Err(ResolutionError::InvalidUri(format!(
                "{}: missing host",
                strip_userinfo(uri.as_str())
            )));
        }
        let _ = uri.set_username("");
        let _ = uri.set_password(None);

        Ok(Self {
            uri,
            username: username.into(),
            password: password.into(),
        })
    }

    /// The stream URI without credentials.
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn scheme(&self) -> &str {
        self.uri.scheme()
    }

    /// The stream URI with `username:password@` placed in its authority.
    ///
    /// Scheme, host, port, path, query and fragment are preserved; userinfo
    /// is percent-encoded. Without a username the plain URI is returned.
    pub fn authenticated_uri(&self) -> Result<Url, ResolutionError> {
        let mut uri = self.uri.clone();
        if self.username.is_empty() {
            return Ok(uri);
        }

        uri.set_username(&self.username)
            .map_err(|_| ResolutionError::InvalidUri(format!("{}: cannot carry credentials", self.uri)))?;
        if !self.password.is_empty() {
            uri.set_password(Some(&self.password))
                .map_err(|_| ResolutionError::InvalidUri(format!("{}: cannot carry credentials", self.uri)))?;
        }
        Ok(uri)
    }
}

impl fmt::Display for StreamEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri)
    }
}

impl fmt::Debug for StreamEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamEndpoint")
            .field("uri", &self.uri.as_str())
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .finish()
    }
}

/// Drop anything before an `@` in the authority so error messages stay clean.
fn strip_userinfo(uri: &str) -> String {
    match (uri.find("://"), uri.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}{}", &uri[..scheme_end + 3], &uri[at + 1..])
        }
        _ => uri.to_string(),
    }
}
