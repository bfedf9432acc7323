//! ONVIF media service client and stream endpoint resolution.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::CameraConfig;
use crate::endpoint::StreamEndpoint;
use crate::soap::{self, DEVICE_NS, MEDIA_NS, SCHEMA_NS};

/// Reasons a stream endpoint could not be resolved.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("Request to {url} failed: {reason}")]
    Transport { url: String, reason: String },
    #[error("{operation} returned HTTP {status}")]
    Http { operation: &'static str, status: u16 },
    #[error("{operation} fault: {reason}")]
    Fault {
        operation: &'static str,
        reason: String,
    },
    #[error("{operation} response missing {element}")]
    MissingElement {
        operation: &'static str,
        element: &'static str,
    },
    #[error("Device reports no media profiles")]
    NoProfiles,
    #[error("Profile '{0}' not found on device")]
    ProfileNotFound(String),
    #[error("No profile offers a unicast RTSP stream (last error: {0})")]
    NoStreamUri(String),
    #[error("Invalid stream URI {0}")]
    InvalidUri(String),
}

/// Produces the stream endpoint for a new relay session.
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    async fn resolve(&self) -> Result<StreamEndpoint, ResolutionError>;
}

/// A media profile as listed by `GetProfiles`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaProfile {
    pub token: String,
    pub name: Option<String>,
    /// Whether the profile carries a video encoder configuration.
    pub has_video: bool,
}

/// SOAP client for one device's device and media services.
#[derive(Clone)]
pub struct OnvifClient {
    http: reqwest::Client,
    device_url: String,
    fallback_media_url: String,
    username: String,
    password: String,
}

impl OnvifClient {
    pub fn new(config: &CameraConfig) -> Result<Self, ResolutionError> {
        let base = format!("http://{}:{}", config.host, config.port);
        Self::with_base_url(&base, &config.username, &config.password, config.timeout())
    }

    /// Client for a device whose services live under `base` (`http://host:port`).
    pub fn with_base_url(
        base: &str,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, ResolutionError> {
        let base = base.trim_end_matches('/');
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ResolutionError::Transport {
                url: base.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            http,
            device_url: format!("{}/onvif/device_service", base),
            fallback_media_url: format!("{}/onvif/media_service", base),
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    async fn call(&self, url: &str, operation: &'static str, body: &str) -> Result<String, ResolutionError> {
        let envelope = soap::envelope(body, Some((&self.username, &self.password)));
        let transport = |e: reqwest::Error| ResolutionError::Transport {
            url: url.to_string(),
            reason: e.without_url().to_string(),
        };

        let response = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/soap+xml; charset=utf-8")
            .body(envelope)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let text = response.text().await.map_err(transport)?;

        if let Some(reason) = soap::fault_reason(&text) {
            return Err(ResolutionError::Fault { operation, reason });
        }
        if !status.is_success() {
            return Err(ResolutionError::Http {
                operation,
                status: status.as_u16(),
            });
        }
        Ok(text)
    }

    /// Media service address from `GetCapabilities`, if the device reports one.
    pub async fn media_service_url(&self) -> Result<Option<String>, ResolutionError> {
        let body = format!(
            r#"<tds:GetCapabilities xmlns:tds="{DEVICE_NS}"><tds:Category>Media</tds:Category></tds:GetCapabilities>"#
        );
        let response = self.call(&self.device_url, "GetCapabilities", &body).await?;
        Ok(parse_media_xaddr(&response))
    }

    pub async fn profiles(&self, media_url: &str) -> Result<Vec<MediaProfile>, ResolutionError> {
        let body = format!(r#"<trt:GetProfiles xmlns:trt="{MEDIA_NS}"/>"#);
        let response = self.call(media_url, "GetProfiles", &body).await?;
        Ok(parse_profiles(&response))
    }

    /// Unicast RTSP URI for a profile.
    pub async fn stream_uri(&self, media_url: &str, token: &str) -> Result<String, ResolutionError> {
        let body = format!(
            r#"<trt:GetStreamUri xmlns:trt="{MEDIA_NS}" xmlns:tt="{SCHEMA_NS}"><trt:StreamSetup><tt:Stream>RTP-Unicast</tt:Stream><tt:Transport><tt:Protocol>RTSP</tt:Protocol></tt:Transport></trt:StreamSetup><trt:ProfileToken>{}</trt:ProfileToken></trt:GetStreamUri>"#,
            soap::escape(token)
        );
        let response = self.call(media_url, "GetStreamUri", &body).await?;
        parse_stream_uri(&response).ok_or(ResolutionError::MissingElement {
            operation: "GetStreamUri",
            element: "MediaUri/Uri",
        })
    }
}

/// `Capabilities/Media/XAddr`.
pub fn parse_media_xaddr(xml: &str) -> Option<String> {
    soap::find(xml, "Capabilities")
        .and_then(|caps| caps.find("Media"))
        .and_then(|media| media.find("XAddr"))
        .map(|x| x.text())
        .filter(|x| !x.is_empty())
}

pub fn parse_profiles(xml: &str) -> Vec<MediaProfile> {
    soap::find_all(xml, "Profiles")
        .into_iter()
        .filter_map(|p| {
            let token = p.attr("token").filter(|t| !t.is_empty())?;
            Some(MediaProfile {
                token,
                name: p.find("Name").map(|n| n.text()),
                has_video: p.find("VideoEncoderConfiguration").is_some(),
            })
        })
        .collect()
}

/// `MediaUri/Uri`.
pub fn parse_stream_uri(xml: &str) -> Option<String> {
    soap::find(xml, "MediaUri")
        .and_then(|m| m.find("Uri"))
        .map(|u| u.text())
        .filter(|u| !u.is_empty())
}

/// Order in which profiles are tried: the configured token alone, or
/// video-carrying profiles first, each group in device order.
pub fn candidate_profiles<'a>(
    profiles: &'a [MediaProfile],
    preferred: Option<&str>,
) -> Result<Vec<&'a MediaProfile>, ResolutionError> {
    if profiles.is_empty() {
        return Err(ResolutionError::NoProfiles);
    }

    if let Some(token) = preferred {
        return profiles
            .iter()
            .find(|p| p.token == token)
            .map(|p| vec![p])
            .ok_or_else(|| ResolutionError::ProfileNotFound(token.to_string()));
    }

    let (video, other): (Vec<_>, Vec<_>) = profiles.iter().partition(|p| p.has_video);
    Ok(video.into_iter().chain(other).collect())
}

/// Resolves the camera's RTSP endpoint over ONVIF on every call.
pub struct OnvifResolver {
    client: OnvifClient,
    profile_token: Option<String>,
    username: String,
    password: String,
}

impl OnvifResolver {
    pub fn new(config: &CameraConfig) -> Result<Self, ResolutionError> {
        Ok(Self::with_client(OnvifClient::new(config)?, config))
    }

    pub fn with_client(client: OnvifClient, config: &CameraConfig) -> Self {
        Self {
            client,
            profile_token: config.profile_token.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }
}

#[async_trait]
impl EndpointResolver for OnvifResolver {
    async fn resolve(&self) -> Result<StreamEndpoint, ResolutionError> {
        let media_url = match self.client.media_service_url().await? {
            Some(url) => url,
            None => {
                debug!(
                    url = %self.client.fallback_media_url,
                    "No media XAddr in capabilities, using default service path"
                );
                self.client.fallback_media_url.clone()
            }
        };

        let profiles = self.client.profiles(&media_url).await?;
        let candidates = candidate_profiles(&profiles, self.profile_token.as_deref())?;

        let mut last_error = String::from("none tried");
        for profile in candidates {
            match self.client.stream_uri(&media_url, &profile.token).await {
                Ok(uri) => {
                    let endpoint = StreamEndpoint::new(&uri, &self.username, &self.password)?;
                    if endpoint.scheme() != "rtsp" && endpoint.scheme() != "rtsps" {
                        last_error = format!("profile {} returned {} URI", profile.token, endpoint.scheme());
                        continue;
                    }
                    info!(profile = %profile.token, uri = %endpoint, "Resolved camera stream");
                    return Ok(endpoint);
                }
                Err(e) => {
                    warn!(profile = %profile.token, error = %e, "Profile has no usable stream");
                    last_error = e.to_string();
                }
            }
        }

        Err(ResolutionError::NoStreamUri(last_error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPABILITIES: &str = r#"<env:Envelope><env:Body><tds:GetCapabilitiesResponse><tds:Capabilities>
        <tt:Device><tt:XAddr>http://10.0.0.5/onvif/device_service</tt:XAddr></tt:Device>
        <tt:Media><tt:XAddr>http://10.0.0.5/onvif/Media</tt:XAddr><tt:StreamingCapabilities/></tt:Media>
        </tds:Capabilities></tds:GetCapabilitiesResponse></env:Body></env:Envelope>"#;

    const PROFILES: &str = r#"<env:Body><trt:GetProfilesResponse>
        <trt:Profiles token="audio_only" fixed="true"><tt:Name>Audio</tt:Name><tt:AudioEncoderConfiguration token="a"/></trt:Profiles>
        <trt:Profiles token="main" fixed="true"><tt:Name>MainStream</tt:Name><tt:VideoEncoderConfiguration token="v0"><tt:Encoding>H264</tt:Encoding></tt:VideoEncoderConfiguration></trt:Profiles>
        <trt:Profiles token="sub"><tt:Name>SubStream</tt:Name><tt:VideoEncoderConfiguration token="v1"/></trt:Profiles>
        </trt:GetProfilesResponse></env:Body>"#;

    fn profile(token: &str, has_video: bool) -> MediaProfile {
        MediaProfile {
            token: token.to_string(),
            name: None,
            has_video,
        }
    }

    #[test]
    fn test_parse_media_xaddr() {
        assert_eq!(parse_media_xaddr(CAPABILITIES).unwrap(), "http://10.0.0.5/onvif/Media");
        assert!(parse_media_xaddr("<tds:Capabilities><tt:Device/></tds:Capabilities>").is_none());
    }

    #[test]
    fn test_parse_profiles() {
        let profiles = parse_profiles(PROFILES);
        assert_eq!(profiles.len(), 3);
        assert_eq!(profiles[0].token, "audio_only");
        assert!(!profiles[0].has_video);
        assert_eq!(profiles[1].name.as_deref(), Some("MainStream"));
        assert!(profiles[1].has_video);
        assert!(profiles[2].has_video);
    }

    #[test]
    fn test_parse_stream_uri() {
        let xml = r#"<trt:GetStreamUriResponse><trt:MediaUri><tt:Uri>rtsp://10.0.0.5:554/h264?ch=1&amp;sub=0</tt:Uri><tt:InvalidAfterConnect>false</tt:InvalidAfterConnect></trt:MediaUri></trt:GetStreamUriResponse>"#;
        assert_eq!(parse_stream_uri(xml).unwrap(), "rtsp://10.0.0.5:554/h264?ch=1&sub=0");
        assert!(parse_stream_uri("<trt:MediaUri><tt:Uri></tt:Uri></trt:MediaUri>").is_none());
    }

    #[test]
    fn test_candidates_prefer_video() {
        let profiles = vec![profile("a", false), profile("b", true), profile("c", false), profile("d", true)];
        let order: Vec<&str> = candidate_profiles(&profiles, None)
            .unwrap()
            .iter()
            .map(|p| p.token.as_str())
            .collect();
        assert_eq!(order, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn test_candidates_configured_token() {
        let profiles = vec![profile("a", true), profile("b", false)];
        let chosen = candidate_profiles(&profiles, Some("b")).unwrap();
        assert_eq!(chosen.len(), 1);
        assert_eq!(chosen[0].token, "b");

        assert!(matches!(
            candidate_profiles(&profiles, Some("z")),
            Err(ResolutionError::ProfileNotFound(_))
        ));
        assert!(matches!(candidate_profiles(&[], None), Err(ResolutionError::NoProfiles)));
    }
}
