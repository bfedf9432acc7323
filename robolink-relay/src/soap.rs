//! Minimal SOAP 1.2 envelope building and namespace-agnostic XML scanning.
//!
//! ONVIF devices disagree on namespace prefixes, so elements are matched by
//! local name only. The scanner understands just enough XML for device
//! responses: start/end tags, self-closing tags, attributes and entities.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;
use sha1::{Digest, Sha1};

pub const DEVICE_NS: &str = "http://www.onvif.org/ver10/device/wsdl";
pub const MEDIA_NS: &str = "http://www.onvif.org/ver10/media/wsdl";
pub const SCHEMA_NS: &str = "http://www.onvif.org/ver10/schema";

const WSSE_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
const WSU_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";
const PASSWORD_DIGEST: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest";
const BASE64_BINARY: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary";

/// WS-Security UsernameToken with a PasswordDigest.
///
/// `digest = base64(sha1(nonce + created + password))`
pub fn security_header(username: &str, password: &str) -> String {
    let nonce: [u8; 16] = rand::thread_rng().r#gen();
    let created = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    security_header_with(username, password, &nonce, &created)
}

fn security_header_with(username: &str, password: &str, nonce: &[u8], created: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(created.as_bytes());
    hasher.update(password.as_bytes());
    let digest = STANDARD.encode(hasher.finalize());

    format!(
        r#"<wsse:Security xmlns:wsse="{WSSE_NS}" xmlns:wsu="{WSU_NS}"><wsse:UsernameToken><wsse:Username>{}</wsse:Username><wsse:Password Type="{PASSWORD_DIGEST}">{}</wsse:Password><wsse:Nonce EncodingType="{BASE64_BINARY}">{}</wsse:Nonce><wsu:Created>{}</wsu:Created></wsse:UsernameToken></wsse:Security>"#,
        escape(username),
        digest,
        STANDARD.encode(nonce),
        created
    )
}

/// Wrap a body in a SOAP 1.2 envelope, with a security header when a
/// username is given.
pub fn envelope(body: &str, credentials: Option<(&str, &str)>) -> String {
    let header = match credentials {
        Some((username, password)) if !username.is_empty() => {
            format!("<s:Header>{}</s:Header>", security_header(username, password))
        }
        _ => String::new(),
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope">{}<s:Body>{}</s:Body></s:Envelope>"#,
        header, body
    )
}

/// Escape text for inclusion in element content or attribute values.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Reverse [`escape`] for the five predefined entities.
pub fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// An element located in a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element<'a> {
    /// Raw attribute text of the start tag.
    attrs: &'a str,
    /// Everything between the start and end tags.
    pub inner: &'a str,
}

impl<'a> Element<'a> {
    /// Trimmed, unescaped text content.
    pub fn text(&self) -> String {
        unescape(self.inner.trim())
    }

    /// Attribute value by local name.
    pub fn attr(&self, name: &str) -> Option<String> {
        let mut rest = self.attrs;
        while let Some(eq) = rest.find('=') {
            let key = rest[..eq].trim();
            let key = key.rsplit(':').next().unwrap_or(key);
            let after = rest[eq + 1..].trim_start();
            let quote = after.chars().next()?;
            if quote != '"' && quote != '\'' {
                return None;
            }
            let value_end = after[1..].find(quote)?;
            if key == name {
                return Some(unescape(&after[1..1 + value_end]));
            }
            rest = &after[value_end + 2..];
        }
        None
    }

    /// First descendant with the given local name.
    pub fn find(&self, local: &str) -> Option<Element<'a>> {
        find(self.inner, local)
    }

    /// All descendants with the given local name.
    pub fn find_all(&self, local: &str) -> Vec<Element<'a>> {
        find_all(self.inner, local)
    }
}

/// First element with the given local name.
pub fn find<'a>(xml: &'a str, local: &str) -> Option<Element<'a>> {
    Scanner { xml, pos: 0, local }.next()
}

/// Every non-nested element with the given local name, in document order.
pub fn find_all<'a>(xml: &'a str, local: &str) -> Vec<Element<'a>> {
    Scanner { xml, pos: 0, local }.collect()
}

/// Text of the first element with the given local name.
pub fn text_of(xml: &str, local: &str) -> Option<String> {
    find(xml, local).map(|e| e.text()).filter(|t| !t.is_empty())
}

struct Scanner<'a, 'l> {
    xml: &'a str,
    pos: usize,
    local: &'l str,
}

impl<'a> Iterator for Scanner<'a, '_> {
    type Item = Element<'a>;

    fn next(&mut self) -> Option<Element<'a>> {
        let xml = self.xml;
        while let Some(offset) = xml[self.pos..].find('<') {
            let start = self.pos + offset + 1;
            let tag_end = start + xml[start..].find('>')?;
            self.pos = tag_end + 1;

            let tag = &xml[start..tag_end];
            if tag.starts_with(['/', '?', '!']) {
                continue;
            }

            let (self_closing, tag) = match tag.strip_suffix('/') {
                Some(t) => (true, t),
                None => (false, tag),
            };
            let name_end = tag.find(char::is_whitespace).unwrap_or(tag.len());
            let qname = &tag[..name_end];
            let local = qname.rsplit(':').next().unwrap_or(qname);
            if local != self.local {
                continue;
            }

            let attrs = &tag[name_end..];
            if self_closing {
                return Some(Element { attrs, inner: "" });
            }

            let close = format!("</{}>", qname);
            let inner_len = xml[self.pos..].find(&close)?;
            let inner = &xml[self.pos..self.pos + inner_len];
            self.pos += inner_len + close.len();
            return Some(Element { attrs, inner });
        }
        None
    }
}

/// Reason text of a SOAP fault, if the document is one.
pub fn fault_reason(xml: &str) -> Option<String> {
    let fault = find(xml, "Fault")?;
    let reason = fault
        .find("Reason")
        .and_then(|r| r.find("Text"))
        .map(|t| t.text())
        .or_else(|| fault.find("faultstring").map(|t| t.text()))
        .filter(|r| !r.is_empty());
    let code = fault
        .find("Subcode")
        .and_then(|s| s.find("Value"))
        .map(|v| v.text());

    Some(match (reason, code) {
        (Some(reason), Some(code)) => format!("{} ({})", reason, code),
        (Some(reason), None) => reason,
        (None, Some(code)) => code,
        (None, None) => "unspecified SOAP fault".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_digest() {
        // nonce "0123456789abcdef", created 2024-01-01T00:00:00Z, password "pass"
        let header = security_header_with("admin", "pass", b"0123456789abcdef", "2024-01-01T00:00:00Z");

        let mut hasher = Sha1::new();
        hasher.update(b"0123456789abcdef2024-01-01T00:00:00Zpass");
        let expected = STANDARD.encode(hasher.finalize());

        let password = find(&header, "Password").unwrap();
        assert_eq!(password.text(), expected);
        assert!(password.attr("Type").unwrap().ends_with("#PasswordDigest"));
        assert_eq!(text_of(&header, "Nonce").unwrap(), STANDARD.encode(b"0123456789abcdef"));
        assert_eq!(text_of(&header, "Username").unwrap(), "admin");
        assert!(!header.contains("pass<"));
    }

    #[test]
    fn test_envelope_without_credentials() {
        let env = envelope("<x/>", None);
        assert!(!env.contains("Header"));
        assert!(env.contains("<s:Body><x/></s:Body>"));

        let env = envelope("<x/>", Some(("", "secret")));
        assert!(!env.contains("Security"));
    }

    #[test]
    fn test_username_is_escaped() {
        let header = security_header("a<b", "p");
        assert!(header.contains("<wsse:Username>a&lt;b</wsse:Username>"));
        assert_eq!(text_of(&header, "Username").unwrap(), "a<b");
    }

    #[test]
    fn test_find_ignores_prefix() {
        let xml = r#"<env:Body><tt:Uri>rtsp://h/a?x=1&amp;y=2</tt:Uri><Uri>second</Uri></env:Body>"#;
        assert_eq!(text_of(xml, "Uri").unwrap(), "rtsp://h/a?x=1&y=2");
        assert_eq!(find_all(xml, "Uri").len(), 2);
        assert!(find(xml, "Ur").is_none());
    }

    #[test]
    fn test_attributes_and_self_closing() {
        let xml = r#"<trt:Profiles token="P1" fixed='true'><tt:Name>main</tt:Name></trt:Profiles><trt:Profiles token="P2"/>"#;
        let profiles = find_all(xml, "Profiles");
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].attr("token").unwrap(), "P1");
        assert_eq!(profiles[0].attr("fixed").unwrap(), "true");
        assert_eq!(profiles[0].find("Name").unwrap().text(), "main");
        assert_eq!(profiles[1].attr("token").unwrap(), "P2");
        assert_eq!(profiles[1].inner, "");
    }

    #[test]
    fn test_fault_reason() {
        let xml = r#"<s:Envelope><s:Body><s:Fault><s:Code><s:Value>s:Sender</s:Value><s:Subcode><s:Value>ter:NotAuthorized</s:Value></s:Subcode></s:Code><s:Reason><s:Text xml:lang="en">Sender not Authorized</s:Text></s:Reason></s:Fault></s:Body></s:Envelope>"#;
        assert_eq!(
            fault_reason(xml).unwrap(),
            "Sender not Authorized (ter:NotAuthorized)"
        );
        assert!(fault_reason("<s:Body><ok/></s:Body>").is_none());
    }
}
