//! `AuthnRequest` decoding for the HTTP-Redirect and HTTP-POST bindings.

use std::io::Read;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::DeflateDecoder;
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// Inflated requests larger than this are rejected.
const MAX_INFLATED_SIZE: u64 = 64 * 1024;

/// Encoded requests larger than this are rejected before decoding.
const MAX_ENCODED_SIZE: usize = 512 * 1024;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("SAMLRequest is too large")]
    TooLarge,

    #[error("SAMLRequest is not valid base64")]
    Base64(#[from] base64::DecodeError),

    #[error("SAMLRequest could not be inflated: {0}")]
    Inflate(#[from] std::io::Error),

    #[error("SAMLRequest is not valid UTF-8")]
    Encoding(#[from] std::string::FromUtf8Error),

    #[error("SAMLRequest is not well-formed XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("SAMLRequest is not an AuthnRequest")]
    NotAuthnRequest,

    #[error("AuthnRequest has no {0}")]
    Missing(&'static str),
}

/// The fields of an `AuthnRequest` the IdP acts on.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthnRequest {
    pub id: String,
    pub issuer: String,
    pub assertion_consumer_service_url: Option<String>,
}

impl AuthnRequest {
    /// HTTP-Redirect binding: base64 over raw DEFLATE.
    pub fn from_redirect(encoded: &str) -> Result<Self, RequestError> {
        let compressed = decode_base64(encoded)?;
        let mut xml = Vec::new();
        DeflateDecoder::new(&compressed[..])
            .take(MAX_INFLATED_SIZE + 1)
            .read_to_end(&mut xml)?;
        if xml.len() as u64 > MAX_INFLATED_SIZE {
            return Err(RequestError::TooLarge);
        }
        Self::parse(&String::from_utf8(xml)?)
    }

    /// HTTP-POST binding: base64 only.
    pub fn from_post(encoded: &str) -> Result<Self, RequestError> {
        let xml = String::from_utf8(decode_base64(encoded)?)?;
        Self::parse(&xml)
    }

    pub fn parse(xml: &str) -> Result<Self, RequestError> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut id = None;
        let mut acs_url = None;
        let mut issuer = None;
        let mut seen_root = false;
        let mut in_issuer = false;

        loop {
            match reader.read_event()? {
                Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                    b"AuthnRequest" if !seen_root => {
                        seen_root = true;
                        for attr in e.attributes() {
                            let attr = attr.map_err(quick_xml::Error::from)?;
                            match attr.key.local_name().as_ref() {
                                b"ID" => id = Some(attr.unescape_value()?.into_owned()),
                                b"AssertionConsumerServiceURL" => {
                                    acs_url = Some(attr.unescape_value()?.into_owned())
                                }
                                _ => {}
                            }
                        }
                    }
                    _ if !seen_root => return Err(RequestError::NotAuthnRequest),
                    b"Issuer" if issuer.is_none() => in_issuer = true,
                    _ => {}
                },
                Event::Text(t) if in_issuer => {
                    issuer = Some(t.unescape()?.trim().to_string());
                    in_issuer = false;
                }
                Event::End(_) => in_issuer = false,
                Event::Eof => break,
                _ => {}
            }
        }

        if !seen_root {
            return Err(RequestError::NotAuthnRequest);
        }
        Ok(AuthnRequest {
            id: id.ok_or(RequestError::Missing("ID"))?,
            issuer: issuer
                .filter(|i| !i.is_empty())
                .ok_or(RequestError::Missing("Issuer"))?,
            assertion_consumer_service_url: acs_url,
        })
    }
}

fn decode_base64(encoded: &str) -> Result<Vec<u8>, RequestError> {
    if encoded.len() > MAX_ENCODED_SIZE {
        return Err(RequestError::TooLarge);
    }
    // Some SPs wrap the value across lines.
    let compact: String = encoded.split_whitespace().collect();
    Ok(STANDARD.decode(compact)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use std::io::Write;

    const REQUEST: &str = r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="id-4a2b" Version="2.0" IssueInstant="2026-01-01T00:00:00Z" AssertionConsumerServiceURL="https://sp.example/acs">
  <saml:Issuer>https://sp.example/meta</saml:Issuer>
  <samlp:NameIDPolicy AllowCreate="true"/>
</samlp:AuthnRequest>"#;

    fn deflate(input: &[u8]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(input).unwrap();
        encoder.finish().unwrap()
    }

    fn expected() -> AuthnRequest {
        AuthnRequest {
            id: "id-4a2b".to_string(),
            issuer: "https://sp.example/meta".to_string(),
            assertion_consumer_service_url: Some("https://sp.example/acs".to_string()),
        }
    }

    #[test]
    fn test_parse_post_binding() {
        let encoded = STANDARD.encode(REQUEST);
        assert_eq!(AuthnRequest::from_post(&encoded).unwrap(), expected());
    }

    #[test]
    fn test_parse_redirect_binding() {
        let encoded = STANDARD.encode(deflate(REQUEST.as_bytes()));
        assert_eq!(AuthnRequest::from_redirect(&encoded).unwrap(), expected());
    }

    #[test]
    fn test_rejects_oversized_inflation() {
        let bomb = vec![b'a'; (MAX_INFLATED_SIZE + 10) as usize];
        let encoded = STANDARD.encode(deflate(&bomb));
        assert!(matches!(
            AuthnRequest::from_redirect(&encoded),
            Err(RequestError::TooLarge)
        ));
    }

    #[test]
    fn test_rejects_other_documents() {
        assert!(matches!(
            AuthnRequest::parse("<LogoutRequest ID=\"x\"/>"),
            Err(RequestError::NotAuthnRequest)
        ));
        assert!(matches!(
            AuthnRequest::parse(""),
            Err(RequestError::NotAuthnRequest)
        ));
        assert!(AuthnRequest::from_post("not base64!").is_err());
    }

    #[test]
    fn test_requires_issuer() {
        let xml = r#"<AuthnRequest ID="x"></AuthnRequest>"#;
        assert!(matches!(
            AuthnRequest::parse(xml),
            Err(RequestError::Missing("Issuer"))
        ));
    }

    #[test]
    fn test_acs_url_is_optional() {
        let xml = r#"<AuthnRequest ID="x"><Issuer>sp</Issuer></AuthnRequest>"#;
        let parsed = AuthnRequest::parse(xml).unwrap();
        assert_eq!(parsed.assertion_consumer_service_url, None);
        assert_eq!(parsed.issuer, "sp");
    }
}
