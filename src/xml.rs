//! SAML metadata XML.
//!
//! Service-provider metadata arrives as XML on `PUT /services/:id` and is
//! decoded here into an [`EntityDescriptor`].  The IdP's own metadata is
//! rendered here too.  Both directions use `quick-xml` events and match
//! elements by local name, so any namespace prefix is accepted.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Reader;
use quick_xml::Writer;
use std::io::Cursor;
use thiserror::Error;

use crate::models::{
    EntityDescriptor, IndexedEndpoint, KeyDescriptor, SpSsoDescriptor, HTTP_POST_BINDING,
    HTTP_REDIRECT_BINDING,
};

pub const METADATA_NS: &str = "urn:oasis:names:tc:SAML:2.0:metadata";
pub const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const PROTOCOL_NS: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
pub const EMAIL_NAME_ID_FORMAT: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress";

/// Why a metadata document was rejected.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("metadata is not valid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("expected EntityDescriptor or EntitiesDescriptor, found {0}")]
    UnexpectedRoot(String),

    #[error("metadata document is empty")]
    Empty,

    #[error("EntityDescriptor has no entityID")]
    MissingEntityId,

    #[error("metadata contained no service provider metadata")]
    NoServiceProvider,

    #[error("invalid value {value:?} for attribute {name}")]
    InvalidAttribute { name: &'static str, value: String },
}

impl From<quick_xml::events::attributes::AttrError> for MetadataError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        MetadataError::Xml(err.into())
    }
}

// ── Decoding ────────────────────────────────────────────────────────

/// Decode service-provider metadata.
///
/// A bare `EntityDescriptor` is kept verbatim.  For an `EntitiesDescriptor`
/// the first entity carrying an `SPSSODescriptor` is selected and rendered
/// as a standalone document, inheriting the group's namespace declarations.
pub fn decode_sp_metadata(body: &[u8]) -> Result<EntityDescriptor, MetadataError> {
    let text = std::str::from_utf8(body)?;
    let mut reader = Reader::from_str(text);

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                return match e.local_name().as_ref() {
                    b"EntityDescriptor" => {
                        let parsed = parse_entity(&mut reader, &e, None)?;
                        parsed.into_descriptor(text.to_string())
                    }
                    b"EntitiesDescriptor" => select_service_provider(&mut reader, &e),
                    other => Err(MetadataError::UnexpectedRoot(
                        String::from_utf8_lossy(other).into_owned(),
                    )),
                };
            }
            Event::Empty(e) => {
                return match e.local_name().as_ref() {
                    b"EntityDescriptor" => {
                        ParsedEntity::from_start(&e)?.into_descriptor(text.to_string())
                    }
                    b"EntitiesDescriptor" => Err(MetadataError::NoServiceProvider),
                    other => Err(MetadataError::UnexpectedRoot(
                        String::from_utf8_lossy(other).into_owned(),
                    )),
                };
            }
            Event::Eof => return Err(MetadataError::Empty),
            // Prolog: declaration, comments, doctype, whitespace.
            _ => {}
        }
    }
}

fn select_service_provider(
    reader: &mut Reader<&[u8]>,
    group: &BytesStart<'_>,
) -> Result<EntityDescriptor, MetadataError> {
    let mut inherited = Vec::new();
    for attr in group.attributes() {
        let attr = attr?;
        let key = attr.key.as_ref();
        if key == b"xmlns" || key.starts_with(b"xmlns:") {
            inherited.push((
                String::from_utf8_lossy(key).into_owned(),
                attr.unescape_value()?.into_owned(),
            ));
        }
    }

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"EntityDescriptor" => {
                let mut start = e.to_owned();
                let declared: Vec<Vec<u8>> = e
                    .attributes()
                    .filter_map(Result::ok)
                    .map(|a| a.key.as_ref().to_vec())
                    .collect();
                for (key, value) in &inherited {
                    if !declared.iter().any(|d| d == key.as_bytes()) {
                        start.push_attribute((key.as_str(), value.as_str()));
                    }
                }

                let mut writer = Writer::new(Cursor::new(Vec::new()));
                writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
                writer.write_event(Event::Start(start))?;
                let parsed = parse_entity(reader, &e, Some(&mut writer))?;
                if !parsed.sp_sso_descriptors.is_empty() {
                    let document = String::from_utf8(writer.into_inner().into_inner())
                        .map_err(|e| e.utf8_error())?;
                    return parsed.into_descriptor(document);
                }
            }
            Event::Eof => return Err(MetadataError::NoServiceProvider),
            _ => {}
        }
    }
}

struct ParsedEntity {
    entity_id: Option<String>,
    valid_until: Option<String>,
    sp_sso_descriptors: Vec<SpSsoDescriptor>,
}

impl ParsedEntity {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, MetadataError> {
        Ok(ParsedEntity {
            entity_id: attribute(start, b"entityID")?,
            valid_until: attribute(start, b"validUntil")?,
            sp_sso_descriptors: Vec::new(),
        })
    }

    fn into_descriptor(self, document: String) -> Result<EntityDescriptor, MetadataError> {
        let entity_id = self
            .entity_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(MetadataError::MissingEntityId)?;
        Ok(EntityDescriptor {
            entity_id,
            valid_until: self.valid_until,
            sp_sso_descriptors: self.sp_sso_descriptors,
            document,
        })
    }
}

/// Consume events up to the end of the `EntityDescriptor` opened by
/// `start`, copying each one into `sink` when given.
fn parse_entity(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart<'_>,
    mut sink: Option<&mut Writer<Cursor<Vec<u8>>>>,
) -> Result<ParsedEntity, MetadataError> {
    let mut entity = ParsedEntity::from_start(start)?;

    // Local names of the open elements below the entity.
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut sp: Option<SpSsoDescriptor> = None;
    let mut key: Option<KeyDescriptor> = None;
    let mut text = String::new();

    loop {
        let event = reader.read_event()?;
        if let Some(writer) = sink.as_deref_mut() {
            if !matches!(event, Event::Eof) {
                writer.write_event(&event)?;
            }
        }

        match &event {
            Event::Start(e) | Event::Empty(e) => {
                let name = e.local_name().as_ref().to_vec();
                match name.as_slice() {
                    b"SPSSODescriptor" if stack.is_empty() => {
                        sp = Some(sp_descriptor(e)?);
                    }
                    b"AssertionConsumerService" => {
                        if let Some(sp) = sp.as_mut() {
                            sp.assertion_consumer_services.push(endpoint(e)?);
                        }
                    }
                    b"KeyDescriptor" if sp.is_some() => {
                        key = Some(KeyDescriptor {
                            key_use: attribute(e, b"use")?,
                            certificate: String::new(),
                        });
                    }
                    _ => {}
                }
                text.clear();

                if matches!(event, Event::Start(_)) {
                    stack.push(name);
                } else {
                    close_element(&name, &mut sp, &mut key, &mut entity, &mut text, stack.is_empty());
                }
            }
            Event::Text(t) => text.push_str(&t.unescape()?),
            Event::CData(c) => text.push_str(std::str::from_utf8(c)?),
            Event::End(_) => match stack.pop() {
                Some(name) => {
                    close_element(&name, &mut sp, &mut key, &mut entity, &mut text, stack.is_empty())
                }
                None => return Ok(entity),
            },
            Event::Eof => {
                return Err(MetadataError::Xml(quick_xml::Error::UnexpectedEof(
                    "EntityDescriptor".to_string(),
                )))
            }
            _ => {}
        }
    }
}

fn close_element(
    name: &[u8],
    sp: &mut Option<SpSsoDescriptor>,
    key: &mut Option<KeyDescriptor>,
    entity: &mut ParsedEntity,
    text: &mut String,
    at_entity_level: bool,
) {
    match name {
        b"NameIDFormat" => {
            if let Some(sp) = sp.as_mut() {
                let format = text.trim();
                if !format.is_empty() {
                    sp.name_id_formats.push(format.to_string());
                }
            }
        }
        b"X509Certificate" => {
            if let Some(key) = key.as_mut() {
                key.certificate = text.split_whitespace().collect();
            }
        }
        b"KeyDescriptor" => {
            if let (Some(sp), Some(key)) = (sp.as_mut(), key.take()) {
                if !key.certificate.is_empty() {
                    sp.key_descriptors.push(key);
                }
            }
        }
        b"SPSSODescriptor" if at_entity_level => {
            if let Some(sp) = sp.take() {
                entity.sp_sso_descriptors.push(sp);
            }
        }
        _ => {}
    }
    text.clear();
}

fn sp_descriptor(e: &BytesStart<'_>) -> Result<SpSsoDescriptor, MetadataError> {
    Ok(SpSsoDescriptor {
        protocol_support_enumeration: attribute(e, b"protocolSupportEnumeration")?
            .unwrap_or_default(),
        authn_requests_signed: bool_attribute(e, b"AuthnRequestsSigned", "AuthnRequestsSigned")?,
        want_assertions_signed: bool_attribute(e, b"WantAssertionsSigned", "WantAssertionsSigned")?,
        ..Default::default()
    })
}

fn endpoint(e: &BytesStart<'_>) -> Result<IndexedEndpoint, MetadataError> {
    let index = match attribute(e, b"index")? {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| MetadataError::InvalidAttribute {
                name: "index",
                value: raw,
            })?,
        None => 0,
    };
    Ok(IndexedEndpoint {
        binding: attribute(e, b"Binding")?.unwrap_or_default(),
        location: attribute(e, b"Location")?.unwrap_or_default(),
        index,
        is_default: bool_attribute(e, b"isDefault", "isDefault")?,
    })
}

fn attribute(e: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, MetadataError> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.local_name().as_ref() == name {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn bool_attribute(
    e: &BytesStart<'_>,
    raw_name: &[u8],
    name: &'static str,
) -> Result<Option<bool>, MetadataError> {
    match attribute(e, raw_name)? {
        None => Ok(None),
        Some(value) => match value.trim() {
            "true" | "1" => Ok(Some(true)),
            "false" | "0" => Ok(Some(false)),
            _ => Err(MetadataError::InvalidAttribute { name, value }),
        },
    }
}

// ── Rendering ───────────────────────────────────────────────────────

/// Render the IdP's own `EntityDescriptor`.
///
/// `certificate` is the base64 DER body of the signing certificate.
pub fn render_idp_metadata(entity_id: &str, sso_url: &str, certificate: Option<&str>) -> String {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .expect("xml decl");

    let root = BytesStart::new("md:EntityDescriptor")
        .with_attributes([("xmlns:md", METADATA_NS), ("entityID", entity_id)]);
    writer.write_event(Event::Start(root)).expect("start root");

    let idp = BytesStart::new("md:IDPSSODescriptor").with_attributes([
        ("protocolSupportEnumeration", PROTOCOL_NS),
        ("WantAuthnRequestsSigned", "false"),
    ]);
    writer.write_event(Event::Start(idp)).expect("start IDPSSODescriptor");

    if let Some(certificate) = certificate {
        writer
            .write_event(Event::Start(
                BytesStart::new("md:KeyDescriptor").with_attributes([("use", "signing")]),
            ))
            .expect("start KeyDescriptor");
        writer
            .write_event(Event::Start(
                BytesStart::new("ds:KeyInfo").with_attributes([("xmlns:ds", DSIG_NS)]),
            ))
            .expect("start KeyInfo");
        writer
            .write_event(Event::Start(BytesStart::new("ds:X509Data")))
            .expect("start X509Data");
        write_text_element(&mut writer, "ds:X509Certificate", certificate);
        writer
            .write_event(Event::End(BytesEnd::new("ds:X509Data")))
            .expect("end X509Data");
        writer
            .write_event(Event::End(BytesEnd::new("ds:KeyInfo")))
            .expect("end KeyInfo");
        writer
            .write_event(Event::End(BytesEnd::new("md:KeyDescriptor")))
            .expect("end KeyDescriptor");
    }

    write_text_element(&mut writer, "md:NameIDFormat", EMAIL_NAME_ID_FORMAT);

    for binding in [HTTP_REDIRECT_BINDING, HTTP_POST_BINDING] {
        let sso = BytesStart::new("md:SingleSignOnService")
            .with_attributes([("Binding", binding), ("Location", sso_url)]);
        writer.write_event(Event::Empty(sso)).expect("SingleSignOnService");
    }

    writer
        .write_event(Event::End(BytesEnd::new("md:IDPSSODescriptor")))
        .expect("end IDPSSODescriptor");
    writer
        .write_event(Event::End(BytesEnd::new("md:EntityDescriptor")))
        .expect("end root");

    String::from_utf8(writer.into_inner().into_inner()).expect("valid utf-8")
}

/// Extract the base64 body of the first certificate in a PEM file.
pub fn pem_certificate_body(pem: &str) -> Option<String> {
    let mut lines = pem.lines().map(str::trim);
    lines.find(|l| *l == "-----BEGIN CERTIFICATE-----")?;
    let body: String = lines
        .take_while(|l| *l != "-----END CERTIFICATE-----")
        .collect();
    if body.is_empty() {
        None
    } else {
        Some(body)
    }
}

fn write_text_element(writer: &mut Writer<Cursor<Vec<u8>>>, tag: &str, text: &str) {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .expect("start element");
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .expect("text");
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .expect("end element");
}
