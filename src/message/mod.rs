//! AMQP 1.0 message sections carried by transfers.
//!
//! The frame codec delivers each transfer's payload as a sequence of
//! [`Fragment`]s tagged with the section they belong to. Structured sections
//! (header, properties, application properties) are encoded with bincode's
//! standard configuration; the data section carries the body bytes verbatim.
//! [`assembly`] stitches fragments back into a [`Message`] and splits a
//! message into fragments; [`convert`] translates to and from the backend's
//! message model.

pub mod assembly;
pub mod convert;

use std::{collections::BTreeMap, num::NonZeroUsize};

use bincode::{
    BorrowDecode,
    Decode,
    Encode,
    borrow_decode_from_slice,
    config,
    encode_to_vec,
    error::{DecodeError, EncodeError},
};
use bytes::Bytes;

pub use self::assembly::{AssemblyError, MessageAssembler};
use crate::frame::{Fragment, SectionCode};

/// Encoding shared by the structured message sections.
///
/// Any type deriving [`Encode`] and [`BorrowDecode`] implements this trait
/// through the blanket implementation below.
pub trait Section: Encode + for<'de> BorrowDecode<'de, ()> {
    /// Serialize the section payload.
    ///
    /// # Errors
    ///
    /// Returns an [`EncodeError`] if serialization fails.
    fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> { encode_to_vec(self, config::standard()) }

    /// Deserialize a section payload, returning the section and the number of
    /// bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if deserialization fails.
    fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), DecodeError>
    where
        Self: Sized,
    {
        borrow_decode_from_slice(bytes, config::standard())
    }
}

impl<T> Section for T where for<'de> T: Encode + BorrowDecode<'de, ()> {}

/// Transport-level delivery annotations.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct Header {
    pub durable: bool,
    pub priority: Option<u8>,
    /// Time to live in milliseconds.
    pub ttl: Option<u32>,
    pub first_acquirer: bool,
    pub delivery_count: u32,
}

/// Immutable properties of the bare message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct Properties {
    pub message_id: Option<String>,
    pub user_id: Option<String>,
    pub to: Option<String>,
    /// Used as the routing key by subject-routed targets.
    pub subject: Option<String>,
    pub reply_to: Option<String>,
    pub correlation_id: Option<String>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub creation_time: Option<u64>,
}

/// Application-defined key/value annotations.
pub type ApplicationProperties = BTreeMap<String, String>;

/// A complete AMQP 1.0 message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    pub header: Option<Header>,
    pub properties: Option<Properties>,
    pub application_properties: ApplicationProperties,
    pub body: Bytes,
}

impl Message {
    /// A message consisting only of `body`.
    #[must_use]
    pub fn with_body(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    /// The subject property, if any.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.properties.as_ref().and_then(|p| p.subject.as_deref())
    }

    /// Split the message into fragments of at most `max_fragment_size` bytes.
    ///
    /// Sections are emitted in header, properties, application properties,
    /// data order. Absent sections and empty application properties are
    /// omitted; the data section is always present.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::num::NonZeroUsize;
    ///
    /// use amqp_bridge::{frame::SectionCode, message::Message};
    ///
    /// let message = Message::with_body(vec![7_u8; 10]);
    /// let limit = NonZeroUsize::new(4).expect("non-zero");
    /// let fragments = message.to_fragments(limit).expect("encodable");
    /// assert_eq!(fragments.len(), 3);
    /// assert!(fragments.iter().all(|f| f.section == SectionCode::Data));
    /// assert!(fragments[0].first && fragments[2].last);
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an [`EncodeError`] if a structured section fails to encode.
    pub fn to_fragments(&self, max_fragment_size: NonZeroUsize) -> Result<Vec<Fragment>, EncodeError> {
        let mut sections: Vec<(SectionCode, Bytes)> = Vec::with_capacity(4);
        if let Some(header) = &self.header {
            sections.push((SectionCode::Header, Bytes::from(header.to_bytes()?)));
        }
        if let Some(properties) = &self.properties {
            sections.push((SectionCode::Properties, Bytes::from(properties.to_bytes()?)));
        }
        if !self.application_properties.is_empty() {
            sections.push((
                SectionCode::ApplicationProperties,
                Bytes::from(self.application_properties.to_bytes()?),
            ));
        }
        sections.push((SectionCode::Data, self.body.clone()));

        let mut fragments = Vec::new();
        for (section, payload) in sections {
            split_section(section, &payload, max_fragment_size.get(), &mut fragments);
        }
        Ok(fragments)
    }
}

fn split_section(section: SectionCode, payload: &Bytes, limit: usize, out: &mut Vec<Fragment>) {
    if payload.is_empty() {
        out.push(Fragment::whole(section, Bytes::new()));
        return;
    }
    let count = payload.len().div_ceil(limit);
    for index in 0..count {
        let start = index * limit;
        let end = (start + limit).min(payload.len());
        out.push(Fragment {
            first: index == 0,
            last: index + 1 == count,
            section,
            payload: payload.slice(start..end),
        });
    }
}
