//! Reassembly of transfer fragments into a [`Message`].
//!
//! A transfer carries its message as an ordered list of fragments. Each
//! section starts with a `first` fragment and ends with a `last` one, and
//! sections never interleave. [`MessageAssembler`] walks the list once,
//! tracking the open section much like a fragment series tracks indices, and
//! caps the reconstructed size before decoding anything.

use std::num::NonZeroUsize;

use bincode::error::DecodeError;
use bytes::{Bytes, BytesMut};
use thiserror::Error;

use super::{ApplicationProperties, Header, Message, Properties, Section};
use crate::frame::{Fragment, SectionCode};

/// Errors raised while reassembling a message.
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// The transfer carried no fragments.
    #[error("transfer carries no message sections")]
    Empty,
    /// A continuation fragment arrived with no open section.
    #[error("{section:?} fragment continues a section that was never started")]
    NotStarted { section: SectionCode },
    /// A fragment of a different section arrived before the open one ended.
    #[error("{found:?} fragment interleaved with unfinished {open:?} section")]
    Interleaved {
        open: SectionCode,
        found: SectionCode,
    },
    /// A structured section appeared twice.
    #[error("duplicate {section:?} section")]
    Duplicate { section: SectionCode },
    /// The last section never received its final fragment.
    #[error("{section:?} section is incomplete")]
    Incomplete { section: SectionCode },
    /// The reconstructed payload exceeds the configured cap.
    #[error("message size {attempted} exceeds limit {limit}")]
    TooLarge { attempted: usize, limit: usize },
    /// A structured section failed to decode.
    #[error("failed to decode {section:?} section: {source}")]
    Decode {
        section: SectionCode,
        #[source]
        source: DecodeError,
    },
}

#[derive(Debug)]
struct OpenSection {
    section: SectionCode,
    buffer: BytesMut,
}

#[derive(Debug, Default)]
struct Sections {
    header: Option<Bytes>,
    properties: Option<Bytes>,
    application_properties: Option<Bytes>,
    body: BytesMut,
}

impl Sections {
    fn close(&mut self, open: OpenSection) -> Result<(), AssemblyError> {
        let OpenSection { section, buffer } = open;
        let slot = match section {
            SectionCode::Data => {
                self.body.extend_from_slice(&buffer);
                return Ok(());
            }
            SectionCode::Header => &mut self.header,
            SectionCode::Properties => &mut self.properties,
            SectionCode::ApplicationProperties => &mut self.application_properties,
        };
        if slot.is_some() {
            return Err(AssemblyError::Duplicate { section });
        }
        *slot = Some(buffer.freeze());
        Ok(())
    }

    fn decode(self) -> Result<Message, AssemblyError> {
        Ok(Message {
            header: decode_opt::<Header>(SectionCode::Header, self.header)?,
            properties: decode_opt::<Properties>(SectionCode::Properties, self.properties)?,
            application_properties: decode_opt::<ApplicationProperties>(
                SectionCode::ApplicationProperties,
                self.application_properties,
            )?
            .unwrap_or_default(),
            body: self.body.freeze(),
        })
    }
}

fn decode_opt<S: Section>(
    section: SectionCode,
    bytes: Option<Bytes>,
) -> Result<Option<S>, AssemblyError> {
    bytes
        .map(|raw| {
            S::from_bytes(&raw)
                .map(|(value, _)| value)
                .map_err(|source| AssemblyError::Decode { section, source })
        })
        .transpose()
}

/// Stateless reassembler enforcing a maximum message size.
#[derive(Clone, Copy, Debug)]
pub struct MessageAssembler {
    max_message_size: NonZeroUsize,
}

impl MessageAssembler {
    /// Create an assembler rejecting messages larger than `max_message_size`.
    #[must_use]
    pub const fn new(max_message_size: NonZeroUsize) -> Self { Self { max_message_size } }

    /// Maximum reconstructed size in bytes.
    #[must_use]
    pub const fn max_message_size(&self) -> NonZeroUsize { self.max_message_size }

    /// Reassemble `fragments` into a message.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::num::NonZeroUsize;
    ///
    /// use amqp_bridge::{
    ///     frame::{Fragment, SectionCode},
    ///     message::MessageAssembler,
    /// };
    ///
    /// let assembler = MessageAssembler::new(NonZeroUsize::new(64).expect("non-zero"));
    /// let fragments = [
    ///     Fragment { first: true, last: false, section: SectionCode::Data, payload: "he".into() },
    ///     Fragment { first: false, last: true, section: SectionCode::Data, payload: "llo".into() },
    /// ];
    /// let message = assembler.assemble(&fragments).expect("well-formed");
    /// assert_eq!(message.body.as_ref(), b"hello");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::TooLarge`] once the combined payload exceeds
    /// the cap and another [`AssemblyError`] variant when the fragments are
    /// malformed.
    pub fn assemble(&self, fragments: &[Fragment]) -> Result<Message, AssemblyError> {
        if fragments.is_empty() {
            return Err(AssemblyError::Empty);
        }
        let limit = self.max_message_size.get();
        let mut total = 0_usize;
        let mut sections = Sections::default();
        let mut open: Option<OpenSection> = None;

        for fragment in fragments {
            total = total.saturating_add(fragment.payload.len());
            if total > limit {
                return Err(AssemblyError::TooLarge {
                    attempted: total,
                    limit,
                });
            }

            let mut current = match open.take() {
                Some(current) if fragment.first || current.section != fragment.section => {
                    return Err(AssemblyError::Interleaved {
                        open: current.section,
                        found: fragment.section,
                    });
                }
                Some(current) => current,
                None if fragment.first => OpenSection {
                    section: fragment.section,
                    buffer: BytesMut::new(),
                },
                None => {
                    return Err(AssemblyError::NotStarted {
                        section: fragment.section,
                    });
                }
            };
            current.buffer.extend_from_slice(&fragment.payload);

            if fragment.last {
                sections.close(current)?;
            } else {
                open = Some(current);
            }
        }

        if let Some(current) = open {
            return Err(AssemblyError::Incomplete {
                section: current.section,
            });
        }
        sections.decode()
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    fn part(first: bool, last: bool, section: SectionCode, payload: &'static [u8]) -> Fragment {
        Fragment {
            first,
            last,
            section,
            payload: Bytes::from_static(payload),
        }
    }

    #[fixture]
    fn assembler() -> MessageAssembler {
        MessageAssembler::new(NonZeroUsize::new(16).expect("non-zero limit"))
    }

    #[test]
    fn fragmented_message_round_trips() {
        let mut message = Message::with_body("0123456789");
        message.properties = Some(Properties {
            subject: Some("rk".into()),
            ..Properties::default()
        });
        let big = MessageAssembler::new(NonZeroUsize::new(1024).expect("non-zero"));
        let fragments = message
            .to_fragments(NonZeroUsize::new(3).expect("non-zero"))
            .expect("encode");
        assert_eq!(big.assemble(&fragments).expect("assemble"), message);
    }

    #[rstest]
    fn multiple_data_sections_concatenate(assembler: MessageAssembler) {
        let fragments = [
            part(true, true, SectionCode::Data, b"ab"),
            part(true, true, SectionCode::Data, b"cd"),
        ];
        let message = assembler.assemble(&fragments).expect("assemble");
        assert_eq!(message.body.as_ref(), b"abcd");
    }

    #[rstest]
    fn oversize_message_is_rejected(assembler: MessageAssembler) {
        let fragments = [
            part(true, false, SectionCode::Data, b"0123456789"),
            part(false, true, SectionCode::Data, b"0123456789"),
        ];
        let err = assembler.assemble(&fragments).expect_err("too large");
        assert!(matches!(
            err,
            AssemblyError::TooLarge {
                attempted: 20,
                limit: 16
            }
        ));
    }

    #[rstest]
    #[case::empty(&[], "no message sections")]
    #[case::not_started(&[part(false, true, SectionCode::Data, b"x")], "never started")]
    #[case::incomplete(&[part(true, false, SectionCode::Data, b"x")], "incomplete")]
    #[case::interleaved(
        &[
            part(true, false, SectionCode::Data, b"x"),
            part(true, true, SectionCode::Properties, b"y"),
        ],
        "interleaved"
    )]
    #[case::duplicate(
        &[
            part(true, true, SectionCode::Header, b""),
            part(true, true, SectionCode::Header, b""),
        ],
        "duplicate"
    )]
    fn malformed_fragments_are_rejected(
        assembler: MessageAssembler,
        #[case] fragments: &[Fragment],
        #[case] expected: &str,
    ) {
        let err = assembler.assemble(fragments).expect_err("malformed");
        assert!(err.to_string().contains(expected), "unexpected error: {err}");
    }

    #[rstest]
    fn undecodable_section_is_reported(assembler: MessageAssembler) {
        let fragments = [
            part(true, true, SectionCode::Header, b"\xff"),
            part(true, true, SectionCode::Data, b"x"),
        ];
        let err = assembler.assemble(&fragments).expect_err("bad header");
        assert!(matches!(
            err,
            AssemblyError::Decode {
                section: SectionCode::Header,
                ..
            }
        ));
    }
}
