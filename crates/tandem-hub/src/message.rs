//! Wire protocol between sessions and the hub.
//!
//! Messages travel as JSON tuples with a string tag at element 0, e.g.
//! `["commit", {...change...}, 3]`. The serde impls are hand-written because
//! the shapes are positional, not keyed.

use std::fmt;

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tandem_common::{DocId, Version};
use tandem_ot::DocumentChange;

#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// `["open", docId, clientVersion]`
    Open { doc_id: DocId, version: Version },
    /// `["commit", change, clientVersion]` — targets the session's open doc.
    Commit {
        change: DocumentChange,
        version: Version,
    },
    /// `["close", docId]`
    Close { doc_id: DocId },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// `["openDone", serverVersion]`, optionally with catch-up changes. The
    /// hub never populates the catch-up slot; the wire keeps it for
    /// compatibility.
    OpenDone {
        version: Version,
        catchup: Option<Vec<DocumentChange>>,
    },
    /// `["commitDone", newVersion]` on the fast path, or
    /// `["commitDone", newVersion, rebasedChange, catchupChanges]` after a
    /// rebase.
    CommitDone {
        version: Version,
        rebased: Option<(DocumentChange, Vec<DocumentChange>)>,
    },
    /// `["update", newVersion, change]`
    Update {
        version: Version,
        change: DocumentChange,
    },
    /// `["error", detail]` — the session is closed on the hub side.
    Error { detail: String },
}

impl Serialize for ClientMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ClientMessage::Open { doc_id, version } => {
                let mut seq = serializer.serialize_seq(Some(3))?;
                seq.serialize_element("open")?;
                seq.serialize_element(doc_id)?;
                seq.serialize_element(version)?;
                seq.end()
            }
            ClientMessage::Commit { change, version } => {
                let mut seq = serializer.serialize_seq(Some(3))?;
                seq.serialize_element("commit")?;
                seq.serialize_element(change)?;
                seq.serialize_element(version)?;
                seq.end()
            }
            ClientMessage::Close { doc_id } => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element("close")?;
                seq.serialize_element(doc_id)?;
                seq.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for ClientMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MessageVisitor;

        impl<'de> Visitor<'de> for MessageVisitor {
            type Value = ClientMessage;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a tagged message tuple")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let tag: String = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                match tag.as_str() {
                    "open" => {
                        let doc_id = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                        let version = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(2, &self))?;
                        Ok(ClientMessage::Open { doc_id, version })
                    }
                    "commit" => {
                        let change = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                        let version = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(2, &self))?;
                        Ok(ClientMessage::Commit { change, version })
                    }
                    "close" => {
                        let doc_id = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                        Ok(ClientMessage::Close { doc_id })
                    }
                    other => Err(de::Error::unknown_variant(
                        other,
                        &["open", "commit", "close"],
                    )),
                }
            }
        }

        deserializer.deserialize_seq(MessageVisitor)
    }
}

impl Serialize for ServerMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ServerMessage::OpenDone { version, catchup } => {
                let len = if catchup.is_some() { 3 } else { 2 };
                let mut seq = serializer.serialize_seq(Some(len))?;
                seq.serialize_element("openDone")?;
                seq.serialize_element(version)?;
                if let Some(catchup) = catchup {
                    seq.serialize_element(catchup)?;
                }
                seq.end()
            }
            ServerMessage::CommitDone { version, rebased } => {
                let len = if rebased.is_some() { 4 } else { 2 };
                let mut seq = serializer.serialize_seq(Some(len))?;
                seq.serialize_element("commitDone")?;
                seq.serialize_element(version)?;
                if let Some((change, catchup)) = rebased {
                    seq.serialize_element(change)?;
                    seq.serialize_element(catchup)?;
                }
                seq.end()
            }
            ServerMessage::Update { version, change } => {
                let mut seq = serializer.serialize_seq(Some(3))?;
                seq.serialize_element("update")?;
                seq.serialize_element(version)?;
                seq.serialize_element(change)?;
                seq.end()
            }
            ServerMessage::Error { detail } => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element("error")?;
                seq.serialize_element(detail)?;
                seq.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for ServerMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MessageVisitor;

        impl<'de> Visitor<'de> for MessageVisitor {
            type Value = ServerMessage;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a tagged message tuple")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let tag: String = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                match tag.as_str() {
                    "openDone" => {
                        let version = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                        let catchup = seq.next_element()?;
                        Ok(ServerMessage::OpenDone { version, catchup })
                    }
                    "commitDone" => {
                        let version = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                        let rebased = match seq.next_element::<DocumentChange>()? {
                            Some(change) => {
                                let catchup = seq.next_element()?.ok_or_else(|| {
                                    de::Error::custom("commitDone with a rebased change but no catch-up")
                                })?;
                                Some((change, catchup))
                            }
                            None => None,
                        };
                        Ok(ServerMessage::CommitDone { version, rebased })
                    }
                    "update" => {
                        let version = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                        let change = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(2, &self))?;
                        Ok(ServerMessage::Update { version, change })
                    }
                    "error" => {
                        let detail = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                        Ok(ServerMessage::Error { detail })
                    }
                    other => Err(de::Error::unknown_variant(
                        other,
                        &["openDone", "commitDone", "update", "error"],
                    )),
                }
            }
        }

        deserializer.deserialize_seq(MessageVisitor)
    }
}
