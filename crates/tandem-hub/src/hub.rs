//! The per-document linearizer.
//!
//! The hub owns the canonical document and change log for every document it
//! coordinates. Commits are handled one at a time in arrival order, and the
//! resulting `update` broadcast goes out before the next request is taken,
//! so every session observes a stream consistent with the log's total order.

use std::sync::mpsc::{Receiver, Sender};

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use tandem_common::{DocId, OtError, OtResult, SessionId, Version};
use tandem_ot::{rebase_onto, DocumentChange, DocumentStore, MapDocument, ObjectOp};

use crate::message::{ClientMessage, ServerMessage};

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Reject commits that create over an existing value instead of
    /// overwriting it.
    pub strict_create: bool,
    /// Drop NOPs from rebased changes before storing and sending them.
    pub compact_nops: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig {
            strict_create: false,
            compact_nops: false,
        }
    }
}

/// One inbound event for [Hub::run]: the merged stream of every session.
#[derive(Debug)]
pub enum HubRequest {
    Connect {
        session: SessionId,
        outbox: Sender<ServerMessage>,
    },
    Message {
        session: SessionId,
        message: ClientMessage,
    },
    Disconnect { session: SessionId },
}

struct DocState {
    version: Version,
    changes: Vec<DocumentChange>,
    document: MapDocument,
    sessions: FxHashSet<SessionId>,
}

impl DocState {
    fn new(document: MapDocument) -> Self {
        DocState {
            version: 1,
            changes: Vec::new(),
            document,
            sessions: FxHashSet::default(),
        }
    }
}

pub struct Hub {
    config: HubConfig,
    outboxes: FxHashMap<SessionId, Sender<ServerMessage>>,
    /// Which document each session has open.
    bindings: FxHashMap<SessionId, DocId>,
    docs: FxHashMap<DocId, DocState>,
}

impl Default for Hub {
    fn default() -> Self {
        Hub::new(HubConfig::default())
    }
}

impl Hub {
    pub fn new(config: HubConfig) -> Self {
        Hub {
            config,
            outboxes: FxHashMap::default(),
            bindings: FxHashMap::default(),
            docs: FxHashMap::default(),
        }
    }

    /// Seed a document before any session opens it. An unseeded doc starts
    /// empty at version 1.
    pub fn insert_document(&mut self, doc_id: impl Into<DocId>, document: MapDocument) {
        self.docs.insert(doc_id.into(), DocState::new(document));
    }

    pub fn document(&self, doc_id: &str) -> Option<&MapDocument> {
        self.docs.get(doc_id).map(|d| &d.document)
    }

    pub fn version(&self, doc_id: &str) -> Option<Version> {
        self.docs.get(doc_id).map(|d| d.version)
    }

    pub fn changes(&self, doc_id: &str) -> Option<&[DocumentChange]> {
        self.docs.get(doc_id).map(|d| d.changes.as_slice())
    }

    pub fn connect(&mut self, session: SessionId, outbox: Sender<ServerMessage>) {
        self.outboxes.insert(session, outbox);
    }

    pub fn disconnect(&mut self, session: SessionId) {
        self.outboxes.remove(&session);
        self.bindings.remove(&session);
        for doc in self.docs.values_mut() {
            doc.sessions.remove(&session);
        }
    }

    /// Drain the merged request stream until every sender is dropped.
    pub fn run(&mut self, requests: Receiver<HubRequest>) {
        for request in requests {
            self.handle_request(request);
        }
    }

    pub fn handle_request(&mut self, request: HubRequest) {
        match request {
            HubRequest::Connect { session, outbox } => self.connect(session, outbox),
            HubRequest::Message { session, message } => self.handle_message(session, message),
            HubRequest::Disconnect { session } => self.disconnect(session),
        }
    }

    /// Handle one client message. Errors are fatal to the session: it is
    /// told why and then disconnected, and no partial state is left behind.
    pub fn handle_message(&mut self, session: SessionId, message: ClientMessage) {
        if let Err(err) = self.dispatch(session, message) {
            warn!(session, %err, "closing session");
            self.send(session, ServerMessage::Error {
                detail: err.to_string(),
            });
            self.disconnect(session);
        }
    }

    fn dispatch(&mut self, session: SessionId, message: ClientMessage) -> OtResult<()> {
        match message {
            ClientMessage::Open { doc_id, version } => self.handle_open(session, doc_id, version),
            ClientMessage::Commit { change, version } => {
                self.handle_commit(session, change, version)
            }
            ClientMessage::Close { doc_id } => self.handle_close(session, doc_id),
        }
    }

    fn handle_open(
        &mut self,
        session: SessionId,
        doc_id: DocId,
        client_version: Version,
    ) -> OtResult<()> {
        let doc = self
            .docs
            .entry(doc_id.clone())
            .or_insert_with(|| DocState::new(MapDocument::new()));
        doc.sessions.insert(session);
        let version = doc.version;
        if client_version < version {
            debug!(session, doc = %doc_id, client_version, version, "session opened behind");
        }
        self.bindings.insert(session, doc_id);
        self.send(
            session,
            ServerMessage::OpenDone {
                version,
                catchup: None,
            },
        );
        Ok(())
    }

    fn handle_close(&mut self, session: SessionId, doc_id: DocId) -> OtResult<()> {
        if let Some(doc) = self.docs.get_mut(&doc_id) {
            doc.sessions.remove(&session);
        }
        if self.bindings.get(&session) == Some(&doc_id) {
            self.bindings.remove(&session);
        }
        Ok(())
    }

    fn handle_commit(
        &mut self,
        session: SessionId,
        change: DocumentChange,
        client_version: Version,
    ) -> OtResult<()> {
        let doc_id = self
            .bindings
            .get(&session)
            .cloned()
            .ok_or_else(|| OtError::NotFound("an open document for this session".into()))?;
        let config = self.config.clone();
        let doc = self
            .docs
            .get_mut(&doc_id)
            .ok_or_else(|| OtError::NotFound(doc_id.clone().into_boxed_str()))?;

        if client_version > doc.version {
            return Err(OtError::InvalidVersion {
                claimed: client_version,
                actual: doc.version,
            });
        }
        if client_version == 0 {
            return Err(OtError::Decode("commit with version 0".into()));
        }

        let (version, committed, reply) = if client_version == doc.version {
            // Fast path: the client is current.
            Self::apply_checked(&config, doc, &change)?;
            doc.changes.push(change.clone());
            doc.version += 1;
            debug!(doc = %doc_id, version = doc.version, "commit applied");
            (
                doc.version,
                Some(change),
                ServerMessage::CommitDone {
                    version: doc.version,
                    rebased: None,
                },
            )
        } else {
            // Rebase path: transform the stale change across everything the
            // client has not seen, then apply the result.
            let missed = &doc.changes[(client_version - 1) as usize..];
            let (mut rebased, mut catchup) = rebase_onto(&change, missed)?;
            if config.compact_nops {
                rebased.compact();
                for c in &mut catchup {
                    c.compact();
                }
            }
            debug!(
                doc = %doc_id,
                client_version,
                version = doc.version,
                missed = catchup.len(),
                "commit rebased"
            );
            if rebased.is_nop() {
                // The change was transformed away entirely; acknowledge at
                // the current version without extending the log.
                (
                    doc.version,
                    None,
                    ServerMessage::CommitDone {
                        version: doc.version,
                        rebased: Some((rebased, catchup)),
                    },
                )
            } else {
                Self::apply_checked(&config, doc, &rebased)?;
                doc.changes.push(rebased.clone());
                doc.version += 1;
                (
                    doc.version,
                    Some(rebased.clone()),
                    ServerMessage::CommitDone {
                        version: doc.version,
                        rebased: Some((rebased, catchup)),
                    },
                )
            }
        };

        let peers: Vec<SessionId> = self
            .docs
            .get(&doc_id)
            .map(|d| d.sessions.iter().copied().filter(|s| *s != session).collect())
            .unwrap_or_default();

        // Acknowledge the committer before revealing anything newer to it,
        // then broadcast so no later commit can be processed first.
        self.send(session, reply);
        if let Some(change) = committed {
            for peer in peers {
                self.send(
                    peer,
                    ServerMessage::Update {
                        version,
                        change: change.clone(),
                    },
                );
            }
        }
        Ok(())
    }

    /// Apply a change to a scratch copy first so a failing batch leaves the
    /// canonical document untouched.
    fn apply_checked(
        config: &HubConfig,
        doc: &mut DocState,
        change: &DocumentChange,
    ) -> OtResult<()> {
        if config.strict_create {
            for op in change.ops() {
                if let ObjectOp::Create { path, .. } = op {
                    if doc.document.get(path).is_some() {
                        return Err(OtError::Adapter(
                            format!("create over an existing value at \"{path}\"")
                                .into_boxed_str(),
                        ));
                    }
                }
            }
        }
        let mut scratch = doc.document.clone();
        scratch.apply_change(change)?;
        doc.document = scratch;
        Ok(())
    }

    /// Deliver a message; a dead outbox drops the session.
    fn send(&mut self, session: SessionId, message: ServerMessage) {
        let dead = match self.outboxes.get(&session) {
            Some(outbox) => outbox.send(message).is_err(),
            None => false,
        };
        if dead {
            debug!(session, "outbox closed, dropping session");
            self.disconnect(session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::mpsc;
    use tandem_ot::TextOp;

    fn connect(hub: &mut Hub, session: SessionId) -> mpsc::Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel();
        hub.connect(session, tx);
        rx
    }

    fn open(hub: &mut Hub, session: SessionId, doc: &str, version: Version) {
        hub.handle_message(
            session,
            ClientMessage::Open {
                doc_id: doc.into(),
                version,
            },
        );
    }

    #[test]
    fn commit_before_open_is_fatal() {
        let mut hub = Hub::default();
        let rx = connect(&mut hub, 1);
        hub.handle_message(
            1,
            ClientMessage::Commit {
                change: DocumentChange::new([ObjectOp::create("x", 1)]),
                version: 1,
            },
        );
        assert!(matches!(rx.recv().unwrap(), ServerMessage::Error { .. }));
    }

    #[test]
    fn invalid_version_is_fatal_and_rolls_back_nothing() {
        let mut hub = Hub::default();
        let rx = connect(&mut hub, 1);
        open(&mut hub, 1, "d", 1);
        rx.recv().unwrap();
        hub.handle_message(
            1,
            ClientMessage::Commit {
                change: DocumentChange::new([ObjectOp::create("x", 1)]),
                version: 7,
            },
        );
        assert!(matches!(rx.recv().unwrap(), ServerMessage::Error { .. }));
        assert_eq!(hub.version("d"), Some(1));
        assert_eq!(hub.document("d").unwrap().to_value(), json!({}));
    }

    #[test]
    fn failed_apply_leaves_document_untouched() {
        let mut hub = Hub::default();
        hub.insert_document("d", MapDocument::from_value(json!({"t": "ab"})).unwrap());
        let rx = connect(&mut hub, 1);
        open(&mut hub, 1, "d", 1);
        rx.recv().unwrap();
        // Second op is out of bounds; the first must not stick.
        hub.handle_message(
            1,
            ClientMessage::Commit {
                change: DocumentChange::new([
                    ObjectOp::create("x", 1),
                    ObjectOp::update("t", TextOp::insert(9, "!")),
                ]),
                version: 1,
            },
        );
        assert!(matches!(rx.recv().unwrap(), ServerMessage::Error { .. }));
        assert_eq!(hub.document("d").unwrap().to_value(), json!({"t": "ab"}));
        assert_eq!(hub.version("d"), Some(1));
    }

    #[test]
    fn strict_create_rejects_existing_paths() {
        let mut hub = Hub::new(HubConfig {
            strict_create: true,
            ..HubConfig::default()
        });
        hub.insert_document("d", MapDocument::from_value(json!({"x": 1})).unwrap());
        let rx = connect(&mut hub, 1);
        open(&mut hub, 1, "d", 1);
        rx.recv().unwrap();
        hub.handle_message(
            1,
            ClientMessage::Commit {
                change: DocumentChange::new([ObjectOp::create("x", 2)]),
                version: 1,
            },
        );
        assert!(matches!(rx.recv().unwrap(), ServerMessage::Error { .. }));
        assert_eq!(hub.document("d").unwrap().to_value(), json!({"x": 1}));
    }

    #[test]
    fn default_create_overwrites() {
        let mut hub = Hub::default();
        hub.insert_document("d", MapDocument::from_value(json!({"x": 1})).unwrap());
        let rx = connect(&mut hub, 1);
        open(&mut hub, 1, "d", 1);
        rx.recv().unwrap();
        hub.handle_message(
            1,
            ClientMessage::Commit {
                change: DocumentChange::new([ObjectOp::create("x", 2)]),
                version: 1,
            },
        );
        assert!(matches!(
            rx.recv().unwrap(),
            ServerMessage::CommitDone { version: 2, rebased: None }
        ));
        assert_eq!(hub.document("d").unwrap().to_value(), json!({"x": 2}));
    }

    #[test]
    fn close_stops_broadcasts() {
        let mut hub = Hub::default();
        let rx1 = connect(&mut hub, 1);
        let rx2 = connect(&mut hub, 2);
        open(&mut hub, 1, "d", 1);
        open(&mut hub, 2, "d", 1);
        rx1.recv().unwrap();
        rx2.recv().unwrap();
        hub.handle_message(2, ClientMessage::Close { doc_id: "d".into() });
        hub.handle_message(
            1,
            ClientMessage::Commit {
                change: DocumentChange::new([ObjectOp::create("x", 1)]),
                version: 1,
            },
        );
        assert!(matches!(rx1.recv().unwrap(), ServerMessage::CommitDone { .. }));
        assert!(rx2.try_recv().is_err());
    }
}
