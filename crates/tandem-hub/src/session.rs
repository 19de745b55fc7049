//! The client-side session state machine.
//!
//! `closed → opening → synced ↔ committing → closed`. A session owns its
//! local mirror of the document and the bookkeeping for one in-flight commit;
//! it produces outbound [ClientMessage]s and consumes inbound
//! [ServerMessage]s.

use tracing::{debug, warn};

use tandem_common::{DocId, OtError, OtResult, Version};
use tandem_ot::{DocumentChange, MapDocument};

use crate::message::{ClientMessage, ServerMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Closed,
    Opening,
    Synced,
    Committing,
}

impl SessionStatus {
    fn name(self) -> &'static str {
        match self {
            SessionStatus::Closed => "closed",
            SessionStatus::Opening => "opening",
            SessionStatus::Synced => "synced",
            SessionStatus::Committing => "committing",
        }
    }
}

pub struct Session {
    doc_id: DocId,
    status: SessionStatus,
    last_known_version: Version,
    document: MapDocument,
    /// The local change sent but not yet acknowledged.
    pending_local: Option<DocumentChange>,
    /// Updates received while a commit was in flight.
    queued: Vec<(Version, DocumentChange)>,
}

impl Session {
    pub fn new(doc_id: impl Into<DocId>) -> Self {
        Session {
            doc_id: doc_id.into(),
            status: SessionStatus::Closed,
            last_known_version: 0,
            document: MapDocument::new(),
            pending_local: None,
            queued: Vec::new(),
        }
    }

    /// A session over an already-known local mirror, e.g. a checkout.
    pub fn with_document(doc_id: impl Into<DocId>, document: MapDocument) -> Self {
        Session {
            document,
            ..Session::new(doc_id)
        }
    }

    #[inline]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    #[inline]
    pub fn last_known_version(&self) -> Version {
        self.last_known_version
    }

    #[inline]
    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    #[inline]
    pub fn document(&self) -> &MapDocument {
        &self.document
    }

    #[inline]
    pub fn pending_local(&self) -> Option<&DocumentChange> {
        self.pending_local.as_ref()
    }

    fn expect(&self, expected: SessionStatus) -> OtResult<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(OtError::SessionState {
                expected: expected.name(),
                found: self.status.name(),
            })
        }
    }

    /// Begin opening the document on the hub.
    pub fn open(&mut self) -> OtResult<ClientMessage> {
        self.expect(SessionStatus::Closed)?;
        self.status = SessionStatus::Opening;
        Ok(ClientMessage::Open {
            doc_id: self.doc_id.clone(),
            version: self.last_known_version,
        })
    }

    /// Apply a local edit and produce the commit for it. One commit may be
    /// in flight at a time.
    pub fn commit(&mut self, change: DocumentChange) -> OtResult<ClientMessage> {
        self.expect(SessionStatus::Synced)?;
        change.apply(&mut self.document)?;
        self.pending_local = Some(change.clone());
        self.status = SessionStatus::Committing;
        Ok(ClientMessage::Commit {
            change,
            version: self.last_known_version,
        })
    }

    pub fn close(&mut self) -> ClientMessage {
        self.status = SessionStatus::Closed;
        self.pending_local = None;
        self.queued.clear();
        ClientMessage::Close {
            doc_id: self.doc_id.clone(),
        }
    }

    /// Consume one inbound message from the hub.
    pub fn handle_message(&mut self, message: ServerMessage) -> OtResult<()> {
        match message {
            ServerMessage::OpenDone { version, catchup } => {
                self.expect(SessionStatus::Opening)?;
                if let Some(catchup) = catchup {
                    for change in &catchup {
                        change.apply(&mut self.document)?;
                    }
                }
                self.last_known_version = version;
                self.status = SessionStatus::Synced;
                debug!(doc = %self.doc_id, version, "session synced");
                Ok(())
            }
            ServerMessage::Update { version, change } => match self.status {
                SessionStatus::Synced => {
                    change.apply(&mut self.document)?;
                    self.last_known_version = version;
                    Ok(())
                }
                SessionStatus::Committing => {
                    self.queued.push((version, change));
                    Ok(())
                }
                status => Err(OtError::SessionState {
                    expected: "synced or committing",
                    found: status.name(),
                }),
            },
            ServerMessage::CommitDone { version, rebased } => {
                self.expect(SessionStatus::Committing)?;
                if let Some((_rebased, catchup)) = rebased {
                    // The catch-up changes are the missed commits already
                    // transformed past our pending change, so they apply
                    // cleanly on top of the local state.
                    for change in &catchup {
                        change.apply(&mut self.document)?;
                    }
                }
                self.pending_local = None;
                self.last_known_version = version;
                self.status = SessionStatus::Synced;
                // Updates that raced with the commit and are covered by the
                // catch-up were superseded; later ones already account for
                // our commit in the hub's order.
                let queued = std::mem::take(&mut self.queued);
                for (v, change) in queued {
                    if v <= self.last_known_version {
                        continue;
                    }
                    change.apply(&mut self.document)?;
                    self.last_known_version = v;
                }
                Ok(())
            }
            ServerMessage::Error { detail } => {
                warn!(doc = %self.doc_id, %detail, "hub closed the session");
                self.status = SessionStatus::Closed;
                self.pending_local = None;
                self.queued.clear();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tandem_ot::{ObjectOp, TextOp};

    fn synced_session() -> Session {
        let mut s = Session::new("d");
        s.open().unwrap();
        s.handle_message(ServerMessage::OpenDone {
            version: 1,
            catchup: None,
        })
        .unwrap();
        s
    }

    #[test]
    fn open_handshake() {
        let mut s = Session::new("d");
        assert_eq!(s.status(), SessionStatus::Closed);
        let msg = s.open().unwrap();
        assert_eq!(
            msg,
            ClientMessage::Open {
                doc_id: "d".into(),
                version: 0
            }
        );
        assert_eq!(s.status(), SessionStatus::Opening);
        s.handle_message(ServerMessage::OpenDone {
            version: 3,
            catchup: None,
        })
        .unwrap();
        assert_eq!(s.status(), SessionStatus::Synced);
        assert_eq!(s.last_known_version(), 3);
    }

    #[test]
    fn commit_requires_synced() {
        let mut s = Session::new("d");
        assert!(matches!(
            s.commit(DocumentChange::new([ObjectOp::create("x", 1)])),
            Err(OtError::SessionState { .. })
        ));
    }

    #[test]
    fn commit_applies_locally_and_tracks_pending() {
        let mut s = synced_session();
        let change = DocumentChange::new([ObjectOp::create("title", "Hi")]);
        let msg = s.commit(change.clone()).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Commit {
                change: change.clone(),
                version: 1
            }
        );
        assert_eq!(s.status(), SessionStatus::Committing);
        assert_eq!(s.pending_local(), Some(&change));
        assert_eq!(s.document().to_value(), json!({"title": "Hi"}));

        s.handle_message(ServerMessage::CommitDone {
            version: 2,
            rebased: None,
        })
        .unwrap();
        assert_eq!(s.status(), SessionStatus::Synced);
        assert_eq!(s.last_known_version(), 2);
        assert_eq!(s.pending_local(), None);
    }

    #[test]
    fn update_while_synced_applies() {
        let mut s = synced_session();
        s.handle_message(ServerMessage::Update {
            version: 2,
            change: DocumentChange::new([ObjectOp::create("x", 1)]),
        })
        .unwrap();
        assert_eq!(s.document().to_value(), json!({"x": 1}));
        assert_eq!(s.last_known_version(), 2);
    }

    #[test]
    fn update_while_committing_is_queued_then_superseded() {
        let mut s = synced_session();
        s.commit(DocumentChange::new([ObjectOp::create("a", 1)]))
            .unwrap();
        // A concurrent commit broadcast before ours was processed.
        s.handle_message(ServerMessage::Update {
            version: 2,
            change: DocumentChange::new([ObjectOp::create("b", 2)]),
        })
        .unwrap();
        assert_eq!(s.document().to_value(), json!({"a": 1}));

        // The hub rebased us past it; the queued update is covered by the
        // catch-up and must not double-apply.
        s.handle_message(ServerMessage::CommitDone {
            version: 3,
            rebased: Some((
                DocumentChange::new([ObjectOp::create("a", 1)]),
                vec![DocumentChange::new([ObjectOp::create("b", 2)])],
            )),
        })
        .unwrap();
        assert_eq!(s.status(), SessionStatus::Synced);
        assert_eq!(s.last_known_version(), 3);
        assert_eq!(s.document().to_value(), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn rebase_with_text_updates() {
        let mut s = synced_session();
        s.handle_message(ServerMessage::Update {
            version: 2,
            change: DocumentChange::new([ObjectOp::create("title", "Hello")]),
        })
        .unwrap();
        s.commit(DocumentChange::new([ObjectOp::update(
            "title",
            TextOp::insert(5, "!"),
        )]))
        .unwrap();
        s.handle_message(ServerMessage::CommitDone {
            version: 4,
            rebased: Some((
                DocumentChange::new([ObjectOp::update("title", TextOp::insert(6, "!"))]),
                vec![DocumentChange::new([ObjectOp::update(
                    "title",
                    TextOp::insert(0, ">"),
                )])],
            )),
        })
        .unwrap();
        assert_eq!(s.document().to_value(), json!({"title": ">Hello!"}));
        assert_eq!(s.last_known_version(), 4);
    }

    #[test]
    fn error_closes_the_session() {
        let mut s = synced_session();
        s.handle_message(ServerMessage::Error {
            detail: "Client version 9 is ahead of the hub version 1".into(),
        })
        .unwrap();
        assert_eq!(s.status(), SessionStatus::Closed);
    }

    #[test]
    fn reopen_after_close() {
        let mut s = synced_session();
        s.close();
        assert_eq!(s.status(), SessionStatus::Closed);
        s.open().unwrap();
        assert_eq!(s.status(), SessionStatus::Opening);
    }
}
