//! In-memory view of a session's transcript.
//!
//! While a prompt is in flight the tail holds a locally synthesized user
//! row with a negative sentinel id. Reconciliation after a completed turn
//! replaces the whole list with the server's rows — replacement, never a
//! merge, which is what guarantees no duplicate or stale placeholder
//! survives. After a failed or cancelled turn the placeholder stays put
//! so the user's draft is not erased.

use ember_core::ids::{MessageId, SessionId};
use ember_core::messages::MessageRow;

pub struct Transcript {
    session_id: SessionId,
    rows: Vec<MessageRow>,
    next_placeholder: i64,
}

impl Transcript {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            rows: Vec::new(),
            next_placeholder: -1,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn rows(&self) -> &[MessageRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append the optimistic user row for a just-submitted prompt and
    /// return its sentinel id. Each placeholder gets a fresh negative id
    /// so even overlapping histories never collide.
    pub fn push_placeholder(&mut self, content: &str, model: Option<String>) -> MessageId {
        let id = MessageId::new(self.next_placeholder);
        self.next_placeholder -= 1;
        self.rows
            .push(MessageRow::placeholder(id, self.session_id, content, model));
        id
    }

    /// Wholesale replacement with the authoritative list.
    pub fn replace_all(&mut self, rows: Vec<MessageRow>) {
        self.rows = rows;
    }

    pub fn has_placeholder(&self) -> bool {
        self.rows.iter().any(MessageRow::is_placeholder)
    }
}
