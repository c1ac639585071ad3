use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rmlink_command::Message;
use rmlink_frame::Frame;

use crate::error::{Result, SessionError};

/// Continuation fired once with the response, or with `Cancelled` on close.
pub type Callback = Box<dyn FnOnce(Result<Message>) + Send + 'static>;

/// Identity of one outstanding request.
///
/// `peer` is the remote addressing byte: the receiver of the request and
/// therefore the sender of its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    pub peer: u8,
    pub set: u8,
    pub id: u8,
    pub seq: u16,
}

impl CorrelationKey {
    /// Key of an outgoing request.
    pub fn for_request(frame: &Frame) -> Self {
        Self {
            peer: frame.receiver,
            set: frame.cmd_set,
            id: frame.cmd_id,
            seq: frame.seq,
        }
    }

    /// Key of an incoming response.
    pub fn for_response(frame: &Frame) -> Self {
        Self {
            peer: frame.sender,
            set: frame.cmd_set,
            id: frame.cmd_id,
            seq: frame.seq,
        }
    }
}

/// Outstanding requests awaiting a response.
#[derive(Default)]
pub struct CorrelationTable {
    entries: Mutex<HashMap<CorrelationKey, Callback>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CorrelationKey, Callback>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a continuation. Fails if the key is already outstanding.
    pub fn insert(&self, key: CorrelationKey, callback: Callback) -> Result<()> {
        let mut entries = self.lock();
        if entries.contains_key(&key) {
            return Err(SessionError::DuplicateCorrelation {
                peer: key.peer,
                set: key.set,
                id: key.id,
                seq: key.seq,
            });
        }
        entries.insert(key, callback);
        Ok(())
    }

    /// Remove and return the continuation for `key`.
    pub fn take(&self, key: &CorrelationKey) -> Option<Callback> {
        self.lock().remove(key)
    }

    /// Fail every outstanding continuation with `Cancelled`.
    ///
    /// Continuations run after the lock is released. Returns how many fired.
    pub fn drain(&self) -> usize {
        let drained: Vec<Callback> = self.lock().drain().map(|(_, callback)| callback).collect();
        let count = drained.len();
        for callback in drained {
            callback(Err(SessionError::Cancelled));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl std::fmt::Debug for CorrelationTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationTable")
            .field("outstanding", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;

    use bytes::Bytes;
    use rmlink_command::register_all;

    use super::*;

    fn key(seq: u16) -> CorrelationKey {
        CorrelationKey {
            peer: 0x38,
            set: 0x00,
            id: 0x01,
            seq,
        }
    }

    #[test]
    fn request_and_response_keys_match() {
        let request = Frame::request(0x09, 0x38, 10001, true, 0x3f, 0xd1, Bytes::new());
        let response = request.response(vec![0u8]);
        assert_eq!(
            CorrelationKey::for_request(&request),
            CorrelationKey::for_response(&response)
        );
    }

    #[test]
    fn duplicate_insert_rejected() {
        let table = CorrelationTable::new();
        table.insert(key(1), Box::new(|_| {})).unwrap();
        let err = table.insert(key(1), Box::new(|_| {})).unwrap_err();
        assert!(matches!(
            err,
            SessionError::DuplicateCorrelation { seq: 1, .. }
        ));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn take_observes_insert_from_other_thread() {
        let table = Arc::new(CorrelationTable::new());
        let (tx, rx) = mpsc::channel();

        let inserter = {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                table
                    .insert(
                        key(7),
                        Box::new(move |result| {
                            tx.send(result.is_ok()).unwrap();
                        }),
                    )
                    .unwrap();
            })
        };
        inserter.join().unwrap();

        let frame = Frame::request(0x09, 0x38, 7, true, 0x00, 0x01, Bytes::new())
            .response(vec![0u8, 1, 2, 3, 4]);
        let message = register_all().decode(frame).unwrap();
        let callback = table.take(&key(7)).unwrap();
        callback(Ok(message));

        assert!(rx.recv().unwrap());
        assert!(table.take(&key(7)).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn drain_cancels_everything_once() {
        let table = CorrelationTable::new();
        let cancelled = Arc::new(AtomicUsize::new(0));
        for seq in 0..5 {
            let cancelled = Arc::clone(&cancelled);
            table
                .insert(
                    key(seq),
                    Box::new(move |result| {
                        assert!(matches!(result, Err(SessionError::Cancelled)));
                        cancelled.fetch_add(1, Ordering::SeqCst);
                    }),
                )
                .unwrap();
        }

        assert_eq!(table.drain(), 5);
        assert_eq!(table.drain(), 0);
        assert_eq!(cancelled.load(Ordering::SeqCst), 5);
        assert!(table.is_empty());
    }
}
