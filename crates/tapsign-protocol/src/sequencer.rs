//! Message index discipline for one poll/feed session.
//!
//! Indices are strictly increasing within a session, and only one message
//! may be in flight at a time. A reply is accepted only for the message that
//! is currently outstanding; anything else is rejected without changing
//! state, so a misdelivered reply never advances the loop.

use crate::error::{ProtocolError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageSequencer {
    last_sent: Option<u32>,
    outstanding: Option<u32>,
    exchanged: u64,
}

impl MessageSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the message with `index` is about to be transported.
    ///
    /// # Errors
    /// - `ReplyOutstanding` if the previous message has not been answered
    /// - `IndexReused` if `index` is not greater than the last sent index
    pub fn record_sent(&mut self, index: u32) -> Result<()> {
        if let Some(outstanding) = self.outstanding {
            return Err(ProtocolError::ReplyOutstanding { index, outstanding });
        }
        if let Some(last) = self.last_sent
            && index <= last
        {
            return Err(ProtocolError::IndexReused { index, last });
        }
        self.last_sent = Some(index);
        self.outstanding = Some(index);
        Ok(())
    }

    /// Accept the reply for `index`.
    ///
    /// # Errors
    /// - `UnexpectedReply` if nothing is outstanding
    /// - `IndexMismatch` if `index` is not the outstanding message
    pub fn accept_reply(&mut self, index: u32) -> Result<()> {
        match self.outstanding {
            None => Err(ProtocolError::UnexpectedReply { index }),
            Some(expected) if expected != index => Err(ProtocolError::IndexMismatch {
                expected,
                actual: index,
            }),
            Some(_) => {
                self.outstanding = None;
                self.exchanged += 1;
                Ok(())
            }
        }
    }

    /// Index of the message awaiting a reply.
    pub fn outstanding(&self) -> Option<u32> {
        self.outstanding
    }

    pub fn last_sent(&self) -> Option<u32> {
        self.last_sent
    }

    /// Completed request/reply pairs.
    pub fn exchanged(&self) -> u64 {
        self.exchanged
    }

    /// Forget everything; used when a new session starts.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_happy_path() {
        let mut seq = MessageSequencer::new();
        seq.record_sent(0).unwrap();
        assert_eq!(seq.outstanding(), Some(0));
        seq.accept_reply(0).unwrap();
        seq.record_sent(1).unwrap();
        seq.accept_reply(1).unwrap();

        assert_eq!(seq.exchanged(), 2);
        assert_eq!(seq.last_sent(), Some(1));
        assert_eq!(seq.outstanding(), None);
    }

    #[test]
    fn test_gaps_are_allowed() {
        let mut seq = MessageSequencer::new();
        seq.record_sent(3).unwrap();
        seq.accept_reply(3).unwrap();
        seq.record_sent(10).unwrap();
        assert_eq!(seq.outstanding(), Some(10));
    }

    #[rstest]
    #[case(4)]
    #[case(6)]
    #[case(0)]
    fn test_wrong_reply_index_does_not_advance(#[case] wrong: u32) {
        let mut seq = MessageSequencer::new();
        seq.record_sent(5).unwrap();

        let error = seq.accept_reply(wrong).unwrap_err();
        assert!(matches!(
            error,
            ProtocolError::IndexMismatch { expected: 5, actual } if actual == wrong
        ));
        assert_eq!(seq.outstanding(), Some(5));
        assert_eq!(seq.exchanged(), 0);

        seq.accept_reply(5).unwrap();
        assert_eq!(seq.exchanged(), 1);
    }

    #[rstest]
    #[case(2)]
    #[case(1)]
    fn test_index_reuse_rejected(#[case] index: u32) {
        let mut seq = MessageSequencer::new();
        seq.record_sent(2).unwrap();
        seq.accept_reply(2).unwrap();

        let error = seq.record_sent(index).unwrap_err();
        assert!(matches!(error, ProtocolError::IndexReused { last: 2, .. }));
        assert_eq!(seq.last_sent(), Some(2));
    }

    #[test]
    fn test_send_while_outstanding_rejected() {
        let mut seq = MessageSequencer::new();
        seq.record_sent(0).unwrap();
        let error = seq.record_sent(1).unwrap_err();
        assert!(matches!(
            error,
            ProtocolError::ReplyOutstanding {
                index: 1,
                outstanding: 0
            }
        ));
    }

    #[test]
    fn test_reply_without_message() {
        let mut seq = MessageSequencer::new();
        assert!(matches!(
            seq.accept_reply(0),
            Err(ProtocolError::UnexpectedReply { index: 0 })
        ));
    }

    #[test]
    fn test_reset() {
        let mut seq = MessageSequencer::new();
        seq.record_sent(9).unwrap();
        seq.reset();
        assert_eq!(seq, MessageSequencer::default());
        seq.record_sent(0).unwrap();
    }
}
