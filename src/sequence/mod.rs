//! Command sequences
//!
//! A `Sequence` queues commands on a batch handle, optionally groups some
//! of them into a nested transaction, and reconciles the raw replies into
//! an ordered, optionally aliased `Results`.
//!
//! ```ignore
//! let results = proxy
//!     .sequence()?
//!     .cmd("SET", args!["x", 42])?
//!     .transaction()?
//!     .cmd("INCR", ["x"])?
//!     .alias("incremented")?
//!     .commit()?
//!     .cmd("GET", ["x"])?
//!     .execute()?;
//! ```

pub mod batch;
pub mod results;

use std::sync::Arc;

use tracing::trace;

pub use batch::{BatchHandle, BatchMode, BufferedBatch, NodeBatch, SealedBatch};
pub use results::{Output, ResultKey, Results};

use crate::client::Command;
use crate::utils::{InvalidSequenceState, Result, Value};
use results::ResultMap;

/// Entries recorded for one level of the sequence
#[derive(Debug, Default)]
struct Frame {
    transactional: bool,
    map: ResultMap,
    /// Reply slots consumed so far
    slots: usize,
}

impl Frame {
    fn new(transactional: bool) -> Self {
        Self {
            transactional,
            ..Self::default()
        }
    }

    fn next_slot(&mut self) -> usize {
        let slot = self.slots;
        self.slots += 1;
        slot
    }
}

/// Chainable command batch
pub struct Sequence {
    batch: Box<dyn BatchHandle>,
    prefix: Option<Arc<[u8]>>,
    root: Frame,
    nested: Option<Frame>,
    /// Replies of immediately dispatched commands, in slot order
    captured: Option<Vec<Value>>,
}

impl Sequence {
    pub fn new(batch: Box<dyn BatchHandle>, mode: BatchMode, prefix: Option<Arc<[u8]>>) -> Self {
        let captured = batch.dispatches_immediately().then(Vec::new);
        Self {
            batch,
            prefix,
            root: Frame::new(mode.is_atomic()),
            nested: None,
            captured,
        }
    }

    pub fn is_transactional(&self) -> bool {
        self.root.transactional
    }

    /// Queue a command
    pub fn cmd<I, V>(mut self, name: &str, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let command = Command::new(name, args).prefixed(self.prefix.as_deref());
        trace!("Queueing {:?}", command);
        let reply = self.batch.queue(command)?;

        match self.nested.as_mut() {
            Some(frame) => {
                let slot = frame.next_slot();
                frame.map.push_direct(slot);
            }
            None => {
                let slot = self.root.next_slot();
                self.root.map.push_direct(slot);
                self.capture(reply);
            }
        }
        Ok(self)
    }

    /// Rename the result of the last queued command
    pub fn alias(mut self, alias: &str) -> Result<Self> {
        let frame = self.nested.as_mut().unwrap_or(&mut self.root);
        if !frame.map.rename_last(alias) {
            return Err(InvalidSequenceState::AliasWithoutCommand.into());
        }
        Ok(self)
    }

    /// Open a nested transaction; its results land in a single entry
    pub fn transaction(mut self) -> Result<Self> {
        if self.root.transactional || self.nested.is_some() {
            return Err(InvalidSequenceState::NestedTransaction.into());
        }
        self.batch.begin_atomic()?;
        self.nested = Some(Frame::new(true));
        Ok(self)
    }

    /// Close the nested transaction and return to the enclosing sequence
    pub fn commit(mut self) -> Result<Self> {
        let Some(frame) = self.nested.take() else {
            return Err(InvalidSequenceState::CommitWithoutTransaction.into());
        };
        let reply = self.batch.end_atomic()?;

        let slot = self.root.next_slot();
        self.root.map.push_nested(slot, frame.map);
        self.capture(reply);
        Ok(self)
    }

    /// Run the batch and reconcile its replies
    pub fn execute(self) -> Result<Results> {
        if self.nested.is_some() {
            return Err(InvalidSequenceState::UncommittedTransaction.into());
        }

        let raw = match self.captured {
            Some(captured) => {
                self.batch.execute()?;
                captured
            }
            None => self.batch.execute()?,
        };
        Ok(self.root.map.reconcile(raw))
    }

    fn capture(&mut self, reply: Option<Value>) {
        if let (Some(captured), Some(value)) = (self.captured.as_mut(), reply) {
            captured.push(value);
        }
    }
}
