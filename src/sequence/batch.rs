//! Batch handles: how queued commands reach a node
//!
//! A `BufferedBatch` accumulates commands locally and writes them in one
//! pipeline when executed. In pipeline mode every command owns one reply
//! slot and an atomic group (`MULTI ... EXEC`) owns a single slot holding
//! the EXEC array. In transaction mode the whole batch is wrapped in
//! `MULTI ... EXEC` and the EXEC array is the result.

use std::fmt;

use tracing::debug;

use crate::client::{Command, SharedConnection};
use crate::utils::{ClientError, InvalidSequenceState, ProtocolError, RespValue, Result, Value};

/// Batching discipline requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    Pipeline,
    Transaction,
}

impl BatchMode {
    pub fn is_atomic(self) -> bool {
        self == BatchMode::Transaction
    }

    /// Name of the facade entry point opening this kind of batch
    pub fn operation(self) -> &'static str {
        match self {
            BatchMode::Pipeline => "sequence",
            BatchMode::Transaction => "transaction",
        }
    }
}

impl fmt::Display for BatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.operation())
    }
}

/// An open command batch on one connection
pub trait BatchHandle: Send {
    /// Queue a command. Batches that dispatch immediately return its reply.
    fn queue(&mut self, command: Command) -> Result<Option<Value>>;

    /// Open an atomic group inside a pipelined batch
    fn begin_atomic(&mut self) -> Result<()>;

    /// Close the atomic group. Batches that dispatch immediately return
    /// the group's EXEC reply.
    fn end_atomic(&mut self) -> Result<Option<Value>>;

    /// Run the batch and return one raw result per reply slot
    fn execute(self: Box<Self>) -> Result<Vec<Value>>;

    /// Whether `queue` sends each command right away
    fn dispatches_immediately(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reply {
    /// Reply fills the next result slot
    Slot,
    /// Reply is a MULTI acknowledgement or QUEUED marker
    Discard,
}

/// Commands accumulated for a single pipeline write
#[derive(Debug)]
pub struct BufferedBatch {
    mode: BatchMode,
    commands: Vec<Command>,
    plan: Vec<Reply>,
    in_group: bool,
    queued: usize,
}

impl BufferedBatch {
    pub fn new(mode: BatchMode) -> Self {
        let mut batch = Self {
            mode,
            commands: Vec::new(),
            plan: Vec::new(),
            in_group: false,
            queued: 0,
        };
        if mode.is_atomic() {
            batch.push_raw(multi(), Reply::Discard);
        }
        batch
    }

    fn push_raw(&mut self, command: Command, reply: Reply) {
        self.commands.push(command);
        self.plan.push(reply);
    }

    pub fn push(&mut self, command: Command) {
        let reply = if self.mode.is_atomic() || self.in_group {
            Reply::Discard
        } else {
            Reply::Slot
        };
        self.push_raw(command, reply);
        self.queued += 1;
    }

    pub fn begin_group(&mut self) -> Result<()> {
        if self.mode.is_atomic() || self.in_group {
            return Err(InvalidSequenceState::NestedTransaction.into());
        }
        self.push_raw(multi(), Reply::Discard);
        self.in_group = true;
        Ok(())
    }

    pub fn end_group(&mut self) -> Result<()> {
        if !self.in_group {
            return Err(InvalidSequenceState::CommitWithoutTransaction.into());
        }
        self.push_raw(exec(), Reply::Slot);
        self.in_group = false;
        self.queued += 1;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.queued == 0
    }

    /// Close the batch for sending
    pub fn seal(mut self) -> Result<SealedBatch> {
        if self.in_group {
            return Err(InvalidSequenceState::UncommittedTransaction.into());
        }
        if self.mode.is_atomic() {
            self.push_raw(exec(), Reply::Slot);
        }
        Ok(SealedBatch {
            mode: self.mode,
            commands: self.commands,
            plan: self.plan,
            queued: self.queued,
        })
    }
}

fn multi() -> Command {
    Command::from_raw("MULTI", Vec::new())
}

fn exec() -> Command {
    Command::from_raw("EXEC", Vec::new())
}

/// A batch ready to be written; may be resent after a redirect
#[derive(Debug)]
pub struct SealedBatch {
    mode: BatchMode,
    commands: Vec<Command>,
    plan: Vec<Reply>,
    queued: usize,
}

impl SealedBatch {
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.queued == 0
    }

    /// First key touched by the batch, used to pick a cluster node
    pub fn first_key(&self) -> Option<&[u8]> {
        self.commands.iter().find_map(Command::routing_key)
    }

    /// Write the batch on `conn` and collect its results
    pub fn run(&self, conn: &SharedConnection) -> Result<Vec<Value>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        let replies = conn.lock().execute_pipeline(&self.commands)?;
        debug!(
            "Executed {} with {} commands in one round trip",
            self.mode,
            self.commands.len()
        );
        self.collect(replies)
    }

    /// Map raw replies onto result slots
    pub fn collect(&self, replies: Vec<RespValue>) -> Result<Vec<Value>> {
        if replies.len() != self.plan.len() {
            return Err(ProtocolError::ReplyCountMismatch {
                expected: self.plan.len(),
                actual: replies.len(),
            }
            .into());
        }

        let slots = self
            .plan
            .iter()
            .zip(replies)
            .filter(|(reply, _)| **reply == Reply::Slot)
            .map(|(_, value)| value);

        match self.mode {
            BatchMode::Pipeline => Ok(slots.map(Value::from_reply).collect()),
            BatchMode::Transaction => match slots.last() {
                Some(RespValue::Array(items)) => {
                    Ok(items.into_iter().map(Value::from_reply).collect())
                }
                // Aborted by WATCH
                Some(RespValue::Null) => Ok(Vec::new()),
                Some(RespValue::Error(e)) => Err(ClientError::Server(e)),
                other => Err(ProtocolError::UnexpectedResponse {
                    expected: "EXEC array".to_string(),
                    actual: format!("{:?}", other),
                }
                .into()),
            },
        }
    }
}

/// Buffered batch bound to a single node connection
pub struct NodeBatch {
    conn: SharedConnection,
    batch: BufferedBatch,
}

impl NodeBatch {
    pub fn new(conn: SharedConnection, mode: BatchMode) -> Self {
        Self {
            conn,
            batch: BufferedBatch::new(mode),
        }
    }
}

impl BatchHandle for NodeBatch {
    fn queue(&mut self, command: Command) -> Result<Option<Value>> {
        self.batch.push(command);
        Ok(None)
    }

    fn begin_atomic(&mut self) -> Result<()> {
        self.batch.begin_group()
    }

    fn end_atomic(&mut self) -> Result<Option<Value>> {
        self.batch.end_group()?;
        Ok(None)
    }

    fn execute(self: Box<Self>) -> Result<Vec<Value>> {
        self.batch.seal()?.run(&self.conn)
    }
}
