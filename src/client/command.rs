//! Encoded commands and key-position lookup
//!
//! Command names and arguments are passed through opaquely. The only
//! thing this module knows about the command surface is where the keys
//! sit, which is needed for key prefixing, shard selection and cluster
//! slot routing.

use std::fmt;

use crate::utils::Value;

/// Commands that address a server node rather than the key space.
///
/// On a cluster these go to the node a per-node facade is bound to.
pub const NODE_SCOPED_COMMANDS: &[&str] = &[
    "SAVE",
    "BGSAVE",
    "FLUSHDB",
    "FLUSHALL",
    "DBSIZE",
    "BGREWRITEAOF",
    "LASTSAVE",
    "INFO",
    "CLIENT",
    "CLUSTER",
    "CONFIG",
    "PUBSUB",
    "SLOWLOG",
    "RANDOMKEY",
    "PING",
    "SCAN",
];

/// Commands without key arguments
const KEYLESS_COMMANDS: &[&str] = &[
    "ASKING",
    "AUTH",
    "COMMAND",
    "DISCARD",
    "ECHO",
    "EXEC",
    "HELLO",
    "KEYS",
    "MULTI",
    "PUBLISH",
    "QUIT",
    "READONLY",
    "SCRIPT",
    "SELECT",
    "TIME",
    "UNWATCH",
    "WAIT",
];

/// Where the keys of a command sit in its argument list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeySpec {
    None,
    /// Single key at the given argument index
    At(usize),
    /// Keys from the first argument onwards, every `step` arguments,
    /// stopping `trailing` arguments before the end
    Span { step: usize, trailing: usize },
    /// Exactly `count` leading keys
    Leading(usize),
    /// `<script|dest> numkeys key [key ...]` forms; `dest` marks the
    /// first argument as a key too
    NumKeys { dest: bool },
}

fn key_spec(name: &str) -> KeySpec {
    match name {
        n if NODE_SCOPED_COMMANDS.contains(&n) || KEYLESS_COMMANDS.contains(&n) => KeySpec::None,
        "DEL" | "UNLINK" | "EXISTS" | "TOUCH" | "MGET" | "WATCH" | "SINTER" | "SUNION"
        | "SDIFF" | "SINTERSTORE" | "SUNIONSTORE" | "SDIFFSTORE" | "PFCOUNT" | "PFMERGE" => {
            KeySpec::Span {
                step: 1,
                trailing: 0,
            }
        }
        "MSET" | "MSETNX" => KeySpec::Span {
            step: 2,
            trailing: 0,
        },
        "BLPOP" | "BRPOP" | "BZPOPMIN" | "BZPOPMAX" => KeySpec::Span {
            step: 1,
            trailing: 1,
        },
        "RENAME" | "RENAMENX" | "SMOVE" | "RPOPLPUSH" | "LMOVE" | "COPY" => KeySpec::Leading(2),
        "BRPOPLPUSH" | "BLMOVE" => KeySpec::Leading(2),
        "EVAL" | "EVALSHA" | "EVAL_RO" | "EVALSHA_RO" | "FCALL" | "FCALL_RO" => {
            KeySpec::NumKeys { dest: false }
        }
        "ZUNIONSTORE" | "ZINTERSTORE" | "ZDIFFSTORE" => KeySpec::NumKeys { dest: true },
        "OBJECT" | "MEMORY" => KeySpec::At(1),
        _ => KeySpec::At(0),
    }
}

/// A command ready to be written to a connection
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    args: Vec<Vec<u8>>,
}

impl Command {
    /// Build a command; composite argument values are flattened
    pub fn new<I, V>(name: &str, args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let mut encoded = Vec::new();
        for arg in args {
            arg.into().push_args(&mut encoded);
        }
        Self {
            name: name.to_ascii_uppercase(),
            args: encoded,
        }
    }

    /// Build a command from already-encoded arguments
    pub fn from_raw(name: &str, args: Vec<Vec<u8>>) -> Self {
        Self {
            name: name.to_ascii_uppercase(),
            args,
        }
    }

    /// Upper-cased command name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[Vec<u8>] {
        &self.args
    }

    /// Name followed by arguments, as written on the wire
    pub fn parts(&self) -> Vec<&[u8]> {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.name.as_bytes());
        parts.extend(self.args.iter().map(Vec::as_slice));
        parts
    }

    pub fn is_node_scoped(&self) -> bool {
        NODE_SCOPED_COMMANDS.contains(&self.name.as_str())
    }

    /// Argument indices holding keys
    pub fn key_indices(&self) -> Vec<usize> {
        let len = self.args.len();
        match key_spec(&self.name) {
            KeySpec::None => Vec::new(),
            KeySpec::At(idx) => (idx < len).then_some(idx).into_iter().collect(),
            KeySpec::Span { step, trailing } => {
                (0..len.saturating_sub(trailing)).step_by(step).collect()
            }
            KeySpec::Leading(count) => (0..count.min(len)).collect(),
            KeySpec::NumKeys { dest } => {
                // Both `script numkeys ...` and `dest numkeys ...` carry the count second
                let numkeys_at = 1;
                let numkeys = self
                    .args
                    .get(numkeys_at)
                    .and_then(|n| std::str::from_utf8(n).ok())
                    .and_then(|n| n.parse::<usize>().ok())
                    .unwrap_or(0);
                let first = numkeys_at + 1;
                let keys = first..(first + numkeys).min(len);
                if dest && len > 0 {
                    std::iter::once(0).chain(keys).collect()
                } else {
                    keys.collect()
                }
            }
        }
    }

    /// The key used to pick a shard or cluster slot
    pub fn routing_key(&self) -> Option<&[u8]> {
        self.key_indices()
            .first()
            .map(|&idx| self.args[idx].as_slice())
    }

    /// Prepend `prefix` to every key argument
    pub fn prefixed(mut self, prefix: Option<&[u8]>) -> Self {
        let Some(prefix) = prefix.filter(|p| !p.is_empty()) else {
            return self;
        };
        for idx in self.key_indices() {
            let key = &mut self.args[idx];
            let mut prefixed = Vec::with_capacity(prefix.len() + key.len());
            prefixed.extend_from_slice(prefix);
            prefixed.extend_from_slice(key);
            *key = prefixed;
        }
        self
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for arg in &self.args {
            write!(f, " {}", String::from_utf8_lossy(arg))?;
        }
        Ok(())
    }
}
