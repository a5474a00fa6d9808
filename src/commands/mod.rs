//! Command Dispatch
//!
//! Commands are looked up in a [`CommandTable`] of descriptors. A descriptor
//! carries the command's name, its arity, its flags and the function that
//! runs it.
//!
//! ```text
//! args: ["SET", "k", "v"]
//!          │
//!          ▼
//! ┌─────────────────┐  unknown name / bad arity
//! │ CommandTable    │ ─────────────────────────────> -ERR ...
//! │  lookup()       │
//! └────────┬────────┘
//!          │ &CommandDescriptor
//!          ▼
//! ┌─────────────────┐  Err(CommandError)
//! │ handler(ctx)    │ ─────────────────────────────> -ERR ...
//! └────────┬────────┘
//!          │ Ok(reply), WRITE flag set
//!          ▼
//! ┌─────────────────┐
//! │ AOF feed        │
//! └─────────────────┘
//! ```
//!
//! ## Arity
//!
//! A positive arity is the exact argument count, including the command name.
//! A negative arity `-n` means at least `n` arguments.

pub mod handler;

use crate::persistence::AppendOnlyLog;
use crate::protocol::Reply;
use crate::storage::Database;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Errors raised before a command runs. Nothing has been mutated when these
/// are returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(String),
}

/// Errors a command reports to the client instead of a regular reply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("value is not an integer or out of range")]
    NotInteger,

    #[error("value is not a valid float")]
    NotFloat,

    #[error("min or max is not a float")]
    RangeNotFloat,

    #[error("bit offset is not an integer or out of range")]
    BitOffset,

    #[error("bit is not an integer or out of range")]
    BitValue,

    #[error("invalid expire time in '{0}' command")]
    InvalidExpire(&'static str),

    #[error("syntax error")]
    Syntax,

    #[error("append only file is disabled")]
    AofDisabled,

    #[error("{0}")]
    Failed(String),
}

/// Result of running a command.
pub type CommandResult = Result<Reply, CommandError>;

/// Everything a command may touch while it runs.
pub struct CommandContext<'a> {
    pub db: &'a mut Database,
    /// The log, when append-only persistence is enabled
    pub aof: Option<&'a mut AppendOnlyLog>,
}

/// Signature of a command implementation. `args[0]` is the command name.
pub type CommandHandler = fn(&mut CommandContext<'_>, &[Bytes]) -> CommandResult;

/// Command property bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandFlags(u8);

impl CommandFlags {
    pub const NONE: CommandFlags = CommandFlags(0);
    /// The command may modify the keyspace and is logged to the AOF
    pub const WRITE: CommandFlags = CommandFlags(1);
    /// The command only reads the keyspace
    pub const READONLY: CommandFlags = CommandFlags(1 << 1);
    /// The command manages the server rather than the data
    pub const ADMIN: CommandFlags = CommandFlags(1 << 2);

    pub fn contains(self, other: CommandFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_write(self) -> bool {
        self.contains(Self::WRITE)
    }
}

/// A command's entry in the table.
#[derive(Clone, Copy)]
pub struct CommandDescriptor {
    pub name: &'static str,
    pub arity: i32,
    pub flags: CommandFlags,
    pub handler: CommandHandler,
}

impl fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

impl CommandDescriptor {
    /// Returns true if `argc` arguments (name included) satisfy the arity.
    pub fn accepts(&self, argc: usize) -> bool {
        if self.arity >= 0 {
            argc == self.arity as usize
        } else {
            argc >= self.arity.unsigned_abs() as usize
        }
    }
}

/// The set of commands the server understands.
#[derive(Debug, Clone)]
pub struct CommandTable {
    commands: HashMap<String, CommandDescriptor>,
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandTable {
    /// Creates a table holding every built-in command.
    pub fn new() -> Self {
        let mut table = Self {
            commands: HashMap::new(),
        };
        for descriptor in handler::builtin_commands() {
            table.register(descriptor);
        }
        table
    }

    /// Adds or replaces a command.
    pub fn register(&mut self, descriptor: CommandDescriptor) {
        self.commands
            .insert(descriptor.name.to_ascii_lowercase(), descriptor);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Finds the descriptor for `args[0]` and checks the argument count.
    pub fn lookup(&self, args: &[Bytes]) -> Result<&CommandDescriptor, DispatchError> {
        let raw: &[u8] = args.first().map(|a| &a[..]).unwrap_or_default();
        let name = String::from_utf8_lossy(raw).to_ascii_lowercase();
        let descriptor = self
            .commands
            .get(&name)
            .ok_or_else(|| DispatchError::UnknownCommand(name.clone()))?;
        if !descriptor.accepts(args.len()) {
            return Err(DispatchError::WrongArity(name));
        }
        Ok(descriptor)
    }

    /// Runs one command and returns the reply for the client.
    ///
    /// Write commands that succeed are fed to the log, if there is one.
    pub fn execute(
        &self,
        db: &mut Database,
        mut aof: Option<&mut AppendOnlyLog>,
        args: &[Bytes],
    ) -> Reply {
        let descriptor = match self.lookup(args) {
            Ok(descriptor) => descriptor,
            Err(e) => return Reply::error(e),
        };

        let result = {
            let mut ctx = CommandContext {
                db,
                aof: aof.as_deref_mut(),
            };
            (descriptor.handler)(&mut ctx, args)
        };

        match result {
            Ok(reply) => {
                if descriptor.flags.is_write() {
                    if let Some(log) = aof {
                        log.feed(args);
                    }
                }
                reply
            }
            Err(e) => Reply::error(e),
        }
    }
}
