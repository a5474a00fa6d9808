//! Startup Replay
//!
//! Loads the log by running every record through the command table, using
//! the same decoder as client connections. Records must use bulk framing.
//! Any framing error, unknown command or truncated final record is fatal:
//! the server refuses to start with a partially loaded keyspace.

use super::aof::AofError;
use crate::commands::{CommandContext, CommandTable, DispatchError};
use crate::protocol::RequestDecoder;
use crate::storage::Database;
use bytes::{Bytes, BytesMut};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::{debug, info};

const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records executed
    pub commands: u64,
    /// Bytes read from the file
    pub bytes: u64,
}

/// Replays the log at `path` into `db`.
///
/// A missing file is an empty log.
pub fn replay(
    path: &Path,
    db: &mut Database,
    commands: &CommandTable,
) -> Result<ReplayStats, AofError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No append only file to load");
            return Ok(ReplayStats::default());
        }
        Err(e) => return Err(e.into()),
    };

    let mut decoder = RequestDecoder::new();
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut stats = ReplayStats::default();

    loop {
        let n = match file.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        stats.bytes += n as u64;
        buf.extend_from_slice(&chunk[..n]);

        loop {
            if !decoder.is_mid_command() {
                if let Some(&first) = buf.first() {
                    if first != b'*' {
                        return Err(AofError::Format(format!(
                            "expected '*' at record {}, found {:?}",
                            stats.commands + 1,
                            first as char
                        )));
                    }
                }
            }
            let args = match decoder.decode(&mut buf) {
                Ok(Some(args)) => args,
                Ok(None) => break,
                Err(e) => return Err(AofError::Format(e.to_string())),
            };
            apply(db, commands, &args)?;
            stats.commands += 1;
        }
    }

    if decoder.is_mid_command() || !buf.is_empty() {
        return Err(AofError::Format(format!(
            "truncated record after {} commands",
            stats.commands
        )));
    }

    info!(
        path = %path.display(),
        commands = stats.commands,
        bytes = stats.bytes,
        "Append only file loaded"
    );
    Ok(stats)
}

/// Runs one record without a client and without logging it again.
fn apply(db: &mut Database, commands: &CommandTable, args: &[Bytes]) -> Result<(), AofError> {
    let descriptor = commands.lookup(args).map_err(|e| match e {
        DispatchError::UnknownCommand(name) => AofError::UnknownCommand(name),
        other => AofError::Format(other.to_string()),
    })?;
    let mut ctx = CommandContext { db, aof: None };
    if let Err(e) = (descriptor.handler)(&mut ctx, args) {
        debug!(command = descriptor.name, error = %e, "Replayed command returned an error");
    }
    Ok(())
}
