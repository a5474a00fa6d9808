//! Append-Only Log
//!
//! Every successful write command is appended to an in-memory buffer and
//! written to the log file on the next flush (before the reactor sleeps and
//! on every cron tick).
//!
//! ## Background Rewrite
//!
//! ```text
//!  foreground (reactor)                     worker thread
//!  ────────────────────                     ─────────────
//!  snapshot() via safe iterator
//!  spawn ─────────────────────────────────> write temp-rewrite-<pid>.aof
//!  feed(): buf + rewrite_buf                fsync
//!  feed(): buf + rewrite_buf                rename -> temp-rewrite-bg-<pid>.aof
//!  poll_rewrite() <──── oneshot ──────────  send(Ok(output))
//!  append rewrite_buf to bg file
//!  rename bg file over the log
//! ```
//!
//! Commands executed while the worker runs land in `rewrite_buf` as well as
//! in the live buffer, so no write is lost when the new file replaces the old
//! one.

use super::rewrite;
use crate::protocol::encode_command;
use crate::storage::{unix_time_ms, Database, SnapshotEntry};
use bytes::{Buf, Bytes, BytesMut};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Default minimum log size before an automatic rewrite (32 MB).
pub const DEFAULT_REWRITE_MIN_SIZE: u64 = 32 * 1024 * 1024;

/// Default growth over the last rewrite that triggers an automatic rewrite.
pub const DEFAULT_REWRITE_PERCENTAGE: u64 = 80;

#[derive(Debug, Error)]
pub enum AofError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("background append only file rewriting already in progress")]
    AlreadyRewriting,

    #[error("bad file format reading the append only file: {0}")]
    Format(String),

    #[error("unknown command '{0}' reading the append only file")]
    UnknownCommand(String),
}

/// When the log file is fsynced after a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FsyncPolicy {
    Always,
    #[default]
    EverySec,
    No,
}

impl std::str::FromStr for FsyncPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "always" => Ok(FsyncPolicy::Always),
            "everysec" => Ok(FsyncPolicy::EverySec),
            "no" => Ok(FsyncPolicy::No),
            other => Err(format!("invalid fsync policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AofConfig {
    pub path: PathBuf,
    pub fsync: FsyncPolicy,
    /// No automatic rewrite below this size
    pub rewrite_min_size: u64,
    /// Growth over the last rewrite, in percent, that triggers a rewrite
    pub rewrite_percentage: u64,
}

impl AofConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fsync: FsyncPolicy::default(),
            rewrite_min_size: DEFAULT_REWRITE_MIN_SIZE,
            rewrite_percentage: DEFAULT_REWRITE_PERCENTAGE,
        }
    }
}

/// Rewrite counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AofStats {
    pub rewrites_completed: u64,
    pub rewrites_failed: u64,
    pub short_writes: u64,
    /// Flushes that failed to open, write or fsync the file
    pub write_errors: u64,
}

/// A finished worker's file, waiting to be swapped in.
#[derive(Debug)]
struct RewriteOutput {
    path: PathBuf,
    size: u64,
}

#[derive(Debug)]
struct RewriteJob {
    rx: oneshot::Receiver<Result<RewriteOutput, AofError>>,
    started: Instant,
}

#[derive(Debug)]
pub struct AppendOnlyLog {
    path: PathBuf,
    file: Option<File>,
    /// Records not yet written to the file
    buf: BytesMut,
    /// Records fed while a rewrite is running
    rewrite_buf: BytesMut,
    current_size: u64,
    /// Size right after the last rewrite (or at open)
    base_size: u64,
    fsync: FsyncPolicy,
    last_fsync: Instant,
    rewrite_min_size: u64,
    rewrite_percentage: u64,
    job: Option<RewriteJob>,
    stats: AofStats,
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn rewrite_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn temp_path(dir: &Path) -> PathBuf {
    dir.join(format!("temp-rewrite-{}.aof", std::process::id()))
}

fn temp_bg_path(dir: &Path) -> PathBuf {
    dir.join(format!("temp-rewrite-bg-{}.aof", std::process::id()))
}

/// Writes a snapshot to `tmp`, fsyncs it, and returns the byte count.
fn write_rewrite_file(tmp: &Path, entries: &[SnapshotEntry]) -> Result<u64, AofError> {
    let mut writer = BufWriter::new(File::create(tmp)?);
    let size = rewrite::write_snapshot(&mut writer, entries)?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(size)
}

/// Body of the rewrite worker thread.
fn run_rewrite(dir: &Path, entries: Vec<SnapshotEntry>) -> Result<RewriteOutput, AofError> {
    let tmp = temp_path(dir);
    let bg = temp_bg_path(dir);
    let result = write_rewrite_file(&tmp, &entries).and_then(|size| {
        fs::rename(&tmp, &bg)?;
        Ok(size)
    });
    match result {
        Ok(size) => Ok(RewriteOutput { path: bg, size }),
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}

fn worker_vanished() -> AofError {
    AofError::Io(io::Error::other("rewrite worker exited without reporting"))
}

fn parse_i64(arg: &[u8]) -> Option<i64> {
    std::str::from_utf8(arg).ok()?.parse().ok()
}

fn pexpireat(out: &mut BytesMut, key: &Bytes, when: i64) {
    let when = when.to_string();
    encode_command(out, &[&b"PEXPIREAT"[..], &key[..], when.as_bytes()]);
}

/// Appends the replayable form of a command.
///
/// Relative expirations become absolute `PEXPIREAT` records so that
/// replaying the log later gives the same deadlines.
fn encode_canonical(out: &mut BytesMut, args: &[Bytes]) {
    let name = args[0].to_ascii_lowercase();
    match (name.as_slice(), args.len()) {
        (b"expire" | b"pexpire", 3) => {
            let scale = if name == b"expire" { 1000 } else { 1 };
            match parse_i64(&args[2]) {
                Some(n) => {
                    let when = unix_time_ms().saturating_add(n.saturating_mul(scale));
                    pexpireat(out, &args[1], when);
                }
                None => encode_command(out, args),
            }
        }
        (b"set", n) if n > 3 => {
            let mut ttl_ms = None;
            for pair in args[3..].chunks(2) {
                let [opt, amount] = pair else { break };
                let scale = if opt.eq_ignore_ascii_case(b"ex") { 1000 } else { 1 };
                ttl_ms = parse_i64(amount).map(|n| n.saturating_mul(scale));
            }
            encode_command(out, &args[..3]);
            if let Some(ms) = ttl_ms {
                pexpireat(out, &args[1], unix_time_ms().saturating_add(ms));
            }
        }
        _ => encode_command(out, args),
    }
}

impl AppendOnlyLog {
    /// Opens (or creates) the log for appending.
    pub fn open(config: &AofConfig) -> Result<Self, AofError> {
        let file = open_append(&config.path)?;
        let size = file.metadata()?.len();
        info!(path = %config.path.display(), size = size, "Append only file opened");

        Ok(Self {
            path: config.path.clone(),
            file: Some(file),
            buf: BytesMut::new(),
            rewrite_buf: BytesMut::new(),
            current_size: size,
            base_size: size,
            fsync: config.fsync,
            last_fsync: Instant::now(),
            rewrite_min_size: config.rewrite_min_size,
            rewrite_percentage: config.rewrite_percentage,
            job: None,
            stats: AofStats::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written to the file so far.
    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    /// Size recorded at the last rewrite.
    pub fn base_size(&self) -> u64 {
        self.base_size
    }

    /// Bytes fed but not yet written.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn is_rewriting(&self) -> bool {
        self.job.is_some()
    }

    pub fn stats(&self) -> AofStats {
        self.stats
    }

    /// Records one executed write command.
    pub fn feed(&mut self, args: &[Bytes]) {
        if args.is_empty() {
            return;
        }
        let start = self.buf.len();
        encode_canonical(&mut self.buf, args);
        if self.job.is_some() {
            self.rewrite_buf.extend_from_slice(&self.buf[start..]);
        }
    }

    /// Writes the buffered records with a single write call.
    ///
    /// On a short write the written prefix is dropped from the buffer and
    /// the remainder waits for the next flush.
    pub fn flush(&mut self) -> Result<(), AofError> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let file = match &mut self.file {
            Some(file) => file,
            slot => match open_append(&self.path) {
                Ok(file) => slot.insert(file),
                Err(e) => {
                    self.stats.write_errors += 1;
                    error!(path = %self.path.display(), error = %e, "Can't open the append only file");
                    return Err(e.into());
                }
            },
        };

        let written = match file.write(&self.buf) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => 0,
            Err(e) => {
                self.stats.write_errors += 1;
                error!(path = %self.path.display(), error = %e, "Error writing the append only file");
                return Err(e.into());
            }
        };
        self.buf.advance(written);
        self.current_size += written as u64;

        if !self.buf.is_empty() {
            self.stats.short_writes += 1;
            warn!(
                written = written,
                remaining = self.buf.len(),
                "Short write to the append only file"
            );
            return Ok(());
        }

        let sync = match self.fsync {
            FsyncPolicy::Always => true,
            FsyncPolicy::EverySec => self.last_fsync.elapsed() >= Duration::from_secs(1),
            FsyncPolicy::No => false,
        };
        if sync {
            if let Err(e) = file.sync_data() {
                self.stats.write_errors += 1;
                error!(path = %self.path.display(), error = %e, "Can't fsync the append only file");
                return Err(e.into());
            }
            self.last_fsync = Instant::now();
        }
        Ok(())
    }

    /// Returns true if the log has grown enough to be rewritten.
    ///
    /// A zero baseline counts as one byte, so a fresh log becomes eligible
    /// as soon as it passes the minimum size. A percentage of zero turns
    /// automatic rewrites off.
    pub fn should_rewrite(&self) -> bool {
        if self.rewrite_percentage == 0
            || self.job.is_some()
            || self.current_size <= self.rewrite_min_size
        {
            return false;
        }
        let base = self.base_size.max(1);
        let growth = (self.current_size.saturating_mul(100) / base).saturating_sub(100);
        growth > self.rewrite_percentage
    }

    /// Starts a rewrite on a worker thread.
    ///
    /// The snapshot is taken here, on the caller's thread; the worker only
    /// serializes it.
    pub fn rewrite_in_background(&mut self, db: &mut Database) -> Result<(), AofError> {
        if self.job.is_some() {
            return Err(AofError::AlreadyRewriting);
        }

        let entries = db.snapshot();
        let keys = entries.len();
        let dir = rewrite_dir(&self.path);
        let (tx, rx) = oneshot::channel();

        std::thread::Builder::new()
            .name("aof-rewrite".to_string())
            .spawn(move || {
                let result = run_rewrite(&dir, entries);
                // The receiver is gone only if the log was dropped.
                let _ = tx.send(result);
            })?;

        self.rewrite_buf.clear();
        self.job = Some(RewriteJob {
            rx,
            started: Instant::now(),
        });
        info!(keys = keys, "Background append only file rewriting started");
        Ok(())
    }

    /// Checks whether the running rewrite finished, and swaps in its file.
    ///
    /// Returns `None` if no rewrite finished since the last call.
    pub fn poll_rewrite(&mut self) -> Option<Result<(), AofError>> {
        let job = self.job.as_mut()?;
        let result = match job.rx.try_recv() {
            Ok(result) => result,
            Err(oneshot::error::TryRecvError::Empty) => return None,
            Err(oneshot::error::TryRecvError::Closed) => Err(worker_vanished()),
        };
        let started = self.job.take().map(|job| job.started)?;
        Some(self.finish_rewrite(started, result))
    }

    /// Blocks until the running rewrite finishes, then completes it.
    pub fn wait_for_rewrite(&mut self) -> Option<Result<(), AofError>> {
        let job = self.job.take()?;
        let result = job.rx.blocking_recv().unwrap_or_else(|_| Err(worker_vanished()));
        Some(self.finish_rewrite(job.started, result))
    }

    fn finish_rewrite(
        &mut self,
        started: Instant,
        result: Result<RewriteOutput, AofError>,
    ) -> Result<(), AofError> {
        let outcome = result.and_then(|output| {
            let bg = output.path.clone();
            self.install_rewrite(output).inspect_err(|_| {
                let _ = fs::remove_file(&bg);
            })
        });
        self.rewrite_buf = BytesMut::new();

        match &outcome {
            Ok(()) => {
                self.stats.rewrites_completed += 1;
                info!(
                    size = self.current_size,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Background append only file rewrite finished"
                );
            }
            Err(e) => {
                self.stats.rewrites_failed += 1;
                let _ = fs::remove_file(temp_path(&rewrite_dir(&self.path)));
                error!(error = %e, "Background append only file rewrite failed");
            }
        }
        outcome
    }

    /// Appends the differential to the worker's file and renames it over
    /// the log.
    fn install_rewrite(&mut self, output: RewriteOutput) -> Result<(), AofError> {
        let mut file = OpenOptions::new().append(true).open(&output.path)?;
        file.write_all(&self.rewrite_buf)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&output.path, &self.path)?;

        // Everything in `buf` is either in the snapshot or in the
        // differential that was just appended.
        self.swap_in(output.size + self.rewrite_buf.len() as u64);
        debug!(differential = self.rewrite_buf.len(), "Rewrite differential appended");
        Ok(())
    }

    /// Adopts the file just renamed over the log.
    ///
    /// The old handle points at the unlinked inode, so it is dropped and the
    /// next flush opens the log by path.
    fn swap_in(&mut self, size: u64) {
        self.file = None;
        self.buf.clear();
        self.current_size = size;
        self.base_size = size;
    }

    /// Rewrites the log synchronously.
    pub fn rewrite_now(&mut self, db: &mut Database) -> Result<(), AofError> {
        if self.job.is_some() {
            return Err(AofError::AlreadyRewriting);
        }
        let entries = db.snapshot();
        let tmp = temp_path(&rewrite_dir(&self.path));
        let size = match write_rewrite_file(&tmp, &entries) {
            Ok(size) => size,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e);
            }
        };
        fs::rename(&tmp, &self.path)?;

        self.swap_in(size);
        self.stats.rewrites_completed += 1;
        info!(keys = entries.len(), size = size, "Append only file rewritten");
        Ok(())
    }

    /// Finishes any running rewrite and makes everything buffered durable.
    pub fn shutdown(&mut self) -> Result<(), AofError> {
        if let Some(Err(e)) = self.wait_for_rewrite() {
            warn!(error = %e, "Rewrite did not complete before shutdown");
        }
        self.flush()?;
        if let Some(file) = self.file.as_mut() {
            file.sync_all()?;
        }
        Ok(())
    }
}
