//! Event Loop
//!
//! A single-threaded reactor over `mio::Poll`. It dispatches socket readiness
//! to per-token callbacks and fires timers.
//!
//! ## One Tick
//!
//! ```text
//! ┌────────────────────┐
//! │ before_sleep hook  │   (flush the AOF, ...)
//! └─────────┬──────────┘
//!           ▼
//! ┌────────────────────┐
//! │ poll(timeout)      │   timeout = time to the nearest timer, >= 1ms
//! └─────────┬──────────┘
//!           ▼
//! ┌────────────────────┐
//! │ ready handles      │   read callback first, then write callback
//! └─────────┬──────────┘
//!           ▼
//! ┌────────────────────┐
//! │ due timers         │   Once: removed; Repeating: when = now + interval
//! └────────────────────┘
//! ```
//!
//! Callbacks receive the loop itself and the shared state `S`, so they can
//! register or unregister handles and schedule timers while they run.

use mio::event::Source;
use mio::{Events, Interest, Poll, Token, Waker};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::ops::BitOr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Shortest poll timeout, so a due timer never turns the loop into a spin.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Poll timeout when no timer is scheduled.
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Token reserved for the stop waker.
pub const WAKER_TOKEN: Token = Token(usize::MAX);

const EVENTS_CAPACITY: usize = 1024;

/// Readiness interest of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mask(u8);

impl Mask {
    pub const NONE: Mask = Mask(0);
    pub const READABLE: Mask = Mask(1);
    pub const WRITABLE: Mask = Mask(1 << 1);

    pub fn contains(self, other: Mask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    fn without(self, other: Mask) -> Mask {
        Mask(self.0 & !other.0)
    }

    fn interest(self) -> Option<Interest> {
        match (self.contains(Mask::READABLE), self.contains(Mask::WRITABLE)) {
            (true, true) => Some(Interest::READABLE.add(Interest::WRITABLE)),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

impl BitOr for Mask {
    type Output = Mask;

    fn bitor(self, rhs: Mask) -> Mask {
        Mask(self.0 | rhs.0)
    }
}

/// Identifies a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Once,
    /// Fires again `interval` after each firing completes
    Repeating,
}

pub type FileProc<S> = fn(&mut EventLoop<S>, &mut S, Token);
pub type TimeProc<S> = fn(&mut EventLoop<S>, &mut S, TimerId);
pub type BeforeSleepProc<S> = fn(&mut EventLoop<S>, &mut S);

struct FileEvent<S> {
    mask: Mask,
    read: Option<FileProc<S>>,
    write: Option<FileProc<S>>,
}

struct TimeEvent<S> {
    id: TimerId,
    kind: TimerKind,
    interval: Duration,
    when: Instant,
    proc_: TimeProc<S>,
}

/// Stops a running loop from any thread.
#[derive(Clone)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "Failed to wake the event loop");
        }
    }
}

pub struct EventLoop<S> {
    poll: Poll,
    events: Events,
    files: HashMap<Token, FileEvent<S>>,
    /// Newest first
    timers: VecDeque<TimeEvent<S>>,
    next_timer_id: u64,
    before_sleep: Option<BeforeSleepProc<S>>,
    stopped: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl<S> EventLoop<S> {
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        Ok(Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            files: HashMap::new(),
            timers: VecDeque::new(),
            next_timer_id: 1,
            before_sleep: None,
            stopped: Arc::new(AtomicBool::new(false)),
            waker,
        })
    }

    /// Registers interest in a handle.
    ///
    /// Interest bits are merged with those already registered for `token`;
    /// registering the same bit again replaces its callback.
    pub fn register_io<H>(
        &mut self,
        source: &mut H,
        token: Token,
        mask: Mask,
        proc_: FileProc<S>,
    ) -> io::Result<()>
    where
        H: Source + ?Sized,
    {
        let Some(interest) = mask.interest() else {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty interest mask"));
        };

        match self.files.get_mut(&token) {
            Some(fe) => {
                let merged = fe.mask | mask;
                if merged != fe.mask {
                    if let Some(interest) = merged.interest() {
                        self.poll.registry().reregister(source, token, interest)?;
                    }
                    fe.mask = merged;
                }
                if mask.contains(Mask::READABLE) {
                    fe.read = Some(proc_);
                }
                if mask.contains(Mask::WRITABLE) {
                    fe.write = Some(proc_);
                }
            }
            None => {
                self.poll.registry().register(source, token, interest)?;
                self.files.insert(
                    token,
                    FileEvent {
                        mask,
                        read: mask.contains(Mask::READABLE).then_some(proc_),
                        write: mask.contains(Mask::WRITABLE).then_some(proc_),
                    },
                );
            }
        }
        Ok(())
    }

    /// Removes interest bits from a handle. When none remain the handle is
    /// deregistered. Unknown tokens are ignored.
    pub fn unregister_io<H>(&mut self, source: &mut H, token: Token, mask: Mask) -> io::Result<()>
    where
        H: Source + ?Sized,
    {
        let Some(fe) = self.files.get_mut(&token) else {
            return Ok(());
        };
        let remaining = fe.mask.without(mask);
        if remaining == fe.mask {
            return Ok(());
        }

        match remaining.interest() {
            Some(interest) => {
                fe.mask = remaining;
                if !remaining.contains(Mask::READABLE) {
                    fe.read = None;
                }
                if !remaining.contains(Mask::WRITABLE) {
                    fe.write = None;
                }
                self.poll.registry().reregister(source, token, interest)
            }
            None => {
                self.files.remove(&token);
                self.poll.registry().deregister(source)
            }
        }
    }

    /// Returns the interest currently registered for `token`.
    pub fn registered_mask(&self, token: Token) -> Mask {
        self.files.get(&token).map_or(Mask::NONE, |fe| fe.mask)
    }

    /// Schedules a timer and returns its id.
    pub fn schedule_timer(
        &mut self,
        kind: TimerKind,
        interval: Duration,
        proc_: TimeProc<S>,
    ) -> TimerId {
        let id = TimerId(self.next_timer_id);
        self.next_timer_id += 1;
        self.timers.push_front(TimeEvent {
            id,
            kind,
            interval,
            when: Instant::now() + interval,
            proc_,
        });
        id
    }

    /// Removes a timer. Returns false if it was not scheduled.
    pub fn cancel_timer(&mut self, id: TimerId) -> bool {
        match self.timers.iter().position(|t| t.id == id) {
            Some(pos) => {
                self.timers.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    /// Sets a callback that runs at the start of every tick, before polling.
    pub fn set_before_sleep(&mut self, proc_: BeforeSleepProc<S>) {
        self.before_sleep = Some(proc_);
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stopped: Arc::clone(&self.stopped),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Asks `run` to return after the current tick.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Runs ticks until stopped.
    pub fn run(&mut self, state: &mut S) {
        while !self.is_stopped() {
            self.run_once(state);
        }
    }

    fn poll_timeout(&self) -> Duration {
        match self.timers.iter().map(|t| t.when).min() {
            Some(when) => when.saturating_duration_since(Instant::now()).max(MIN_WAIT),
            None => IDLE_WAIT,
        }
    }

    /// Runs one tick: waits for readiness, then dispatches handles and
    /// timers. Returns the number of callbacks invoked.
    pub fn run_once(&mut self, state: &mut S) -> usize {
        if let Some(before_sleep) = self.before_sleep {
            before_sleep(self, state);
        }

        let timeout = self.poll_timeout();
        let mut ready = Vec::new();
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {
                for event in self.events.iter() {
                    if event.token() == WAKER_TOKEN {
                        continue;
                    }
                    let readable = event.is_readable() || event.is_read_closed() || event.is_error();
                    let writable = event.is_writable() || event.is_write_closed();
                    ready.push((event.token(), readable, writable));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!(error = %e, "Poll failed, skipping tick");
                return 0;
            }
        }

        let mut processed = 0;
        for (token, readable, writable) in ready {
            // Each lookup sees what earlier callbacks left registered.
            if readable {
                if let Some(read) = self.files.get(&token).and_then(|fe| fe.read) {
                    read(self, state, token);
                    processed += 1;
                }
            }
            if writable {
                if let Some(write) = self.files.get(&token).and_then(|fe| fe.write) {
                    write(self, state, token);
                    processed += 1;
                }
            }
        }

        processed + self.process_timers(state)
    }

    fn process_timers(&mut self, state: &mut S) -> usize {
        let now = Instant::now();
        let due: Vec<TimerId> = self
            .timers
            .iter()
            .filter(|t| t.when <= now)
            .map(|t| t.id)
            .collect();

        let mut fired = 0;
        for id in due {
            // An earlier callback may have cancelled it.
            let Some(pos) = self.timers.iter().position(|t| t.id == id) else {
                continue;
            };
            let (kind, proc_) = (self.timers[pos].kind, self.timers[pos].proc_);
            if kind == TimerKind::Once {
                self.timers.remove(pos);
            }

            trace!(timer = id.0, "Firing timer");
            proc_(self, state, id);
            fired += 1;

            if kind == TimerKind::Repeating {
                if let Some(timer) = self.timers.iter_mut().find(|t| t.id == id) {
                    timer.when = Instant::now() + timer.interval;
                }
            }
        }
        fired
    }
}
