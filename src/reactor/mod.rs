//! Reactor Module
//!
//! The single-threaded event loop that drives the server. See
//! [`event_loop`] for the tick structure.

pub mod event_loop;

pub use event_loop::{
    BeforeSleepProc, EventLoop, FileProc, Mask, StopHandle, TimeProc, TimerId, TimerKind,
    WAKER_TOKEN,
};
