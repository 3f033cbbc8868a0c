// Copyright (c) 2018 The rust-gpio-cdev Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Edge events: decoding, and waiting on several lines at once.

use std::io::{self, Write};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::trace;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};

use crate::errors::{event_err, poll_err, state_err, ErrorKind, Result};
use crate::ffi;
use crate::handle::{HandleKind, RequestHandle};
use crate::line::Line;
use crate::lines::Lines;

/// Largest number of events [`Line::event_read_multiple`] returns at once.
pub const MAX_EVENTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    RisingEdge,
    FallingEdge,
}

/// An edge event read from a line.
///
/// The timestamp is the kernel's, in nanoseconds; the clock it comes from
/// depends on the kernel version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEvent {
    timestamp: u64,
    event_type: EventType,
}

impl LineEvent {
    pub(crate) fn from_bytes(buf: &[u8]) -> Result<LineEvent> {
        if buf.len() < ffi::GPIOEVENT_DATA_SIZE {
            return Err(event_err(Errno::EIO));
        }
        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&buf[..8]);
        let mut id = [0u8; 4];
        id.copy_from_slice(&buf[8..12]);

        // The kernel only reports two ids; anything but rising is falling.
        let event_type = match u32::from_ne_bytes(id) {
            ffi::GPIOEVENT_EVENT_RISING_EDGE => EventType::RisingEdge,
            _ => EventType::FallingEdge,
        };
        Ok(LineEvent {
            timestamp: u64::from_ne_bytes(timestamp),
            event_type,
        })
    }

    /// Time of the event in nanoseconds.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Whole seconds part of the timestamp.
    pub fn seconds(&self) -> u64 {
        self.timestamp / 1_000_000_000
    }

    /// Sub-second part of the timestamp, in nanoseconds.
    pub fn nanoseconds(&self) -> u32 {
        (self.timestamp % 1_000_000_000) as u32
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }
}

pub(crate) fn read_err(err: io::Error) -> crate::errors::Error {
    event_err(Errno::from_i32(err.raw_os_error().unwrap_or(libc::EIO)))
}

pub(crate) fn read_event(handle: &Arc<RequestHandle>) -> Result<LineEvent> {
    let mut buf = [0u8; ffi::GPIOEVENT_DATA_SIZE];
    let n = handle.read(&mut buf).map_err(read_err)?;
    if n != buf.len() {
        return Err(event_err(Errno::EIO));
    }
    let event = LineEvent::from_bytes(&buf)?;
    trace!("read {:?} from lines {:?}", event, handle.offsets());
    Ok(event)
}

pub(crate) fn read_events(handle: &Arc<RequestHandle>, max: usize) -> Result<Vec<LineEvent>> {
    let max = max.min(MAX_EVENTS);
    if max == 0 {
        return Ok(Vec::new());
    }
    let mut buf = [0u8; ffi::GPIOEVENT_DATA_SIZE * MAX_EVENTS];
    let n = handle
        .read(&mut buf[..ffi::GPIOEVENT_DATA_SIZE * max])
        .map_err(read_err)?;
    if n == 0 || n % ffi::GPIOEVENT_DATA_SIZE != 0 {
        return Err(event_err(Errno::EIO));
    }
    buf[..n]
        .chunks(ffi::GPIOEVENT_DATA_SIZE)
        .map(LineEvent::from_bytes)
        .collect()
}

#[derive(Debug)]
struct CancelInner {
    cancelled: AtomicBool,
    reader: UnixStream,
    writer: UnixStream,
}

/// Interrupts [`EventWaiter::wait`] from another thread.
///
/// Cancellation is sticky: once cancelled, every wait using the token fails
/// with [`ErrorKind::Cancelled`].
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    pub fn new() -> Result<CancelToken> {
        let (reader, writer) = UnixStream::pair()?;
        writer.set_nonblocking(true)?;
        Ok(CancelToken {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                reader,
                writer,
            }),
        })
    }

    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        // A full socket buffer still leaves the reader readable.
        let _ = (&self.inner.writer).write(&[1]);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }
}

/// Waits for edge events on a group of lines requested for events.
#[derive(Debug)]
pub struct EventWaiter<'a> {
    lines: &'a Lines,
    cancel: Option<&'a CancelToken>,
}

impl<'a> EventWaiter<'a> {
    pub fn new(lines: &'a Lines) -> EventWaiter<'a> {
        EventWaiter {
            lines,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, token: &'a CancelToken) -> EventWaiter<'a> {
        self.cancel = Some(token);
        self
    }

    /// Block until at least one line has a pending event.
    ///
    /// Returns the lines with pending events, in group order; the result is
    /// empty if `timeout` ran out first. `None` waits forever. Every member
    /// must be requested for events.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<Lines> {
        if self.lines.is_empty() {
            return Err(state_err("no lines to wait on"));
        }
        let mut handles = Vec::with_capacity(self.lines.len());
        for line in self.lines {
            line.chip()?;
            match line.handle() {
                Some((HandleKind::Events, handle)) => handles.push(handle),
                _ => return Err(state_err("line is not requested for events")),
            }
        }

        let mut fds: Vec<PollFd> = handles
            .iter()
            .map(|handle| PollFd::new(&**handle, PollFlags::POLLIN | PollFlags::POLLPRI))
            .collect();
        if let Some(token) = self.cancel {
            fds.push(PollFd::new(&token.inner.reader, PollFlags::POLLIN));
        }

        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        loop {
            if self.cancel.map_or(false, CancelToken::is_cancelled) {
                return Err(ErrorKind::Cancelled.into());
            }
            let ms = match deadline {
                None => -1,
                Some(deadline) => timeout_ms(deadline.saturating_duration_since(Instant::now())),
            };
            trace!("polling {} event fds for {} ms", handles.len(), ms);

            let ret = match poll(&mut fds, ms) {
                Ok(ret) => ret,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(poll_err(e)),
            };
            if self.cancel.map_or(false, CancelToken::is_cancelled) {
                return Err(ErrorKind::Cancelled.into());
            }
            if ret == 0 {
                if ms < 0 || deadline.map_or(false, |d| Instant::now() < d) {
                    continue;
                }
                return Ok(Lines::new());
            }

            let ready: Vec<Line> = self
                .lines
                .iter()
                .zip(&fds)
                .filter(|(_, fd)| fd.revents().map_or(false, |r| !r.is_empty()))
                .map(|(line, _)| line.clone())
                .collect();
            trace!("{} of {} lines ready", ready.len(), handles.len());
            return Ok(Lines::from_vec(ready));
        }
    }
}

/// Remaining time in whole milliseconds, rounded up.
fn timeout_ms(remaining: Duration) -> libc::c_int {
    let ms = (remaining.as_nanos() + 999_999) / 1_000_000;
    ms.min(libc::c_int::MAX as u128) as libc::c_int
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimChip;
    use crate::{Chip, LineRequestConfig, RequestType};
    use nix::sys::pthread::{pthread_kill, pthread_self};
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
    use std::thread;

    fn events(chip: &Chip, offsets: &[u32]) -> Lines {
        let lines = chip.get_lines(offsets).unwrap();
        lines
            .request(&LineRequestConfig::new("events", RequestType::EventBoth), None)
            .unwrap();
        lines
    }

    #[test]
    fn decode_timestamp() {
        let mut buf = [0u8; ffi::GPIOEVENT_DATA_SIZE];
        buf[..8].copy_from_slice(&1_500_000_000u64.to_ne_bytes());
        buf[8..12].copy_from_slice(&ffi::GPIOEVENT_EVENT_FALLING_EDGE.to_ne_bytes());
        let event = LineEvent::from_bytes(&buf).unwrap();
        assert_eq!(event.seconds(), 1);
        assert_eq!(event.nanoseconds(), 500_000_000);
        assert_eq!(event.event_type(), EventType::FallingEdge);

        buf[8..12].copy_from_slice(&ffi::GPIOEVENT_EVENT_RISING_EDGE.to_ne_bytes());
        let event = LineEvent::from_bytes(&buf).unwrap();
        assert_eq!(event.event_type(), EventType::RisingEdge);

        buf[8..12].copy_from_slice(&7u32.to_ne_bytes());
        let event = LineEvent::from_bytes(&buf).unwrap();
        assert_eq!(event.event_type(), EventType::FallingEdge);
    }

    #[test]
    fn rounds_remaining_time_up() {
        assert_eq!(timeout_ms(Duration::from_micros(1)), 1);
        assert_eq!(timeout_ms(Duration::from_millis(100)), 100);
        assert_eq!(timeout_ms(Duration::from_secs(0)), 0);
        assert_eq!(timeout_ms(Duration::from_secs(u64::MAX)), libc::c_int::MAX);
    }

    #[test]
    fn wait_times_out_with_empty_result() {
        let chip = Chip::from_device(SimChip::new("gpiochip0", 8)).unwrap();
        let lines = events(&chip, &[1, 2]);

        let start = Instant::now();
        let ready = lines.event_wait(Some(Duration::from_millis(100))).unwrap();
        let elapsed = start.elapsed();
        assert!(ready.is_empty());
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_secs(5));
    }

    extern "C" fn ignore_signal(_: libc::c_int) {}

    #[test]
    fn wait_restarts_after_signals() {
        let handler = SigAction::new(
            SigHandler::Handler(ignore_signal),
            SaFlags::empty(),
            SigSet::empty(),
        );
        unsafe { sigaction(Signal::SIGUSR1, &handler) }.unwrap();

        let chip = Chip::from_device(SimChip::new("gpiochip0", 8)).unwrap();
        let lines = events(&chip, &[0, 7]);

        let waiter = pthread_self();
        let sender = thread::spawn(move || {
            for _ in 0..4 {
                thread::sleep(Duration::from_millis(50));
                pthread_kill(waiter, Signal::SIGUSR1).unwrap();
            }
        });

        let start = Instant::now();
        let ready = lines.event_wait(Some(Duration::from_millis(300))).unwrap();
        let elapsed = start.elapsed();
        sender.join().unwrap();
        assert!(ready.is_empty());
        assert!(elapsed >= Duration::from_millis(300));
    }

    #[test]
    fn wait_reports_ready_lines_in_group_order() {
        let sim = SimChip::new("gpiochip0", 8);
        let chip = Chip::from_device(sim.clone()).unwrap();
        let lines = events(&chip, &[6, 2, 4]);

        sim.set_level(4, 1);
        sim.set_level(6, 1);
        let ready = lines.event_wait(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(ready.offsets(), vec![6, 4]);

        let event = ready[0].event_read().unwrap();
        assert_eq!(event.event_type(), EventType::RisingEdge);
        let event = ready[1].event_read().unwrap();
        assert_eq!(event.event_type(), EventType::RisingEdge);

        let ready = lines.event_wait(Some(Duration::from_millis(10))).unwrap();
        assert!(ready.is_empty());
    }

    #[test]
    fn wait_needs_event_requests() {
        let chip = Chip::from_device(SimChip::new("gpiochip0", 8)).unwrap();
        let lines = chip.get_lines(&[0, 1]).unwrap();
        assert!(matches!(
            lines.event_wait(None).unwrap_err().kind(),
            ErrorKind::Invalid(_)
        ));

        lines
            .request(&LineRequestConfig::new("values", RequestType::Input), None)
            .unwrap();
        assert!(matches!(
            lines.event_wait(None).unwrap_err().kind(),
            ErrorKind::Invalid(_)
        ));
    }

    #[test]
    fn cancel_interrupts_wait() {
        let chip = Chip::from_device(SimChip::new("gpiochip0", 8)).unwrap();
        let lines = events(&chip, &[3]);
        let token = CancelToken::new().unwrap();

        let remote = token.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.cancel();
        });

        let err = EventWaiter::new(&lines)
            .with_cancel(&token)
            .wait(None)
            .unwrap_err();
        assert!(err.is_cancelled());
        canceller.join().unwrap();

        let err = EventWaiter::new(&lines)
            .with_cancel(&token)
            .wait(Some(Duration::from_secs(1)))
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn short_read_is_an_error() {
        let sim = SimChip::new("gpiochip0", 8);
        let chip = Chip::from_device(sim.clone()).unwrap();
        let lines = events(&chip, &[5]);

        sim.inject_raw(5, &[1, 2, 3, 4, 5]);
        let err = lines[0].event_read().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Event(_)));
        assert_eq!(err.errno(), Some(Errno::EIO));
    }

    #[test]
    fn read_multiple_events() {
        let sim = SimChip::new("gpiochip0", 8);
        let chip = Chip::from_device(sim.clone()).unwrap();
        let lines = events(&chip, &[0]);

        sim.set_level(0, 1);
        sim.set_level(0, 0);
        sim.set_level(0, 1);
        let got = lines[0].event_read_multiple(MAX_EVENTS).unwrap();
        let types: Vec<_> = got.iter().map(LineEvent::event_type).collect();
        assert_eq!(
            types,
            vec![
                EventType::RisingEdge,
                EventType::FallingEdge,
                EventType::RisingEdge
            ]
        );
        assert!(got[0].timestamp() < got[1].timestamp());
        assert_eq!(got[1].timestamp() - got[0].timestamp(), 1_500_000_000);
    }
}
