// Copyright (c) 2018 The rust-gpio-cdev Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Wrapper for asynchronous programming using Tokio.

use futures::ready;
use futures::stream::Stream;
use futures::task::{Context, Poll};
use tokio::io::unix::AsyncFd;

use std::io;
use std::os::unix::io::AsRawFd;
use std::pin::Pin;
use std::sync::Arc;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};

use crate::errors::event_err;
use crate::event::{read_err, LineEvent};
use crate::ffi;
use crate::handle::RequestHandle;
use crate::line::Line;
use crate::Result;

/// A `futures::stream::Stream` of the edge events of one line.
///
/// The line must be requested for events. The stream keeps the event handle
/// open even if the line is released meanwhile. Its descriptor is switched to
/// non-blocking mode, which also affects [`Line::event_read`] on the same
/// line.
///
/// # Example
///
/// The following example waits for state changes on an input line.
///
/// ```no_run
/// use futures::stream::StreamExt;
/// use gpio_bulk::{AsyncLineEventStream, Chip, LineRequestConfig, RequestType};
///
/// async fn print_events(offset: u32) -> gpio_bulk::Result<()> {
///     let chip = Chip::open("/dev/gpiochip0")?;
///     let line = chip.get_line(offset)?;
///     line.request(&LineRequestConfig::new("gpioevents", RequestType::EventBoth), 0)?;
///     let mut events = AsyncLineEventStream::new(&line)?;
///
///     while let Some(event) = events.next().await {
///         println!("{:?}", event?);
///     }
///     Ok(())
/// }
///
/// # #[tokio::main]
/// # async fn main() {
/// #     print_events(42).await.unwrap();
/// # }
/// ```
pub struct AsyncLineEventStream {
    fd: AsyncFd<Arc<RequestHandle>>,
}

impl AsyncLineEventStream {
    /// Must be called from within a Tokio runtime.
    pub fn new(line: &Line) -> Result<AsyncLineEventStream> {
        let handle = line.event_handle()?;

        // The file descriptor needs to be configured for non-blocking I/O for AsyncFd to work.
        let fd = handle.as_raw_fd();
        let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(io::Error::from)?;
        let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(io::Error::from)?;

        Ok(AsyncLineEventStream {
            fd: AsyncFd::new(handle)?,
        })
    }
}

impl Stream for AsyncLineEventStream {
    type Item = Result<LineEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        let mut buf = [0u8; ffi::GPIOEVENT_DATA_SIZE];
        loop {
            let mut guard = match ready!(self.fd.poll_read_ready(cx)) {
                Ok(guard) => guard,
                Err(e) => return Poll::Ready(Some(Err(e.into()))),
            };
            match guard.try_io(|fd| fd.get_ref().read(&mut buf)) {
                Ok(Ok(n)) if n == buf.len() => {
                    return Poll::Ready(Some(LineEvent::from_bytes(&buf)))
                }
                Ok(Ok(_)) => return Poll::Ready(Some(Err(event_err(Errno::EIO)))),
                Ok(Err(e)) => return Poll::Ready(Some(Err(read_err(e)))),
                // Readiness was cleared; poll again.
                Err(_would_block) => continue,
            }
        }
    }
}

impl std::fmt::Debug for AsyncLineEventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("AsyncLineEventStream")
            .field("handle", self.fd.get_ref())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimChip;
    use crate::{Chip, EventType, LineRequestConfig, RequestType};
    use futures::stream::StreamExt;

    #[tokio::test]
    async fn stream_yields_edges() {
        let sim = SimChip::new("gpiochip0", 4);
        let chip = Chip::from_device(sim.clone()).unwrap();
        let line = chip.get_line(2).unwrap();
        line.request(&LineRequestConfig::new("async", RequestType::EventBoth), 0)
            .unwrap();
        let mut events = AsyncLineEventStream::new(&line).unwrap();

        sim.set_level(2, 1);
        sim.set_level(2, 0);
        let first = events.next().await.unwrap().unwrap();
        let second = events.next().await.unwrap().unwrap();
        assert_eq!(first.event_type(), EventType::RisingEdge);
        assert_eq!(second.event_type(), EventType::FallingEdge);
    }

    #[tokio::test]
    async fn stream_switches_handle_to_non_blocking() {
        let chip = Chip::from_device(SimChip::new("gpiochip0", 4)).unwrap();
        let line = chip.get_line(0).unwrap();
        line.request(&LineRequestConfig::new("async", RequestType::EventRising), 0)
            .unwrap();
        let _events = AsyncLineEventStream::new(&line).unwrap();

        let fd = line.event_handle().unwrap().as_raw_fd();
        let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL).unwrap());
        assert!(flags.contains(OFlag::O_NONBLOCK));

        let err = line.event_read().unwrap_err();
        assert_eq!(err.errno(), Some(Errno::EAGAIN));
    }

    #[tokio::test]
    async fn stream_needs_event_request() {
        let chip = Chip::from_device(SimChip::new("gpiochip0", 4)).unwrap();
        let line = chip.get_line(1).unwrap();
        assert!(AsyncLineEventStream::new(&line).is_err());
    }
}
