// Copyright (c) 2018 The rust-gpio-cdev Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Line state management and bulk requests for the Linux GPIO character
//! device (`/dev/gpiochipN`).
//!
//! A [`Chip`] hands out one [`Line`] per offset. Lines are collected into
//! [`Lines`] groups, which are the unit of request, release, value access and
//! event waiting. A group is requested either for values, in which case all
//! members share one kernel handle, or for edge events, in which case every
//! member gets its own event handle. The kernel resources are tracked per line
//! and closed when the last line using them is released.
//!
//! ```no_run
//! use gpio_bulk::{Chip, LineRequestConfig, RequestType};
//! use std::time::Duration;
//!
//! # fn main() -> gpio_bulk::Result<()> {
//! let chip = Chip::open("/dev/gpiochip0")?;
//!
//! let leds = chip.get_lines(&[4, 5, 6])?;
//! leds.request(
//!     &LineRequestConfig::new("leds", RequestType::Output),
//!     Some(&[1, 0, 1]),
//! )?;
//! leds.set_values(&[0, 1, 0])?;
//!
//! let buttons = chip.get_lines(&[10, 11])?;
//! buttons.request(&LineRequestConfig::new("buttons", RequestType::EventBoth), None)?;
//! for line in buttons.event_wait(Some(Duration::from_secs(1)))?.iter() {
//!     println!("line {}: {:?}", line.offset(), line.event_read()?);
//! }
//! # Ok(())
//! # }
//! ```

use bitflags::bitflags;

mod chip;
pub mod device;
mod errors;
mod event;
mod ffi;
mod handle;
mod line;
mod lines;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

#[cfg(feature = "async-tokio")]
mod async_tokio;

#[cfg(feature = "async-tokio")]
pub use crate::async_tokio::AsyncLineEventStream;
pub use crate::chip::Chip;
pub use crate::errors::{Error, ErrorKind, Result};
pub use crate::event::{CancelToken, EventType, EventWaiter, LineEvent, MAX_EVENTS};
pub use crate::line::{ActiveState, Bias, Drive, Line, LineDirection, LineInfo, LineState};
pub use crate::lines::Lines;

use crate::device::{EventFlags, HandleFlags};
use crate::errors::argument_err;

/// Largest number of lines a single request can carry.
pub const MAX_LINES: usize = ffi::GPIOHANDLES_MAX;

/// The ioctl that failed, carried by [`ErrorKind::Ioctl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlKind {
    ChipInfo,
    LineInfo,
    LineHandle,
    LineEvent,
    GetLine,
    SetLine,
    SetConfig,
}

/// What a request asks the kernel for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    /// Value access, leaving the direction as it is.
    AsIs,
    Input,
    Output,
    EventRising,
    EventFalling,
    EventBoth,
}

impl RequestType {
    pub fn is_event(self) -> bool {
        matches!(
            self,
            RequestType::EventRising | RequestType::EventFalling | RequestType::EventBoth
        )
    }

    pub(crate) fn event_flags(self) -> EventFlags {
        match self {
            RequestType::EventRising => EventFlags::RISING_EDGE,
            RequestType::EventFalling => EventFlags::FALLING_EDGE,
            RequestType::EventBoth => EventFlags::BOTH_EDGES,
            _ => EventFlags::empty(),
        }
    }
}

bitflags! {
    /// Line request flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LineRequestFlags: u32 {
        const ACTIVE_LOW = (1 << 0);
        const OPEN_DRAIN = (1 << 1);
        const OPEN_SOURCE = (1 << 2);
        const BIAS_DISABLE = (1 << 3);
        const BIAS_PULL_DOWN = (1 << 4);
        const BIAS_PULL_UP = (1 << 5);
    }
}

impl LineRequestFlags {
    /// Reject combinations the kernel would refuse anyway.
    pub(crate) fn validate(self) -> Result<()> {
        if self.contains(LineRequestFlags::OPEN_DRAIN | LineRequestFlags::OPEN_SOURCE) {
            return Err(argument_err("open-drain and open-source are exclusive"));
        }
        let bias = self
            & (LineRequestFlags::BIAS_DISABLE
                | LineRequestFlags::BIAS_PULL_DOWN
                | LineRequestFlags::BIAS_PULL_UP);
        if bias.bits().count_ones() > 1 {
            return Err(argument_err("only one bias setting may be given"));
        }
        Ok(())
    }

    /// Kernel handle flags for these request flags and a direction.
    pub(crate) fn handle_flags(self, request_type: RequestType) -> HandleFlags {
        let mut flags = match request_type {
            RequestType::AsIs => HandleFlags::empty(),
            RequestType::Output => HandleFlags::OUTPUT,
            _ => HandleFlags::INPUT,
        };
        if self.contains(LineRequestFlags::ACTIVE_LOW) {
            flags |= HandleFlags::ACTIVE_LOW;
        }
        if self.contains(LineRequestFlags::OPEN_DRAIN) {
            flags |= HandleFlags::OPEN_DRAIN;
        }
        if self.contains(LineRequestFlags::OPEN_SOURCE) {
            flags |= HandleFlags::OPEN_SOURCE;
        }
        if self.contains(LineRequestFlags::BIAS_DISABLE) {
            flags |= HandleFlags::BIAS_DISABLE;
        }
        if self.contains(LineRequestFlags::BIAS_PULL_DOWN) {
            flags |= HandleFlags::BIAS_PULL_DOWN;
        }
        if self.contains(LineRequestFlags::BIAS_PULL_UP) {
            flags |= HandleFlags::BIAS_PULL_UP;
        }
        flags
    }

    /// The request flags carried by a handle, without its direction.
    pub(crate) fn from_handle_flags(flags: HandleFlags) -> LineRequestFlags {
        let mut out = LineRequestFlags::empty();
        if flags.contains(HandleFlags::ACTIVE_LOW) {
            out |= LineRequestFlags::ACTIVE_LOW;
        }
        if flags.contains(HandleFlags::OPEN_DRAIN) {
            out |= LineRequestFlags::OPEN_DRAIN;
        }
        if flags.contains(HandleFlags::OPEN_SOURCE) {
            out |= LineRequestFlags::OPEN_SOURCE;
        }
        if flags.contains(HandleFlags::BIAS_DISABLE) {
            out |= LineRequestFlags::BIAS_DISABLE;
        }
        if flags.contains(HandleFlags::BIAS_PULL_DOWN) {
            out |= LineRequestFlags::BIAS_PULL_DOWN;
        }
        if flags.contains(HandleFlags::BIAS_PULL_UP) {
            out |= LineRequestFlags::BIAS_PULL_UP;
        }
        out
    }
}

/// Everything a request needs besides the lines and default values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRequestConfig {
    pub consumer: String,
    pub request_type: RequestType,
    pub flags: LineRequestFlags,
}

impl LineRequestConfig {
    pub fn new(consumer: &str, request_type: RequestType) -> LineRequestConfig {
        LineRequestConfig {
            consumer: consumer.to_owned(),
            request_type,
            flags: LineRequestFlags::empty(),
        }
    }

    pub fn with_flags(mut self, flags: LineRequestFlags) -> LineRequestConfig {
        self.flags = flags;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicting_flags_are_rejected() {
        let drive = LineRequestFlags::OPEN_DRAIN | LineRequestFlags::OPEN_SOURCE;
        assert!(matches!(
            drive.validate().unwrap_err().kind(),
            ErrorKind::InvalidArgument(_)
        ));

        let bias = LineRequestFlags::BIAS_PULL_UP | LineRequestFlags::BIAS_PULL_DOWN;
        assert!(bias.validate().is_err());

        let ok = LineRequestFlags::ACTIVE_LOW | LineRequestFlags::BIAS_PULL_UP;
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn handle_flags_follow_direction() {
        let flags = LineRequestFlags::ACTIVE_LOW | LineRequestFlags::OPEN_DRAIN;
        assert_eq!(
            flags.handle_flags(RequestType::Output),
            HandleFlags::OUTPUT | HandleFlags::ACTIVE_LOW | HandleFlags::OPEN_DRAIN
        );
        assert_eq!(
            LineRequestFlags::empty().handle_flags(RequestType::AsIs),
            HandleFlags::empty()
        );
        assert_eq!(
            LineRequestFlags::BIAS_PULL_UP.handle_flags(RequestType::EventBoth),
            HandleFlags::INPUT | HandleFlags::BIAS_PULL_UP
        );
    }

    #[test]
    fn event_types() {
        assert!(RequestType::EventFalling.is_event());
        assert!(!RequestType::Input.is_event());
        assert_eq!(RequestType::EventBoth.event_flags(), EventFlags::BOTH_EDGES);
    }
}
