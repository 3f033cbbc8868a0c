// Copyright (c) 2018 The rust-gpio-cdev Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::fmt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Weak};
use std::time::Duration;

use log::warn;
use parking_lot::Mutex;

use crate::chip::ChipInner;
use crate::device::{LineInfoFlags, RawLineInfo};
use crate::errors::{state_err, ErrorKind, Result};
use crate::event::{self, LineEvent};
use crate::handle::{HandleKind, RequestHandle};
use crate::lines::Lines;
use crate::{LineRequestConfig, LineRequestFlags, RequestType};

/// Ownership state of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    Free,
    /// Requested for values, sharing one handle with the rest of its request.
    RequestedValues,
    /// Requested for edge events through a handle of its own.
    RequestedEvents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineDirection {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveState {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bias {
    Unknown,
    Disabled,
    PullUp,
    PullDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drive {
    PushPull,
    OpenDrain,
    OpenSource,
}

/// Snapshot of a line's metadata as last reported by the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineInfo {
    raw: RawLineInfo,
}

impl LineInfo {
    pub fn offset(&self) -> u32 {
        self.raw.offset
    }

    pub fn flags(&self) -> LineInfoFlags {
        self.raw.flags
    }

    /// Name of the line, if the chip assigns one.
    pub fn name(&self) -> Option<&str> {
        self.raw.name.as_deref()
    }

    /// Label of whoever holds the line, if anyone set one.
    pub fn consumer(&self) -> Option<&str> {
        self.raw.consumer.as_deref()
    }

    pub fn direction(&self) -> LineDirection {
        if self.raw.flags.contains(LineInfoFlags::IS_OUT) {
            LineDirection::Out
        } else {
            LineDirection::In
        }
    }

    pub fn active_state(&self) -> ActiveState {
        if self.raw.flags.contains(LineInfoFlags::ACTIVE_LOW) {
            ActiveState::Low
        } else {
            ActiveState::High
        }
    }

    pub fn is_active_low(&self) -> bool {
        self.active_state() == ActiveState::Low
    }

    pub fn bias(&self) -> Bias {
        let flags = self.raw.flags;
        if flags.contains(LineInfoFlags::BIAS_DISABLE) {
            Bias::Disabled
        } else if flags.contains(LineInfoFlags::BIAS_PULL_UP) {
            Bias::PullUp
        } else if flags.contains(LineInfoFlags::BIAS_PULL_DOWN) {
            Bias::PullDown
        } else {
            Bias::Unknown
        }
    }

    pub fn drive(&self) -> Drive {
        let flags = self.raw.flags;
        if flags.contains(LineInfoFlags::OPEN_DRAIN) {
            Drive::OpenDrain
        } else if flags.contains(LineInfoFlags::OPEN_SOURCE) {
            Drive::OpenSource
        } else {
            Drive::PushPull
        }
    }

    /// True if the line is held by the kernel or by any user space consumer.
    pub fn is_used(&self) -> bool {
        self.raw.flags.contains(LineInfoFlags::KERNEL)
    }
}

/// What a line currently holds.
#[derive(Debug)]
pub(crate) enum Slot {
    Free,
    Values(Arc<RequestHandle>),
    Events(Arc<RequestHandle>),
}

impl Slot {
    fn state(&self) -> LineState {
        match self {
            Slot::Free => LineState::Free,
            Slot::Values(_) => LineState::RequestedValues,
            Slot::Events(_) => LineState::RequestedEvents,
        }
    }
}

#[derive(Debug)]
struct LineData {
    info: RawLineInfo,
    up_to_date: bool,
    slot: Slot,
}

pub(crate) struct LineInner {
    offset: u32,
    chip: Weak<ChipInner>,
    data: Mutex<LineData>,
}

/// A single line of a [`Chip`](crate::Chip).
///
/// Cloning is cheap; clones refer to the same descriptor, and so does every
/// later lookup of the same offset on the same chip.
#[derive(Clone)]
pub struct Line {
    inner: Arc<LineInner>,
}

impl Line {
    pub(crate) fn new(offset: u32, chip: Weak<ChipInner>) -> Line {
        Line {
            inner: Arc::new(LineInner {
                offset,
                chip,
                data: Mutex::new(LineData {
                    info: RawLineInfo {
                        offset,
                        ..RawLineInfo::default()
                    },
                    up_to_date: false,
                    slot: Slot::Free,
                }),
            }),
        }
    }

    pub fn offset(&self) -> u32 {
        self.inner.offset
    }

    /// The owning chip, as long as it is open.
    pub(crate) fn chip(&self) -> Result<Arc<ChipInner>> {
        match self.inner.chip.upgrade() {
            Some(chip) if !chip.is_closed() => Ok(chip),
            _ => Err(state_err("chip is closed")),
        }
    }

    pub(crate) fn same_chip(&self, other: &Line) -> bool {
        Weak::ptr_eq(&self.inner.chip, &other.inner.chip)
    }

    /// False once the owning chip has been closed.
    pub fn is_valid(&self) -> bool {
        self.chip().is_ok()
    }

    /// Cached metadata; see [`refresh`](Line::refresh) and
    /// [`needs_update`](Line::needs_update).
    pub fn info(&self) -> Result<LineInfo> {
        self.chip()?;
        Ok(LineInfo {
            raw: self.inner.data.lock().info.clone(),
        })
    }

    /// Re-read the line's metadata from the chip.
    ///
    /// On failure the cached metadata is kept and the line is flagged as
    /// needing an update; retrying is always safe.
    pub fn refresh(&self) -> Result<()> {
        let chip = self.chip()?;
        match chip.device.line_info(self.inner.offset) {
            Ok(info) => {
                let mut data = self.inner.data.lock();
                data.info = info;
                data.up_to_date = true;
                Ok(())
            }
            Err(e) => {
                self.inner.data.lock().up_to_date = false;
                Err(e)
            }
        }
    }

    /// Refresh after a state change, leaving a retry hint on failure.
    pub(crate) fn maybe_update(&self) {
        if let Err(e) = self.refresh() {
            warn!("line {}: metadata refresh failed: {}", self.inner.offset, e);
        }
    }

    pub fn needs_update(&self) -> bool {
        !self.inner.data.lock().up_to_date
    }

    pub fn state(&self) -> LineState {
        self.inner.data.lock().slot.state()
    }

    pub fn is_requested(&self) -> bool {
        self.state() != LineState::Free
    }

    pub fn is_free(&self) -> bool {
        self.state() == LineState::Free
    }

    /// The handle serving this line, if it is requested.
    pub(crate) fn handle(&self) -> Option<(HandleKind, Arc<RequestHandle>)> {
        match &self.inner.data.lock().slot {
            Slot::Free => None,
            Slot::Values(h) | Slot::Events(h) => Some((h.kind(), h.clone())),
        }
    }

    pub(crate) fn attach(&self, handle: Arc<RequestHandle>) {
        let slot = match handle.kind() {
            HandleKind::Values => Slot::Values(handle),
            HandleKind::Events => Slot::Events(handle),
        };
        self.inner.data.lock().slot = slot;
    }

    /// Return the line to `Free`, handing back whatever it held.
    pub(crate) fn detach(&self) -> Slot {
        std::mem::replace(&mut self.inner.data.lock().slot, Slot::Free)
    }

    /// Drop any held handle; used when the owning chip goes away.
    pub(crate) fn invalidate(&self) {
        let slot = self.detach();
        self.inner.data.lock().up_to_date = false;
        drop(slot);
    }

    fn as_lines(&self) -> Lines {
        Lines::single(self.clone())
    }

    /// Request this line alone. `default_value` only matters for outputs.
    pub fn request(&self, config: &LineRequestConfig, default_value: u8) -> Result<()> {
        self.as_lines().request(config, Some(&[default_value]))
    }

    pub fn release(&self) {
        self.as_lines().release()
    }

    pub fn get_value(&self) -> Result<u8> {
        Ok(self.as_lines().get_values()?[0])
    }

    pub fn set_value(&self, value: u8) -> Result<()> {
        self.as_lines().set_values(&[value])
    }

    pub fn set_config(
        &self,
        request_type: RequestType,
        flags: LineRequestFlags,
        value: u8,
    ) -> Result<()> {
        self.as_lines()
            .set_config(request_type, flags, Some(&[value]))
    }

    pub fn set_flags(&self, flags: LineRequestFlags) -> Result<()> {
        self.as_lines().set_flags(flags)
    }

    pub fn set_direction_input(&self) -> Result<()> {
        self.as_lines().set_direction_input()
    }

    pub fn set_direction_output(&self, value: u8) -> Result<()> {
        self.as_lines().set_direction_output(&[value])
    }

    /// Wait for an edge event on this line. `Ok(false)` means timeout.
    pub fn event_wait(&self, timeout: Option<Duration>) -> Result<bool> {
        Ok(!self.as_lines().event_wait(timeout)?.is_empty())
    }

    pub(crate) fn event_handle(&self) -> Result<Arc<RequestHandle>> {
        self.chip()?;
        match self.handle() {
            Some((HandleKind::Events, handle)) => Ok(handle),
            Some((HandleKind::Values, _)) => Err(state_err("line is not requested for events")),
            None => Err(ErrorKind::PermissionDenied(self.inner.offset).into()),
        }
    }

    /// Read one pending event, blocking until there is one.
    pub fn event_read(&self) -> Result<LineEvent> {
        event::read_event(&self.event_handle()?)
    }

    /// Read up to `max` pending events in one go, blocking until there is one.
    pub fn event_read_multiple(&self, max: usize) -> Result<Vec<LineEvent>> {
        event::read_events(&self.event_handle()?, max)
    }

    /// The pollable descriptor of an events-requested line.
    ///
    /// It stays valid until the line is released.
    pub fn event_fd(&self) -> Result<RawFd> {
        Ok(self.event_handle()?.as_raw_fd())
    }
}

impl PartialEq for Line {
    fn eq(&self, other: &Line) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Line {}

impl fmt::Debug for Line {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Line")
            .field("offset", &self.inner.offset)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimChip;
    use crate::Chip;

    fn chip(sim: &Arc<SimChip>) -> Chip {
        Chip::from_device(sim.clone()).unwrap()
    }

    #[test]
    fn unrequested_line_metadata() {
        let sim = SimChip::new("gpiochip0", 8);
        sim.set_line_name(4, "sim-4");
        let chip = chip(&sim);
        let info = chip.get_line(4).unwrap().info().unwrap();

        assert_eq!(info.offset(), 4);
        assert_eq!(info.name(), Some("sim-4"));
        assert_eq!(info.consumer(), None);
        assert_eq!(info.direction(), LineDirection::In);
        assert!(!info.is_active_low());
        assert!(!info.is_used());
        assert_eq!(info.drive(), Drive::PushPull);
        assert_eq!(info.bias(), Bias::Unknown);
    }

    #[test]
    fn requested_line_metadata_is_refreshed() {
        let sim = SimChip::new("gpiochip0", 8);
        let chip = chip(&sim);
        let line = chip.get_line(4).unwrap();
        let config = LineRequestConfig::new("meta", RequestType::Output)
            .with_flags(LineRequestFlags::ACTIVE_LOW | LineRequestFlags::OPEN_DRAIN);
        line.request(&config, 0).unwrap();

        let info = line.info().unwrap();
        assert_eq!(info.consumer(), Some("meta"));
        assert_eq!(info.direction(), LineDirection::Out);
        assert_eq!(info.active_state(), ActiveState::Low);
        assert_eq!(info.drive(), Drive::OpenDrain);
        assert!(info.is_used());
        assert!(!line.needs_update());
    }

    #[test]
    fn pull_up_bias_is_reported() {
        let sim = SimChip::new("gpiochip0", 8);
        let chip = chip(&sim);
        let line = chip.get_line(2).unwrap();
        let config = LineRequestConfig::new("bias", RequestType::Input)
            .with_flags(LineRequestFlags::BIAS_PULL_UP);
        line.request(&config, 0).unwrap();
        assert_eq!(line.info().unwrap().bias(), Bias::PullUp);
    }

    #[test]
    fn failed_refresh_keeps_cache_and_flags_retry() {
        let sim = SimChip::new("gpiochip0", 8);
        sim.set_line_name(1, "keep");
        let chip = chip(&sim);
        let line = chip.get_line(1).unwrap();

        sim.fail_line_info(true);
        assert!(line.refresh().is_err());
        assert!(line.needs_update());
        assert_eq!(line.info().unwrap().name(), Some("keep"));

        sim.fail_line_info(false);
        line.refresh().unwrap();
        assert!(!line.needs_update());
    }

    #[test]
    fn state_machine_is_total() {
        let sim = SimChip::new("gpiochip0", 8);
        let chip = chip(&sim);
        let line = chip.get_line(0).unwrap();
        let check = |line: &Line| assert_eq!(line.is_free(), !line.is_requested());

        check(&line);
        assert_eq!(line.state(), LineState::Free);

        line.request(&LineRequestConfig::new("t", RequestType::Input), 0)
            .unwrap();
        check(&line);
        assert_eq!(line.state(), LineState::RequestedValues);

        line.release();
        check(&line);
        line.request(&LineRequestConfig::new("t", RequestType::EventBoth), 0)
            .unwrap();
        check(&line);
        assert_eq!(line.state(), LineState::RequestedEvents);

        line.release();
        assert_eq!(line.state(), LineState::Free);
    }

    #[test]
    fn value_access_needs_a_request() {
        let sim = SimChip::new("gpiochip0", 8);
        let chip = chip(&sim);
        let line = chip.get_line(3).unwrap();

        let err = line.get_value().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::PermissionDenied(3)));
        let err = line.set_value(1).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::PermissionDenied(3)));

        line.request(&LineRequestConfig::new("t", RequestType::Input), 0)
            .unwrap();
        assert_eq!(line.get_value().unwrap(), 0);
        line.release();
        assert!(line.get_value().is_err());
    }

    #[test]
    fn active_low_values() {
        let sim = SimChip::new("gpiochip0", 8);
        let chip = chip(&sim);
        let line = chip.get_line(3).unwrap();
        let config = LineRequestConfig::new("t", RequestType::Output)
            .with_flags(LineRequestFlags::ACTIVE_LOW);
        line.request(&config, 1).unwrap();
        assert_eq!(sim.level(3), 0);
        line.set_value(0).unwrap();
        assert_eq!(sim.level(3), 1);
        assert_eq!(line.get_value().unwrap(), 0);
    }

    #[test]
    fn reconfigure_single_line() {
        let sim = SimChip::new("gpiochip0", 8);
        let chip = chip(&sim);
        let line = chip.get_line(3).unwrap();
        line.request(&LineRequestConfig::new("t", RequestType::Input), 0)
            .unwrap();
        assert_eq!(line.info().unwrap().direction(), LineDirection::In);

        line.set_config(RequestType::Output, LineRequestFlags::ACTIVE_LOW, 1)
            .unwrap();
        let info = line.info().unwrap();
        assert_eq!(info.direction(), LineDirection::Out);
        assert!(info.is_active_low());
        assert_eq!(sim.level(3), 0);
        line.set_value(0).unwrap();
        assert_eq!(sim.level(3), 1);

        line.set_config(RequestType::Output, LineRequestFlags::empty(), 0)
            .unwrap();
        assert!(!line.info().unwrap().is_active_low());
        assert_eq!(sim.level(3), 0);
    }

    #[test]
    fn set_flags_keeps_output_level() {
        let sim = SimChip::new("gpiochip0", 8);
        let chip = chip(&sim);
        let line = chip.get_line(3).unwrap();
        line.request(&LineRequestConfig::new("t", RequestType::Output), 1)
            .unwrap();
        assert_eq!(sim.level(3), 1);

        line.set_flags(LineRequestFlags::ACTIVE_LOW).unwrap();
        assert_eq!(line.info().unwrap().direction(), LineDirection::Out);
        assert!(line.info().unwrap().is_active_low());
        assert_eq!(sim.level(3), 0);

        line.set_flags(LineRequestFlags::empty()).unwrap();
        assert!(!line.info().unwrap().is_active_low());
        assert_eq!(sim.level(3), 1);
    }

    #[test]
    fn drive_flags_follow_set_flags() {
        let sim = SimChip::new("gpiochip0", 8);
        let chip = chip(&sim);
        let line = chip.get_line(3).unwrap();
        line.request(&LineRequestConfig::new("t", RequestType::Output), 0)
            .unwrap();
        assert_eq!(line.info().unwrap().drive(), Drive::PushPull);

        line.set_flags(LineRequestFlags::OPEN_DRAIN).unwrap();
        assert_eq!(line.info().unwrap().drive(), Drive::OpenDrain);
        line.set_flags(LineRequestFlags::OPEN_SOURCE).unwrap();
        assert_eq!(line.info().unwrap().drive(), Drive::OpenSource);
        line.set_flags(LineRequestFlags::empty()).unwrap();
        assert_eq!(line.info().unwrap().drive(), Drive::PushPull);
    }

    #[test]
    fn switch_direction() {
        let sim = SimChip::new("gpiochip0", 8);
        let chip = chip(&sim);
        let line = chip.get_line(3).unwrap();
        line.request(&LineRequestConfig::new("t", RequestType::Input), 0)
            .unwrap();

        line.set_direction_output(1).unwrap();
        assert_eq!(line.info().unwrap().direction(), LineDirection::Out);
        assert_eq!(sim.level(3), 1);

        line.set_direction_input().unwrap();
        assert_eq!(line.info().unwrap().direction(), LineDirection::In);
    }

    #[test]
    fn event_fd_only_for_event_requests() {
        let sim = SimChip::new("gpiochip0", 8);
        let chip = chip(&sim);
        let line = chip.get_line(3).unwrap();
        assert!(matches!(
            line.event_fd().unwrap_err().kind(),
            ErrorKind::PermissionDenied(3)
        ));

        line.request(&LineRequestConfig::new("t", RequestType::Input), 0)
            .unwrap();
        assert!(matches!(line.event_fd().unwrap_err().kind(), ErrorKind::Invalid(_)));

        line.release();
        line.request(&LineRequestConfig::new("t", RequestType::EventRising), 0)
            .unwrap();
        assert!(line.event_fd().unwrap() >= 0);
    }
}
