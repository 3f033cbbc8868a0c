// Copyright (c) 2018 The rust-gpio-cdev Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! An in-process GPIO chip for tests and demos without hardware.
//!
//! `SimChip` answers the same calls as a kernel gpiochip, with the kernel's
//! errno choices for the common failure cases. Handles are one end of a unix
//! socket pair, so event descriptors are pollable and edge events written by
//! [`SimChip::set_level`] arrive as real kernel-sized records.
//!
//! ```
//! use gpio_bulk::sim::SimChip;
//! use gpio_bulk::{Chip, LineRequestConfig, RequestType};
//!
//! # fn main() -> gpio_bulk::Result<()> {
//! let sim = SimChip::new("gpiochip0", 8);
//! let chip = Chip::from_device(sim.clone())?;
//! let line = chip.get_line(3)?;
//! line.request(&LineRequestConfig::new("doc", RequestType::Output), 1)?;
//! assert_eq!(sim.level(3), 1);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;

use log::warn;
use nix::errno::Errno;
use parking_lot::Mutex;

use crate::device::{
    ChipInfo, EventFlags, EventRequest, GpioDevice, HandleFlags, HandleRequest, LineInfoFlags,
    RawLineInfo,
};
use crate::errors::{ioctl_err, Result};
use crate::ffi;
use crate::IoctlKind;

const EVENT_INTERVAL_NS: u64 = 1_500_000_000;

#[derive(Debug, Default)]
struct SimLine {
    name: Option<String>,
    consumer: Option<String>,
    flags: LineInfoFlags,
    /// Physical level, before active-low inversion.
    level: u8,
    requested: bool,
    info_fails: bool,
}

impl SimLine {
    fn logical(&self) -> u8 {
        if self.flags.contains(LineInfoFlags::ACTIVE_LOW) {
            self.level ^ 1
        } else {
            self.level
        }
    }
}

#[derive(Debug)]
struct SimHandle {
    offsets: Vec<u32>,
    events: Option<EventFlags>,
    peer: UnixStream,
}

#[derive(Debug, Default)]
struct SimState {
    lines: Vec<SimLine>,
    handles: HashMap<RawFd, SimHandle>,
    released: usize,
    clock: u64,
    fail_line_info: bool,
}

#[derive(Debug)]
pub struct SimChip {
    name: String,
    label: String,
    state: Mutex<SimState>,
}

impl SimChip {
    pub fn new(name: &str, num_lines: u32) -> Arc<SimChip> {
        let lines = (0..num_lines).map(|_| SimLine::default()).collect();
        Arc::new(SimChip {
            name: name.to_owned(),
            label: format!("{}-sim", name),
            state: Mutex::new(SimState {
                lines,
                ..SimState::default()
            }),
        })
    }

    pub fn set_line_name(&self, offset: u32, name: &str) {
        if let Some(line) = self.state.lock().lines.get_mut(offset as usize) {
            line.name = Some(name.to_owned());
        }
    }

    /// Mark a line as held by another consumer; requesting it gets `EBUSY`.
    pub fn hog(&self, offset: u32, consumer: &str) {
        if let Some(line) = self.state.lock().lines.get_mut(offset as usize) {
            line.requested = true;
            line.consumer = Some(consumer.to_owned());
            line.flags |= LineInfoFlags::KERNEL;
        }
    }

    /// Make line info queries fail with `EIO` until turned off again.
    pub fn fail_line_info(&self, fail: bool) {
        self.state.lock().fail_line_info = fail;
    }

    /// Like [`fail_line_info`](SimChip::fail_line_info), for a single line.
    pub fn fail_line_info_at(&self, offset: u32, fail: bool) {
        if let Some(line) = self.state.lock().lines.get_mut(offset as usize) {
            line.info_fails = fail;
        }
    }

    /// Physical level of a line.
    pub fn level(&self, offset: u32) -> u8 {
        self.state
            .lock()
            .lines
            .get(offset as usize)
            .map_or(0, |line| line.level)
    }

    /// Drive a line from the outside, emitting an edge event to any event
    /// handle subscribed to the resulting transition.
    pub fn set_level(&self, offset: u32, level: u8) {
        let mut state = self.state.lock();
        let state = &mut *state;
        let line = match state.lines.get_mut(offset as usize) {
            Some(line) => line,
            None => return,
        };
        let level = (level != 0) as u8;
        if line.level == level {
            return;
        }
        line.level = level;
        let (edge, id) = if line.logical() == 1 {
            (EventFlags::RISING_EDGE, ffi::GPIOEVENT_EVENT_RISING_EDGE)
        } else {
            (EventFlags::FALLING_EDGE, ffi::GPIOEVENT_EVENT_FALLING_EDGE)
        };

        state.clock += EVENT_INTERVAL_NS;
        let mut record = [0u8; ffi::GPIOEVENT_DATA_SIZE];
        record[..8].copy_from_slice(&state.clock.to_ne_bytes());
        record[8..12].copy_from_slice(&id.to_ne_bytes());

        for handle in state.handles.values() {
            match handle.events {
                Some(flags) if flags.contains(edge) && handle.offsets[0] == offset => {
                    if let Err(e) = (&handle.peer).write_all(&record) {
                        warn!("sim: failed to queue event for line {}: {}", offset, e);
                    }
                }
                _ => {}
            }
        }
    }

    /// Write arbitrary bytes to the event descriptor of a line.
    pub fn inject_raw(&self, offset: u32, bytes: &[u8]) {
        let state = self.state.lock();
        for handle in state.handles.values() {
            if handle.events.is_some() && handle.offsets[0] == offset {
                if let Err(e) = (&handle.peer).write_all(bytes) {
                    warn!("sim: failed to inject bytes for line {}: {}", offset, e);
                }
            }
        }
    }

    /// Number of handles currently open.
    pub fn open_handles(&self) -> usize {
        self.state.lock().handles.len()
    }

    /// Number of handles closed so far.
    pub fn released_handles(&self) -> usize {
        self.state.lock().released
    }

    fn check_flags(kind: IoctlKind, flags: HandleFlags) -> Result<()> {
        let bias = flags
            & (HandleFlags::BIAS_DISABLE | HandleFlags::BIAS_PULL_DOWN | HandleFlags::BIAS_PULL_UP);
        let invalid = flags.contains(HandleFlags::INPUT | HandleFlags::OUTPUT)
            || flags.contains(HandleFlags::OPEN_DRAIN | HandleFlags::OPEN_SOURCE)
            || (flags.intersects(HandleFlags::OPEN_DRAIN | HandleFlags::OPEN_SOURCE)
                && !flags.contains(HandleFlags::OUTPUT))
            || (!bias.is_empty() && !flags.intersects(HandleFlags::INPUT | HandleFlags::OUTPUT))
            || bias.bits().count_ones() > 1;
        if invalid {
            Err(ioctl_err(kind, Errno::EINVAL))
        } else {
            Ok(())
        }
    }

    fn apply_flags(line: &mut SimLine, flags: HandleFlags) {
        let mut info = line.flags & (LineInfoFlags::KERNEL | LineInfoFlags::IS_OUT);
        if flags.contains(HandleFlags::OUTPUT) {
            info |= LineInfoFlags::IS_OUT;
        } else if flags.contains(HandleFlags::INPUT) {
            info.remove(LineInfoFlags::IS_OUT);
        }
        let carried = HandleFlags::ACTIVE_LOW
            | HandleFlags::OPEN_DRAIN
            | HandleFlags::OPEN_SOURCE
            | HandleFlags::BIAS_PULL_UP
            | HandleFlags::BIAS_PULL_DOWN
            | HandleFlags::BIAS_DISABLE;
        // Bits line up between the two flag sets past IS_OUT.
        info |= LineInfoFlags::from_bits_truncate((flags & carried).bits());
        line.flags = info;
    }

    fn drive(line: &mut SimLine, logical: u8) {
        let logical = (logical != 0) as u8;
        line.level = if line.flags.contains(LineInfoFlags::ACTIVE_LOW) {
            logical ^ 1
        } else {
            logical
        };
    }

    fn open_handle(
        state: &mut SimState,
        offsets: Vec<u32>,
        events: Option<EventFlags>,
    ) -> Result<File> {
        let (ours, peer) = UnixStream::pair()?;
        let fd = ours.as_raw_fd();
        state.handles.insert(
            fd,
            SimHandle {
                offsets,
                events,
                peer,
            },
        );
        Ok(File::from(OwnedFd::from(ours)))
    }
}

impl GpioDevice for SimChip {
    fn chip_info(&self) -> Result<ChipInfo> {
        Ok(ChipInfo {
            name: self.name.clone(),
            label: self.label.clone(),
            num_lines: self.state.lock().lines.len() as u32,
        })
    }

    fn line_info(&self, offset: u32) -> Result<RawLineInfo> {
        let state = self.state.lock();
        if state.fail_line_info {
            return Err(ioctl_err(IoctlKind::LineInfo, Errno::EIO));
        }
        let line = state
            .lines
            .get(offset as usize)
            .ok_or_else(|| ioctl_err(IoctlKind::LineInfo, Errno::EINVAL))?;
        if line.info_fails {
            return Err(ioctl_err(IoctlKind::LineInfo, Errno::EIO));
        }
        Ok(RawLineInfo {
            offset,
            flags: line.flags,
            name: line.name.clone(),
            consumer: line.consumer.clone(),
        })
    }

    fn request_lines(&self, req: &HandleRequest<'_>) -> Result<File> {
        let kind = IoctlKind::LineHandle;
        if req.offsets.is_empty() || req.offsets.len() > ffi::GPIOHANDLES_MAX {
            return Err(ioctl_err(kind, Errno::EINVAL));
        }
        Self::check_flags(kind, req.flags)?;

        let mut state = self.state.lock();
        for (i, &offset) in req.offsets.iter().enumerate() {
            let line = state
                .lines
                .get(offset as usize)
                .ok_or_else(|| ioctl_err(kind, Errno::EINVAL))?;
            if line.requested || req.offsets[..i].contains(&offset) {
                return Err(ioctl_err(kind, Errno::EBUSY));
            }
        }

        for (i, &offset) in req.offsets.iter().enumerate() {
            let line = &mut state.lines[offset as usize];
            line.requested = true;
            line.consumer = Some(req.consumer.to_owned()).filter(|c| !c.is_empty());
            line.flags |= LineInfoFlags::KERNEL;
            Self::apply_flags(line, req.flags);
            if req.flags.contains(HandleFlags::OUTPUT) {
                Self::drive(line, req.default_values.get(i).copied().unwrap_or(0));
            }
        }

        Self::open_handle(&mut state, req.offsets.to_vec(), None)
    }

    fn request_event(&self, req: &EventRequest<'_>) -> Result<File> {
        let kind = IoctlKind::LineEvent;
        if req.handle_flags.contains(HandleFlags::OUTPUT) {
            return Err(ioctl_err(kind, Errno::EINVAL));
        }
        Self::check_flags(kind, req.handle_flags)?;

        let mut state = self.state.lock();
        let line = state
            .lines
            .get_mut(req.offset as usize)
            .ok_or_else(|| ioctl_err(kind, Errno::EINVAL))?;
        if line.requested {
            return Err(ioctl_err(kind, Errno::EBUSY));
        }
        line.requested = true;
        line.consumer = Some(req.consumer.to_owned()).filter(|c| !c.is_empty());
        line.flags |= LineInfoFlags::KERNEL;
        Self::apply_flags(line, req.handle_flags | HandleFlags::INPUT);

        Self::open_handle(&mut state, vec![req.offset], Some(req.event_flags))
    }

    fn get_values(&self, handle: &File, values: &mut [u8]) -> Result<()> {
        let state = self.state.lock();
        let h = state
            .handles
            .get(&handle.as_raw_fd())
            .ok_or_else(|| ioctl_err(IoctlKind::GetLine, Errno::EBADF))?;
        for (v, &offset) in values.iter_mut().zip(&h.offsets) {
            *v = state.lines[offset as usize].logical();
        }
        Ok(())
    }

    fn set_values(&self, handle: &File, values: &[u8]) -> Result<()> {
        let kind = IoctlKind::SetLine;
        let mut state = self.state.lock();
        let state = &mut *state;
        let h = state
            .handles
            .get(&handle.as_raw_fd())
            .ok_or_else(|| ioctl_err(kind, Errno::EBADF))?;
        if h.events.is_some() {
            return Err(ioctl_err(kind, Errno::EINVAL));
        }
        if h
            .offsets
            .iter()
            .any(|&o| !state.lines[o as usize].flags.contains(LineInfoFlags::IS_OUT))
        {
            return Err(ioctl_err(kind, Errno::EPERM));
        }
        for (&v, &offset) in values.iter().zip(&h.offsets) {
            Self::drive(&mut state.lines[offset as usize], v);
        }
        Ok(())
    }

    fn set_config(&self, handle: &File, flags: HandleFlags, values: &[u8]) -> Result<()> {
        let kind = IoctlKind::SetConfig;
        Self::check_flags(kind, flags)?;

        let mut state = self.state.lock();
        let state = &mut *state;
        let h = state
            .handles
            .get(&handle.as_raw_fd())
            .ok_or_else(|| ioctl_err(kind, Errno::EBADF))?;
        if h.events.is_some() {
            return Err(ioctl_err(kind, Errno::EINVAL));
        }
        for (i, &offset) in h.offsets.iter().enumerate() {
            let line = &mut state.lines[offset as usize];
            Self::apply_flags(line, flags);
            if flags.contains(HandleFlags::OUTPUT) {
                Self::drive(line, values.get(i).copied().unwrap_or(0));
            }
        }
        Ok(())
    }

    fn release(&self, handle: &File) {
        let mut state = self.state.lock();
        if let Some(h) = state.handles.remove(&handle.as_raw_fd()) {
            for offset in h.offsets {
                let line = &mut state.lines[offset as usize];
                line.requested = false;
                line.consumer = None;
                line.flags.remove(LineInfoFlags::KERNEL);
            }
            state.released += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(sim: &SimChip, offsets: &[u32], flags: HandleFlags) -> Result<File> {
        sim.request_lines(&HandleRequest {
            offsets,
            flags,
            default_values: &[],
            consumer: "sim-test",
        })
    }

    #[test]
    fn double_request_is_busy() {
        let sim = SimChip::new("sim0", 4);
        let _held = request(&sim, &[1], HandleFlags::INPUT).unwrap();
        let err = request(&sim, &[0, 1], HandleFlags::INPUT).unwrap_err();
        assert_eq!(err.errno(), Some(Errno::EBUSY));

        let err = request(&sim, &[2, 2], HandleFlags::INPUT).unwrap_err();
        assert_eq!(err.errno(), Some(Errno::EBUSY));
    }

    #[test]
    fn kernel_flag_rules() {
        let sim = SimChip::new("sim0", 4);
        let err = request(&sim, &[0], HandleFlags::INPUT | HandleFlags::OPEN_DRAIN).unwrap_err();
        assert_eq!(err.errno(), Some(Errno::EINVAL));
        let err = request(&sim, &[0], HandleFlags::BIAS_PULL_UP).unwrap_err();
        assert_eq!(err.errno(), Some(Errno::EINVAL));
        assert!(request(&sim, &[0], HandleFlags::INPUT | HandleFlags::BIAS_PULL_UP).is_ok());
    }

    #[test]
    fn release_frees_lines() {
        let sim = SimChip::new("sim0", 4);
        let file = request(&sim, &[0, 3], HandleFlags::OUTPUT).unwrap();
        assert!(sim.line_info(3).unwrap().flags.contains(LineInfoFlags::KERNEL));
        sim.release(&file);
        drop(file);
        assert!(!sim.line_info(3).unwrap().flags.contains(LineInfoFlags::KERNEL));
        assert_eq!(sim.released_handles(), 1);
        assert!(request(&sim, &[3], HandleFlags::INPUT).is_ok());
    }
}
