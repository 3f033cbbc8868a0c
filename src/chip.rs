// Copyright (c) 2018 The rust-gpio-cdev Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::device::{Cdev, GpioDevice};
use crate::errors::{offset_err, state_err, ErrorKind, Result};
use crate::line::Line;
use crate::lines::Lines;

#[derive(Debug)]
pub(crate) struct ChipInner {
    pub(crate) device: Arc<dyn GpioDevice>,
    name: String,
    label: String,
    num_lines: u32,
    /// One descriptor per offset, created on first lookup.
    lines: Mutex<Vec<Option<Line>>>,
    /// Held while lines of this chip are requested, released or reconfigured.
    pub(crate) guard: Mutex<()>,
    closed: AtomicBool,
}

impl ChipInner {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        let _guard = self.guard.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let lines = std::mem::take(&mut *self.lines.lock());
        for line in lines.into_iter().flatten() {
            line.invalidate();
        }
        debug!("closed chip {}", self.name);
    }
}

/// A GPIO chip and the lines it exposes.
///
/// Dropping or closing the chip releases every line that is still requested;
/// [`Line`]s obtained from it fail with [`ErrorKind::Invalid`] afterwards.
#[derive(Debug)]
pub struct Chip {
    inner: Arc<ChipInner>,
}

impl Chip {
    /// Open the GPIO Chip at the provided path (/dev/gpiochip<N>)
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Chip> {
        let cdev = Cdev::open(path)?;
        Chip::from_device(Arc::new(cdev))
    }

    /// Open a chip by its device name, e.g. `gpiochip0`.
    pub fn open_by_name(name: &str) -> Result<Chip> {
        Chip::open(Path::new("/dev").join(name))
    }

    pub fn open_by_number(num: u32) -> Result<Chip> {
        Chip::open(PathBuf::from(format!("/dev/gpiochip{}", num)))
    }

    /// Build a chip on top of any [`GpioDevice`].
    pub fn from_device<D: GpioDevice + 'static>(device: Arc<D>) -> Result<Chip> {
        let info = device.chip_info()?;
        debug!(
            "opened chip {} [{}] with {} lines",
            info.name, info.label, info.num_lines
        );
        Ok(Chip {
            inner: Arc::new(ChipInner {
                device,
                lines: Mutex::new(vec![None; info.num_lines as usize]),
                name: info.name,
                label: info.label,
                num_lines: info.num_lines,
                guard: Mutex::new(()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn num_lines(&self) -> u32 {
        self.inner.num_lines
    }

    /// Get the line at `offset`, with freshly queried metadata.
    ///
    /// Asking twice for the same offset yields the same descriptor.
    pub fn get_line(&self, offset: u32) -> Result<Line> {
        if self.inner.is_closed() {
            return Err(state_err("chip is closed"));
        }
        if offset >= self.inner.num_lines {
            return Err(offset_err(offset));
        }

        let line = {
            let mut lines = self.inner.lines.lock();
            lines[offset as usize]
                .get_or_insert_with(|| Line::new(offset, Arc::downgrade(&self.inner)))
                .clone()
        };
        line.refresh()?;
        Ok(line)
    }

    /// Get a group holding the lines at `offsets`, in that order.
    pub fn get_lines(&self, offsets: &[u32]) -> Result<Lines> {
        let mut lines = Lines::new();
        for &offset in offsets {
            lines.append(&self.get_line(offset)?)?;
        }
        Ok(lines)
    }

    /// Get a group holding every line of the chip.
    ///
    /// Chips with more than [`MAX_LINES`](crate::MAX_LINES) lines can't be
    /// grouped whole and fail with `LimitExceeded`.
    pub fn get_all_lines(&self) -> Result<Lines> {
        let offsets: Vec<u32> = (0..self.inner.num_lines).collect();
        self.get_lines(&offsets)
    }

    /// Find the offset of the first line called `name`.
    ///
    /// Lines whose info can't be read are skipped.
    pub fn find_line(&self, name: &str) -> Result<u32> {
        if self.inner.is_closed() {
            return Err(state_err("chip is closed"));
        }
        for offset in 0..self.inner.num_lines {
            let info = match self.inner.device.line_info(offset) {
                Ok(info) => info,
                Err(e) => {
                    debug!("skipping line {} of {}: {}", offset, self.inner.name, e);
                    continue;
                }
            };
            if info.name.as_deref() == Some(name) {
                return Ok(offset);
            }
        }
        Err(ErrorKind::NotFound(format!("line {:?}", name)).into())
    }

    /// Close the chip; the same as dropping it.
    pub fn close(self) {}
}

impl Drop for Chip {
    fn drop(&mut self) {
        self.inner.close();
    }
}
