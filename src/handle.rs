// Copyright (c) 2018 The rust-gpio-cdev Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Kernel request handles shared between the lines that were requested together.
//!
//! A handle lives in an `Arc`: every line of a values request holds a clone,
//! an events request has exactly one owner. Waits and reads take a temporary
//! clone so the descriptor stays open while they block. The kernel resource
//! is closed when the last clone goes away.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::device::{GpioDevice, HandleFlags};
use crate::errors::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandleKind {
    Values,
    Events,
}

#[derive(Debug)]
struct HandleConfig {
    flags: HandleFlags,
    /// Last logical values driven on each line, in request order.
    values: Vec<u8>,
}

pub(crate) struct RequestHandle {
    kind: HandleKind,
    offsets: Vec<u32>,
    config: Mutex<HandleConfig>,
    device: Arc<dyn GpioDevice>,
    file: File,
}

impl RequestHandle {
    pub(crate) fn new(
        kind: HandleKind,
        file: File,
        offsets: Vec<u32>,
        flags: HandleFlags,
        values: Vec<u8>,
        device: Arc<dyn GpioDevice>,
    ) -> Arc<RequestHandle> {
        debug!(
            "opened {:?} handle fd {} for lines {:?}",
            kind,
            file.as_raw_fd(),
            offsets
        );
        Arc::new(RequestHandle {
            kind,
            offsets,
            config: Mutex::new(HandleConfig { flags, values }),
            device,
            file,
        })
    }

    pub(crate) fn kind(&self) -> HandleKind {
        self.kind
    }

    /// Offsets covered by this handle, in the order they were requested.
    pub(crate) fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    pub(crate) fn index_of(&self, offset: u32) -> Option<usize> {
        self.offsets.iter().position(|&o| o == offset)
    }

    pub(crate) fn flags(&self) -> HandleFlags {
        self.config.lock().flags
    }

    pub(crate) fn output_values(&self) -> Vec<u8> {
        self.config.lock().values.clone()
    }

    /// Read the current value of every line of the handle.
    pub(crate) fn get_values(&self) -> Result<Vec<u8>> {
        let mut values = vec![0; self.offsets.len()];
        self.device.get_values(&self.file, &mut values)?;
        Ok(values)
    }

    /// Drive every line of the handle; `values` is in request order.
    pub(crate) fn set_values(&self, values: &[u8]) -> Result<()> {
        let mut config = self.config.lock();
        self.device.set_values(&self.file, values)?;
        config.values = values.to_vec();
        Ok(())
    }

    pub(crate) fn set_config(&self, flags: HandleFlags, values: &[u8]) -> Result<()> {
        let mut config = self.config.lock();
        self.device.set_config(&self.file, flags, values)?;
        config.flags = flags;
        if flags.contains(HandleFlags::OUTPUT) {
            config.values = values.to_vec();
        }
        Ok(())
    }

    /// One raw read on the descriptor; records are decoded by the caller.
    pub(crate) fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.file).read(buf)
    }
}

impl AsRawFd for RequestHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl AsFd for RequestHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RequestHandle")
            .field("kind", &self.kind)
            .field("fd", &self.file.as_raw_fd())
            .field("offsets", &self.offsets)
            .finish()
    }
}

impl Drop for RequestHandle {
    fn drop(&mut self) {
        debug!(
            "closing {:?} handle fd {} for lines {:?}",
            self.kind,
            self.file.as_raw_fd(),
            self.offsets
        );
        self.device.release(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HandleRequest;
    use crate::sim::SimChip;

    fn values_handle(sim: &Arc<SimChip>, offsets: &[u32]) -> Arc<RequestHandle> {
        let device: Arc<dyn GpioDevice> = sim.clone();
        let file = device
            .request_lines(&HandleRequest {
                offsets,
                flags: HandleFlags::OUTPUT,
                default_values: &[1, 0],
                consumer: "handle-test",
            })
            .unwrap();
        RequestHandle::new(
            HandleKind::Values,
            file,
            offsets.to_vec(),
            HandleFlags::OUTPUT,
            vec![1, 0],
            device,
        )
    }

    #[test]
    fn closes_once_when_last_owner_drops() {
        let sim = SimChip::new("sim0", 4);
        let handle = values_handle(&sim, &[0, 2]);
        let other = handle.clone();
        assert_eq!(sim.open_handles(), 1);

        drop(handle);
        assert_eq!(sim.open_handles(), 1);
        assert_eq!(sim.released_handles(), 0);

        drop(other);
        assert_eq!(sim.open_handles(), 0);
        assert_eq!(sim.released_handles(), 1);
    }

    #[test]
    fn remembers_driven_values() {
        let sim = SimChip::new("sim0", 4);
        let handle = values_handle(&sim, &[0, 2]);
        assert_eq!(handle.output_values(), vec![1, 0]);
        assert_eq!(handle.index_of(2), Some(1));
        assert_eq!(handle.index_of(1), None);

        handle.set_values(&[0, 1]).unwrap();
        assert_eq!(handle.output_values(), vec![0, 1]);
        assert_eq!(handle.get_values().unwrap(), vec![0, 1]);
        assert_eq!(sim.level(2), 1);
    }
}
