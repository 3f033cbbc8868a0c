// Copyright (c) 2018 The rust-gpio-cdev Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The kernel boundary.
//!
//! Everything the crate asks of a GPIO chip goes through [`GpioDevice`]. The
//! production implementation is [`Cdev`], which issues the uAPI v1 ioctls
//! against an open `/dev/gpiochipN`. Handles returned by the request calls
//! are plain files; event handles must be pollable and yield
//! [`GPIOEVENT_DATA_SIZE`](crate::ffi::GPIOEVENT_DATA_SIZE)-byte records.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::path::{Path, PathBuf};

use bitflags::bitflags;
use nix::errno::Errno;

use crate::errors::{ioctl_err, ErrorKind, Result};
use crate::ffi;
use crate::IoctlKind;

bitflags! {
    /// Line information flags, as reported by the kernel.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LineInfoFlags: u32 {
        const KERNEL = (1 << 0);
        const IS_OUT = (1 << 1);
        const ACTIVE_LOW = (1 << 2);
        const OPEN_DRAIN = (1 << 3);
        const OPEN_SOURCE = (1 << 4);
        const BIAS_PULL_UP = (1 << 5);
        const BIAS_PULL_DOWN = (1 << 6);
        const BIAS_DISABLE = (1 << 7);
    }
}

bitflags! {
    /// Flags passed to the kernel with a line handle or line event request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HandleFlags: u32 {
        const INPUT = (1 << 0);
        const OUTPUT = (1 << 1);
        const ACTIVE_LOW = (1 << 2);
        const OPEN_DRAIN = (1 << 3);
        const OPEN_SOURCE = (1 << 4);
        const BIAS_PULL_UP = (1 << 5);
        const BIAS_PULL_DOWN = (1 << 6);
        const BIAS_DISABLE = (1 << 7);
    }
}

bitflags! {
    /// Edges a line event request subscribes to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EventFlags: u32 {
        const RISING_EDGE = (1 << 0);
        const FALLING_EDGE = (1 << 1);
        const BOTH_EDGES = Self::RISING_EDGE.bits() | Self::FALLING_EDGE.bits();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipInfo {
    pub name: String,
    pub label: String,
    pub num_lines: u32,
}

/// Raw line metadata as reported by the device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawLineInfo {
    pub offset: u32,
    pub flags: LineInfoFlags,
    pub name: Option<String>,
    pub consumer: Option<String>,
}

/// A joint request for value access to several lines.
#[derive(Debug)]
pub struct HandleRequest<'a> {
    pub offsets: &'a [u32],
    pub flags: HandleFlags,
    /// One entry per offset; only meaningful with `HandleFlags::OUTPUT`.
    pub default_values: &'a [u8],
    pub consumer: &'a str,
}

/// A request for edge events on a single line.
#[derive(Debug)]
pub struct EventRequest<'a> {
    pub offset: u32,
    pub handle_flags: HandleFlags,
    pub event_flags: EventFlags,
    pub consumer: &'a str,
}

/// Operations a GPIO chip has to provide.
///
/// Value calls receive the handle file returned by the request call that
/// created it and operate on every line of that handle, in request order.
pub trait GpioDevice: fmt::Debug + Send + Sync {
    fn chip_info(&self) -> Result<ChipInfo>;

    fn line_info(&self, offset: u32) -> Result<RawLineInfo>;

    fn request_lines(&self, req: &HandleRequest<'_>) -> Result<File>;

    fn request_event(&self, req: &EventRequest<'_>) -> Result<File>;

    fn get_values(&self, handle: &File, values: &mut [u8]) -> Result<()>;

    fn set_values(&self, handle: &File, values: &[u8]) -> Result<()>;

    fn set_config(&self, handle: &File, flags: HandleFlags, values: &[u8]) -> Result<()>;

    /// Called exactly once per handle, right before its file is closed.
    fn release(&self, _handle: &File) {}
}

/// A GPIO chip character device.
#[derive(Debug)]
pub struct Cdev {
    file: File,
    path: PathBuf,
}

impl Cdev {
    /// Open the character device at `path`.
    ///
    /// Fails with `NotFound` when nothing exists at `path` and with
    /// `NotAGpioChip` when the node is not a character device or does not
    /// answer the chip info ioctl.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Cdev> {
        let path = path.as_ref();
        let meta = match std::fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ErrorKind::NotFound(path.display().to_string()).into())
            }
            Err(e) => return Err(e.into()),
        };
        if !meta.file_type().is_char_device() {
            return Err(ErrorKind::NotAGpioChip(path.to_path_buf()).into());
        }

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let cdev = Cdev {
            file,
            path: path.to_path_buf(),
        };

        // Any character device can be opened; only a gpiochip answers this.
        match cdev.chip_info() {
            Ok(_) => Ok(cdev),
            Err(e) if matches!(e.errno(), Some(Errno::ENOTTY) | Some(Errno::EINVAL)) => {
                Err(ErrorKind::NotAGpioChip(path.to_path_buf()).into())
            }
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl GpioDevice for Cdev {
    fn chip_info(&self) -> Result<ChipInfo> {
        let mut info: ffi::gpiochip_info = unsafe { std::mem::zeroed() };
        unsafe { ffi::gpio_get_chipinfo_ioctl(self.file.as_raw_fd(), &mut info) }
            .map_err(|e| ioctl_err(IoctlKind::ChipInfo, e))?;

        Ok(ChipInfo {
            name: ffi::cstr_field(&info.name).unwrap_or_default(),
            label: ffi::cstr_field(&info.label).unwrap_or_default(),
            num_lines: info.lines,
        })
    }

    fn line_info(&self, offset: u32) -> Result<RawLineInfo> {
        let mut info: ffi::gpioline_info = unsafe { std::mem::zeroed() };
        info.line_offset = offset;
        unsafe { ffi::gpio_get_lineinfo_ioctl(self.file.as_raw_fd(), &mut info) }
            .map_err(|e| ioctl_err(IoctlKind::LineInfo, e))?;

        Ok(RawLineInfo {
            offset,
            flags: LineInfoFlags::from_bits_truncate(info.flags),
            name: ffi::cstr_field(&info.name),
            consumer: ffi::cstr_field(&info.consumer),
        })
    }

    fn request_lines(&self, req: &HandleRequest<'_>) -> Result<File> {
        let mut request: ffi::gpiohandle_request = unsafe { std::mem::zeroed() };
        let n = req.offsets.len();
        if n == 0 || n > ffi::GPIOHANDLES_MAX {
            return Err(ioctl_err(IoctlKind::LineHandle, Errno::EINVAL));
        }
        request.lineoffsets[..n].copy_from_slice(req.offsets);
        for (dst, &v) in request.default_values.iter_mut().zip(req.default_values) {
            *dst = v;
        }
        request.flags = req.flags.bits();
        request.lines = n as u32;
        ffi::fill_label(&mut request.consumer_label, req.consumer);

        unsafe { ffi::gpio_get_linehandle_ioctl(self.file.as_raw_fd(), &mut request) }
            .map_err(|e| ioctl_err(IoctlKind::LineHandle, e))?;

        Ok(unsafe { File::from_raw_fd(request.fd) })
    }

    fn request_event(&self, req: &EventRequest<'_>) -> Result<File> {
        let mut request: ffi::gpioevent_request = unsafe { std::mem::zeroed() };
        request.lineoffset = req.offset;
        request.handleflags = req.handle_flags.bits();
        request.eventflags = req.event_flags.bits();
        ffi::fill_label(&mut request.consumer_label, req.consumer);

        unsafe { ffi::gpio_get_lineevent_ioctl(self.file.as_raw_fd(), &mut request) }
            .map_err(|e| ioctl_err(IoctlKind::LineEvent, e))?;

        Ok(unsafe { File::from_raw_fd(request.fd) })
    }

    fn get_values(&self, handle: &File, values: &mut [u8]) -> Result<()> {
        let mut data: ffi::gpiohandle_data = unsafe { std::mem::zeroed() };
        unsafe { ffi::gpiohandle_get_line_values_ioctl(handle.as_raw_fd(), &mut data) }
            .map_err(|e| ioctl_err(IoctlKind::GetLine, e))?;

        let n = values.len().min(ffi::GPIOHANDLES_MAX);
        values[..n].copy_from_slice(&data.values[..n]);
        Ok(())
    }

    fn set_values(&self, handle: &File, values: &[u8]) -> Result<()> {
        let mut data: ffi::gpiohandle_data = unsafe { std::mem::zeroed() };
        for (dst, &v) in data.values.iter_mut().zip(values) {
            *dst = v;
        }
        unsafe { ffi::gpiohandle_set_line_values_ioctl(handle.as_raw_fd(), &mut data) }
            .map_err(|e| ioctl_err(IoctlKind::SetLine, e))?;
        Ok(())
    }

    fn set_config(&self, handle: &File, flags: HandleFlags, values: &[u8]) -> Result<()> {
        let mut config: ffi::gpiohandle_config = unsafe { std::mem::zeroed() };
        config.flags = flags.bits();
        for (dst, &v) in config.default_values.iter_mut().zip(values) {
            *dst = v;
        }
        unsafe { ffi::gpiohandle_set_config_ioctl(handle.as_raw_fd(), &mut config) }
            .map_err(|e| ioctl_err(IoctlKind::SetConfig, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_path_is_not_found() {
        let err = Cdev::open("/dev/this-gpiochip-does-not-exist").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NotFound(_)));
    }

    #[test]
    fn regular_file_is_not_a_chip() {
        let err = Cdev::open("/proc/self/status").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NotAGpioChip(_)));
    }

    #[test]
    fn non_gpio_char_device_is_not_a_chip() {
        let err = Cdev::open("/dev/null").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NotAGpioChip(_)));
    }
}
