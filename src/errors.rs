// Copyright (c) 2018 The rust-gpio-cdev Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Error type shared by every operation in the crate.

use crate::IoctlKind;
use log::debug;
use nix::errno::Errno;
use std::error::Error as StdError;
use std::fmt;
use std::io::Error as IOError;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
}

#[derive(Debug)]
pub enum ErrorKind {
    /// A chip path or a line name could not be found.
    NotFound(String),
    /// The path exists but is not a GPIO character device.
    NotAGpioChip(PathBuf),
    /// Line offset not below the chip's line count.
    OutOfRange(u32),
    /// A malformed argument, such as a value count that doesn't match the
    /// group or conflicting request flags.
    InvalidArgument(&'static str),
    /// The group already holds this many lines.
    LimitExceeded(usize),
    /// The line belongs to a different chip than the rest of the group.
    CrossChip,
    /// The line at this offset is already requested.
    Busy(u32),
    /// The line at this offset is not requested.
    PermissionDenied(u32),
    /// Use after close, or an operation the line's current request can't serve.
    Invalid(&'static str),
    Ioctl { kind: IoctlKind, cause: nix::Error },
    Event(nix::Error),
    Poll(nix::Error),
    Io(IOError),
    /// A wait was interrupted through its `CancelToken`.
    Cancelled,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// The errno reported by the kernel, if this error came from a device call.
    pub fn errno(&self) -> Option<Errno> {
        match &self.kind {
            ErrorKind::Ioctl { cause, .. } => Some(*cause),
            ErrorKind::Event(err) | ErrorKind::Poll(err) => Some(*err),
            ErrorKind::Io(err) => err.raw_os_error().map(Errno::from_i32),
            _ => None,
        }
    }

    /// True for a line found busy locally and for `EBUSY` from the kernel.
    pub fn is_busy(&self) -> bool {
        matches!(self.kind, ErrorKind::Busy(_)) || self.errno() == Some(Errno::EBUSY)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error { kind }
    }
}

pub(crate) fn ioctl_err(kind: IoctlKind, cause: nix::Error) -> Error {
    Error {
        kind: ErrorKind::Ioctl { kind, cause },
    }
}

pub(crate) fn invalid_err(n_lines: usize, n_values: usize) -> Error {
    debug!("{} values given for {} lines", n_values, n_lines);
    Error {
        kind: ErrorKind::InvalidArgument("number of values does not match number of lines"),
    }
}

pub(crate) fn offset_err(offset: u32) -> Error {
    Error {
        kind: ErrorKind::OutOfRange(offset),
    }
}

pub(crate) fn event_err(err: nix::Error) -> Error {
    Error {
        kind: ErrorKind::Event(err),
    }
}

pub(crate) fn poll_err(err: nix::Error) -> Error {
    Error {
        kind: ErrorKind::Poll(err),
    }
}

pub(crate) fn argument_err(what: &'static str) -> Error {
    Error {
        kind: ErrorKind::InvalidArgument(what),
    }
}

pub(crate) fn state_err(what: &'static str) -> Error {
    Error {
        kind: ErrorKind::Invalid(what),
    }
}

impl fmt::Display for IoctlKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            IoctlKind::ChipInfo => write!(f, "get chip info"),
            IoctlKind::LineInfo => write!(f, "get line info"),
            IoctlKind::LineHandle => write!(f, "get line handle"),
            IoctlKind::LineEvent => write!(f, "get line event"),
            IoctlKind::GetLine => write!(f, "get line value"),
            IoctlKind::SetLine => write!(f, "set line value"),
            IoctlKind::SetConfig => write!(f, "set line config"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.kind {
            ErrorKind::NotFound(what) => write!(f, "{} not found", what),
            ErrorKind::NotAGpioChip(path) => {
                write!(f, "{} is not a GPIO character device", path.display())
            }
            ErrorKind::OutOfRange(offset) => write!(f, "Offset {} is out of range", offset),
            ErrorKind::InvalidArgument(what) => write!(f, "Invalid argument: {}", what),
            ErrorKind::LimitExceeded(max) => {
                write!(f, "Line group is full ({} lines maximum)", max)
            }
            ErrorKind::CrossChip => write!(f, "Line group cannot hold lines from different chips"),
            ErrorKind::Busy(offset) => write!(f, "Line {} is already requested", offset),
            ErrorKind::PermissionDenied(offset) => write!(f, "Line {} is not requested", offset),
            ErrorKind::Invalid(what) => write!(f, "Invalid operation: {}", what),
            ErrorKind::Ioctl { cause, kind } => write!(f, "Ioctl to {} failed: {}", kind, cause),
            ErrorKind::Event(err) => write!(f, "Failed to read event: {}", err),
            ErrorKind::Poll(err) => write!(f, "Failed to wait for events: {}", err),
            ErrorKind::Io(err) => err.fmt(f),
            ErrorKind::Cancelled => write!(f, "Wait cancelled"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match &self.kind {
            ErrorKind::Event(err) | ErrorKind::Poll(err) => Some(err),
            ErrorKind::Io(err) => Some(err),
            ErrorKind::Ioctl { kind: _, cause } => Some(cause),
            _ => None,
        }
    }
}

impl From<IOError> for Error {
    fn from(err: IOError) -> Error {
        Error {
            kind: ErrorKind::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_ebusy_counts_as_busy() {
        let err = ioctl_err(IoctlKind::LineHandle, Errno::EBUSY);
        assert!(err.is_busy());
        assert_eq!(err.errno(), Some(Errno::EBUSY));

        let err = Error::from(ErrorKind::Busy(3));
        assert!(err.is_busy());
        assert_eq!(err.errno(), None);
    }

    #[test]
    fn display_names_the_ioctl() {
        let err = ioctl_err(IoctlKind::SetConfig, Errno::EINVAL);
        assert_eq!(
            err.to_string(),
            format!("Ioctl to set line config failed: {}", Errno::EINVAL)
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn value_count_mismatch_is_an_invalid_argument() {
        let err = invalid_err(3, 1);
        assert!(matches!(err.kind(), ErrorKind::InvalidArgument(_)));
        assert_eq!(
            err.to_string(),
            "Invalid argument: number of values does not match number of lines"
        );
    }

    #[test]
    fn io_errors_expose_errno() {
        let err = Error::from(IOError::from_raw_os_error(libc::EIO));
        assert_eq!(err.errno(), Some(Errno::EIO));
        assert!(!offset_err(9).is_busy());
    }
}
