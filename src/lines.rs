// Copyright (c) 2018 The rust-gpio-cdev Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Groups of lines operated on together.
//!
//! A group is checked as it is built: every member must come from the same,
//! still open chip and the group can never grow past [`MAX_LINES`]. Requests
//! are all-or-nothing. A values request is a single kernel call producing one
//! handle shared by every member. An events request is one kernel call per
//! member, and the handles obtained so far are closed again if any of those
//! calls fails.

use std::ops::Index;
use std::slice;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use crate::chip::ChipInner;
use crate::device::{EventRequest, HandleFlags, HandleRequest};
use crate::errors::{argument_err, invalid_err, state_err, Error, ErrorKind, Result};
use crate::event::EventWaiter;
use crate::handle::{HandleKind, RequestHandle};
use crate::line::{Line, Slot};
use crate::{LineRequestConfig, LineRequestFlags, RequestType, MAX_LINES};

fn normalize(value: u8) -> u8 {
    (value != 0) as u8
}

/// An ordered group of lines from a single chip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lines {
    lines: Vec<Line>,
}

impl Lines {
    pub fn new() -> Lines {
        Lines { lines: Vec::new() }
    }

    pub(crate) fn single(line: Line) -> Lines {
        Lines { lines: vec![line] }
    }

    /// Wrap lines already known to satisfy the group's invariants.
    pub(crate) fn from_vec(lines: Vec<Line>) -> Lines {
        Lines { lines }
    }

    /// Build a group from `lines`, applying the same checks as [`append`](Lines::append).
    pub fn from_lines<'a, I: IntoIterator<Item = &'a Line>>(lines: I) -> Result<Lines> {
        let mut group = Lines::new();
        for line in lines {
            group.append(line)?;
        }
        Ok(group)
    }

    /// Add `line` to the end of the group.
    ///
    /// Fails with `InvalidArgument` if the line's chip is closed, with
    /// `LimitExceeded` if the group is full and with `CrossChip` if the line
    /// comes from another chip than the lines already in the group. A failed
    /// append leaves the group untouched.
    pub fn append(&mut self, line: &Line) -> Result<()> {
        if !line.is_valid() {
            return Err(argument_err("line belongs to a closed chip"));
        }
        if self.lines.len() >= MAX_LINES {
            return Err(ErrorKind::LimitExceeded(MAX_LINES).into());
        }
        if let Some(first) = self.lines.first() {
            if !first.same_chip(line) {
                return Err(ErrorKind::CrossChip.into());
            }
        }
        self.lines.push(line.clone());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Line> {
        self.lines.get(index)
    }

    pub fn iter(&self) -> slice::Iter<'_, Line> {
        self.lines.iter()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn offsets(&self) -> Vec<u32> {
        self.lines.iter().map(Line::offset).collect()
    }

    /// True if every member is requested.
    pub fn is_requested(&self) -> bool {
        self.lines.iter().all(Line::is_requested)
    }

    /// True if every member is free.
    pub fn is_free(&self) -> bool {
        self.lines.iter().all(Line::is_free)
    }

    /// The open chip shared by all members.
    fn chip(&self) -> Result<Arc<ChipInner>> {
        let first = self
            .lines
            .first()
            .ok_or_else(|| argument_err("line group is empty"))?;
        let chip = first.chip()?;
        if self.lines.iter().any(|line| !line.same_chip(first)) {
            return Err(ErrorKind::CrossChip.into());
        }
        Ok(chip)
    }

    /// Request every line of the group.
    ///
    /// `default_values`, if given, needs one entry per line and sets the
    /// initial level of outputs. Either every line ends up requested or, on
    /// error, none of them changed state.
    pub fn request(&self, config: &LineRequestConfig, default_values: Option<&[u8]>) -> Result<()> {
        let chip = self.chip()?;
        config.flags.validate()?;
        if let Some(values) = default_values {
            if values.len() != self.lines.len() {
                return Err(invalid_err(self.lines.len(), values.len()));
            }
        }

        let _guard = chip.guard.lock();
        if chip.is_closed() {
            return Err(state_err("chip is closed"));
        }
        for (i, line) in self.lines.iter().enumerate() {
            if !line.is_free() || self.lines[..i].contains(line) {
                return Err(ErrorKind::Busy(line.offset()).into());
            }
        }

        if config.request_type.is_event() {
            self.request_events(&chip, config)?;
        } else {
            self.request_values(&chip, config, default_values)?;
        }

        for line in &self.lines {
            line.maybe_update();
        }
        Ok(())
    }

    fn request_values(
        &self,
        chip: &ChipInner,
        config: &LineRequestConfig,
        default_values: Option<&[u8]>,
    ) -> Result<()> {
        let offsets = self.offsets();
        let flags = config.flags.handle_flags(config.request_type);
        let values: Vec<u8> = match (config.request_type, default_values) {
            (RequestType::Output, Some(values)) => values.iter().map(|&v| normalize(v)).collect(),
            _ => vec![0; offsets.len()],
        };

        let file = chip.device.request_lines(&HandleRequest {
            offsets: &offsets,
            flags,
            default_values: &values,
            consumer: &config.consumer,
        })?;
        let handle = RequestHandle::new(
            HandleKind::Values,
            file,
            offsets,
            flags,
            values,
            chip.device.clone(),
        );
        for line in &self.lines {
            line.attach(handle.clone());
        }
        debug!(
            "requested lines {:?} for values as {:?}",
            handle.offsets(),
            config.consumer
        );
        Ok(())
    }

    fn request_events(&self, chip: &ChipInner, config: &LineRequestConfig) -> Result<()> {
        let handle_flags = config.flags.handle_flags(config.request_type);
        let event_flags = config.request_type.event_flags();

        // Nothing is attached until every line has its handle; on failure the
        // handles collected so far close as `acquired` drops.
        let mut acquired = Vec::with_capacity(self.lines.len());
        for line in &self.lines {
            let req = EventRequest {
                offset: line.offset(),
                handle_flags,
                event_flags,
                consumer: &config.consumer,
            };
            match chip.device.request_event(&req) {
                Ok(file) => acquired.push(RequestHandle::new(
                    HandleKind::Events,
                    file,
                    vec![line.offset()],
                    handle_flags,
                    Vec::new(),
                    chip.device.clone(),
                )),
                Err(e) => {
                    if !acquired.is_empty() {
                        warn!(
                            "event request for line {} failed, releasing {} lines: {}",
                            line.offset(),
                            acquired.len(),
                            e
                        );
                    }
                    return Err(e);
                }
            }
        }

        for (line, handle) in self.lines.iter().zip(acquired) {
            line.attach(handle);
        }
        debug!(
            "requested lines {:?} for {:?} as {:?}",
            self.offsets(),
            event_flags,
            config.consumer
        );
        Ok(())
    }

    /// Release every line of the group.
    ///
    /// Lines that are already free are skipped, so releasing twice is
    /// harmless. A values handle closes once its last line is released.
    pub fn release(&self) {
        let chip = self.lines.first().and_then(|line| line.chip().ok());
        let _guard = chip.as_ref().map(|chip| chip.guard.lock());

        let released: Vec<Slot> = self
            .lines
            .iter()
            .map(Line::detach)
            .filter(|slot| !matches!(slot, Slot::Free))
            .collect();
        let count = released.len();
        // Handles close here, once no line refers to them.
        drop(released);

        if count > 0 {
            debug!("released {} of lines {:?}", count, self.offsets());
            if chip.is_some() {
                for line in &self.lines {
                    line.maybe_update();
                }
            }
        }
    }

    /// Handle of each member, failing if any member is free.
    fn handles(&self) -> Result<Vec<Arc<RequestHandle>>> {
        self.chip()?;
        self.lines
            .iter()
            .map(|line| {
                line.handle()
                    .map(|(_, handle)| handle)
                    .ok_or_else(|| Error::from(ErrorKind::PermissionDenied(line.offset())))
            })
            .collect()
    }

    /// The single values handle that this group covers completely.
    fn values_handle(&self) -> Result<Arc<RequestHandle>> {
        let handles = self.handles()?;
        let handle = handles[0].clone();
        if handles.iter().any(|h| h.kind() != HandleKind::Values) {
            return Err(state_err("line is requested for events"));
        }
        if handles.iter().any(|h| !Arc::ptr_eq(h, &handle)) {
            return Err(state_err("lines belong to different requests"));
        }
        let offsets = self.offsets();
        if handle.offsets().iter().any(|o| !offsets.contains(o)) {
            return Err(state_err("group does not cover the whole request"));
        }
        Ok(handle)
    }

    /// Lay `values`, given in group order, out in the handle's request order.
    fn to_handle_order(&self, handle: &RequestHandle, values: &[u8]) -> Result<Vec<u8>> {
        let mut ordered = vec![0; handle.offsets().len()];
        for (line, &value) in self.lines.iter().zip(values) {
            let idx = handle
                .index_of(line.offset())
                .ok_or_else(|| state_err("line is not part of the request"))?;
            ordered[idx] = normalize(value);
        }
        Ok(ordered)
    }

    /// Read the value of every line, in group order.
    ///
    /// Lines requested for events report their level too. One kernel call is
    /// made per distinct handle, which for a group requested together is one.
    pub fn get_values(&self) -> Result<Vec<u8>> {
        let handles = self.handles()?;
        let mut fetched: Vec<(Arc<RequestHandle>, Vec<u8>)> = Vec::new();
        let mut values = Vec::with_capacity(self.lines.len());

        for (line, handle) in self.lines.iter().zip(handles) {
            let pos = match fetched.iter().position(|(h, _)| Arc::ptr_eq(h, &handle)) {
                Some(pos) => pos,
                None => {
                    let current = handle.get_values()?;
                    fetched.push((handle.clone(), current));
                    fetched.len() - 1
                }
            };
            let (handle, current) = &fetched[pos];
            let idx = handle
                .index_of(line.offset())
                .ok_or_else(|| state_err("line is not part of the request"))?;
            values.push(current[idx]);
        }
        Ok(values)
    }

    /// Drive every line of the group; `values` is in group order.
    pub fn set_values(&self, values: &[u8]) -> Result<()> {
        if values.len() != self.lines.len() {
            return Err(invalid_err(self.lines.len(), values.len()));
        }
        let handle = self.values_handle()?;
        let ordered = self.to_handle_order(&handle, values)?;
        handle.set_values(&ordered)
    }

    /// Change direction and flags of a group requested for values.
    ///
    /// `request_type` must be `AsIs`, `Input` or `Output`; `values` sets the
    /// output levels and defaults to the last values driven.
    pub fn set_config(
        &self,
        request_type: RequestType,
        flags: LineRequestFlags,
        values: Option<&[u8]>,
    ) -> Result<()> {
        if request_type.is_event() {
            return Err(argument_err("lines can't be reconfigured for events"));
        }
        flags.validate()?;
        if let Some(values) = values {
            if values.len() != self.lines.len() {
                return Err(invalid_err(self.lines.len(), values.len()));
            }
        }

        let chip = self.chip()?;
        let _guard = chip.guard.lock();
        let handle = self.values_handle()?;

        let mut handle_flags = flags.handle_flags(request_type);
        if request_type == RequestType::AsIs {
            handle_flags |= handle.flags() & (HandleFlags::INPUT | HandleFlags::OUTPUT);
        }
        let ordered = match values {
            Some(values) if handle_flags.contains(HandleFlags::OUTPUT) => {
                self.to_handle_order(&handle, values)?
            }
            _ => handle.output_values(),
        };

        handle.set_config(handle_flags, &ordered)?;
        debug!(
            "reconfigured lines {:?} with {:?}",
            handle.offsets(),
            handle_flags
        );

        for line in &self.lines {
            line.maybe_update();
        }
        Ok(())
    }

    /// Change flags, keeping direction and output levels.
    pub fn set_flags(&self, flags: LineRequestFlags) -> Result<()> {
        let handle = self.values_handle()?;
        let request_type = direction_of(handle.flags());
        self.set_config(request_type, flags, None)
    }

    pub fn set_direction_input(&self) -> Result<()> {
        let handle = self.values_handle()?;
        let flags = LineRequestFlags::from_handle_flags(handle.flags())
            - (LineRequestFlags::OPEN_DRAIN | LineRequestFlags::OPEN_SOURCE);
        self.set_config(RequestType::Input, flags, None)
    }

    pub fn set_direction_output(&self, values: &[u8]) -> Result<()> {
        if values.len() != self.lines.len() {
            return Err(invalid_err(self.lines.len(), values.len()));
        }
        let handle = self.values_handle()?;
        let flags = LineRequestFlags::from_handle_flags(handle.flags());
        self.set_config(RequestType::Output, flags, Some(values))
    }

    /// Wait for edge events on any member; see [`EventWaiter::wait`].
    pub fn event_wait(&self, timeout: Option<Duration>) -> Result<Lines> {
        EventWaiter::new(self).wait(timeout)
    }
}

fn direction_of(flags: HandleFlags) -> RequestType {
    if flags.contains(HandleFlags::OUTPUT) {
        RequestType::Output
    } else if flags.contains(HandleFlags::INPUT) {
        RequestType::Input
    } else {
        RequestType::AsIs
    }
}

impl Index<usize> for Lines {
    type Output = Line;

    fn index(&self, index: usize) -> &Line {
        &self.lines[index]
    }
}

impl<'a> IntoIterator for &'a Lines {
    type Item = &'a Line;
    type IntoIter = slice::Iter<'a, Line>;

    fn into_iter(self) -> Self::IntoIter {
        self.lines.iter()
    }
}
