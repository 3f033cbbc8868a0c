// Copyright (c) 2018 The rust-gpio-cdev Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Kernel uAPI v1 structures for `/dev/gpiochipN` and the ioctls that use them.

#![allow(non_camel_case_types)]

use std::mem;

use nix::{ioctl_read, ioctl_readwrite};

pub const GPIOHANDLES_MAX: usize = 64;
pub const GPIO_MAX_NAME_SIZE: usize = 32;

#[repr(C)]
pub struct gpiochip_info {
    pub name: [libc::c_char; GPIO_MAX_NAME_SIZE],
    pub label: [libc::c_char; GPIO_MAX_NAME_SIZE],
    pub lines: u32,
}

#[repr(C)]
pub struct gpioline_info {
    pub line_offset: u32,
    pub flags: u32,
    pub name: [libc::c_char; GPIO_MAX_NAME_SIZE],
    pub consumer: [libc::c_char; GPIO_MAX_NAME_SIZE],
}

#[repr(C)]
pub struct gpiohandle_request {
    pub lineoffsets: [u32; GPIOHANDLES_MAX],
    pub flags: u32,
    pub default_values: [u8; GPIOHANDLES_MAX],
    pub consumer_label: [libc::c_char; GPIO_MAX_NAME_SIZE],
    pub lines: u32,
    pub fd: libc::c_int,
}

#[repr(C)]
pub struct gpiohandle_config {
    pub flags: u32,
    pub default_values: [u8; GPIOHANDLES_MAX],
    pub padding: [u32; 4],
}

#[repr(C)]
pub struct gpiohandle_data {
    pub values: [u8; GPIOHANDLES_MAX],
}

#[repr(C)]
pub struct gpioevent_request {
    pub lineoffset: u32,
    pub handleflags: u32,
    pub eventflags: u32,
    pub consumer_label: [libc::c_char; GPIO_MAX_NAME_SIZE],
    pub fd: libc::c_int,
}

#[repr(C)]
pub struct gpioevent_data {
    pub timestamp: u64,
    pub id: u32,
}

/// Size of one record read from an event descriptor, padding included.
pub const GPIOEVENT_DATA_SIZE: usize = mem::size_of::<gpioevent_data>();

pub const GPIOEVENT_EVENT_RISING_EDGE: u32 = 0x01;
pub const GPIOEVENT_EVENT_FALLING_EDGE: u32 = 0x02;

ioctl_read!(gpio_get_chipinfo_ioctl, 0xB4, 0x01, gpiochip_info);
ioctl_readwrite!(gpio_get_lineinfo_ioctl, 0xB4, 0x02, gpioline_info);
ioctl_readwrite!(gpio_get_linehandle_ioctl, 0xB4, 0x03, gpiohandle_request);
ioctl_readwrite!(gpio_get_lineevent_ioctl, 0xB4, 0x04, gpioevent_request);

ioctl_readwrite!(gpiohandle_get_line_values_ioctl, 0xB4, 0x08, gpiohandle_data);
ioctl_readwrite!(gpiohandle_set_line_values_ioctl, 0xB4, 0x09, gpiohandle_data);
ioctl_readwrite!(gpiohandle_set_config_ioctl, 0xB4, 0x0A, gpiohandle_config);

/// Decode a NUL-padded kernel string, `None` if it is empty.
pub fn cstr_field(raw: &[libc::c_char; GPIO_MAX_NAME_SIZE]) -> Option<String> {
    // The kernel always terminates these, but don't trust a full buffer.
    let bytes: Vec<u8> = raw
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    if bytes.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Copy `label` into a kernel label buffer, truncating to leave room for NUL.
pub fn fill_label(dst: &mut [libc::c_char; GPIO_MAX_NAME_SIZE], label: &str) {
    for (d, s) in dst
        .iter_mut()
        .zip(label.bytes().take(GPIO_MAX_NAME_SIZE - 1))
    {
        *d = s as libc::c_char;
    }
}
