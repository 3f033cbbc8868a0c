// Copyright (c) 2018 The rust-gpio-cdev Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use gpio_bulk::{Chip, LineRequestConfig, LineRequestFlags, RequestType};
use quicli::prelude::*;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
struct Cli {
    /// The gpiochip device (e.g. /dev/gpiochip0)
    chip: String,
    /// The offset and value of each GPIO line for the provided chip
    /// in the form "off=<0|1>"
    line_values: Vec<String>,
    /// Treat the values as active-low
    #[structopt(short = "l", long = "active-low")]
    active_low: bool,
    /// Drive the lines as open-drain outputs
    #[structopt(long = "open-drain")]
    open_drain: bool,
}

// Use like:
//   gpioset /dev/gpiochip0 0=1 1=1 2=0 3=1 4=0
//
// to set lines 0, 1, & 3 high
//              2 & 4 low
//
fn do_main(args: Cli) -> anyhow::Result<()> {
    let chip = Chip::open(&args.chip)?;
    let mut offsets = Vec::new();
    let mut values = Vec::new();

    for arg in &args.line_values {
        let mut lv = arg.splitn(2, '=');
        let (off, val) = match (lv.next(), lv.next()) {
            (Some(off), Some(val)) => (off, val),
            _ => anyhow::bail!("expected <offset>=<value>, got {:?}", arg),
        };
        offsets.push(off.parse::<u32>()?);
        values.push(val.parse::<u8>()?);
    }

    let mut flags = LineRequestFlags::empty();
    if args.active_low {
        flags |= LineRequestFlags::ACTIVE_LOW;
    }
    if args.open_drain {
        flags |= LineRequestFlags::OPEN_DRAIN;
    }

    // The default values already put the lines in the desired state.
    let lines = chip.get_lines(&offsets)?;
    lines.request(
        &LineRequestConfig::new("gpioset", RequestType::Output).with_flags(flags),
        Some(&values[..]),
    )?;

    println!("Output lines being driven... Enter to exit");
    let mut buf = String::new();
    ::std::io::stdin().read_line(&mut buf)?;

    lines.release();
    Ok(())
}

fn main() -> CliResult {
    let args = Cli::from_args();
    do_main(args).or_else(|e| {
        error!("{:?}", e);
        Ok(())
    })
}
