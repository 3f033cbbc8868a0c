// Copyright (c) 2018 The rust-gpio-cdev Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use gpio_bulk::*;
use quicli::prelude::*;
use std::time::Duration;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
struct Cli {
    /// The gpiochip device (e.g. /dev/gpiochip0)
    chip: String,
    /// The offset of the GPIO lines for the provided chip
    lines: Vec<u32>,
    /// Only report rising edges
    #[structopt(long = "rising-edge")]
    rising_edge: bool,
    /// Only report falling edges
    #[structopt(long = "falling-edge")]
    falling_edge: bool,
    /// Exit after this many events
    #[structopt(short = "n", long = "num-events")]
    num_events: Option<usize>,
    /// Give up after waiting this many milliseconds for an event
    #[structopt(short = "t", long = "timeout-ms")]
    timeout_ms: Option<u64>,
}

fn do_main(args: Cli) -> anyhow::Result<()> {
    let chip = Chip::open(&args.chip)?;
    let request_type = if args.rising_edge {
        RequestType::EventRising
    } else if args.falling_edge {
        RequestType::EventFalling
    } else {
        RequestType::EventBoth
    };

    let lines = chip.get_lines(&args.lines)?;
    lines.request(&LineRequestConfig::new("gpiomon", request_type), None)?;

    let timeout = args.timeout_ms.map(Duration::from_millis);
    let mut seen = 0;
    loop {
        let ready = lines.event_wait(timeout)?;
        if ready.is_empty() {
            println!("Timeout");
            break;
        }
        for line in &ready {
            for event in line.event_read_multiple(MAX_EVENTS)? {
                let edge = match event.event_type() {
                    EventType::RisingEdge => "RISING EDGE",
                    EventType::FallingEdge => "FALLING EDGE",
                };
                println!(
                    "event: {} offset: {} timestamp: [{}.{:09}]",
                    edge,
                    line.offset(),
                    event.seconds(),
                    event.nanoseconds()
                );
                seen += 1;
                if args.num_events.map_or(false, |n| seen >= n) {
                    return Ok(());
                }
            }
        }
    }
    Ok(())
}

fn main() -> CliResult {
    let args = Cli::from_args();
    do_main(args).or_else(|e| {
        error!("{:?}", e);
        Ok(())
    })
}
