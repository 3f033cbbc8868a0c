// Copyright (c) 2018 The rust-gpio-cdev Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! List the lines of one or more chips, in the manner of lsgpio.

use gpio_bulk::{Bias, Chip, Drive, LineDirection};
use quicli::prelude::*;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
struct Cli {
    /// The gpiochip devices (e.g. /dev/gpiochip0)
    chips: Vec<String>,
}

fn print_chip(path: &str) -> anyhow::Result<()> {
    let chip = Chip::open(path)?;
    println!(
        "GPIO chip: {}, \"{}\", \"{}\", {} GPIO Lines",
        path,
        chip.name(),
        chip.label(),
        chip.num_lines()
    );

    for offset in 0..chip.num_lines() {
        let info = match chip.get_line(offset).and_then(|line| line.info()) {
            Ok(info) => info,
            Err(e) => {
                println!("\tError getting line {}: {}", offset, e);
                continue;
            }
        };

        let mut flags = vec![];
        if info.is_used() {
            flags.push("used");
        }
        if info.direction() == LineDirection::Out {
            flags.push("output");
        }
        if info.is_active_low() {
            flags.push("active-low");
        }
        match info.drive() {
            Drive::OpenDrain => flags.push("open-drain"),
            Drive::OpenSource => flags.push("open-source"),
            Drive::PushPull => {}
        }
        match info.bias() {
            Bias::PullUp => flags.push("pull-up"),
            Bias::PullDown => flags.push("pull-down"),
            Bias::Disabled => flags.push("bias-disabled"),
            Bias::Unknown => {}
        }

        let usage = if flags.is_empty() {
            "".to_owned()
        } else {
            format!("[{}]", flags.join(" "))
        };

        println!(
            "\tline {lineno:>3}: {name} {consumer} {usage}",
            lineno = info.offset(),
            name = info.name().unwrap_or("unnamed"),
            consumer = info.consumer().unwrap_or("unused"),
            usage = usage,
        );
    }
    Ok(())
}

fn do_main(args: Cli) -> anyhow::Result<()> {
    let chips = if args.chips.is_empty() {
        vec!["/dev/gpiochip0".to_owned()]
    } else {
        args.chips
    };
    for path in &chips {
        print_chip(path)?;
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
