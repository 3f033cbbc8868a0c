// Copyright (c) 2018 The rust-gpio-cdev Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use futures::stream::StreamExt;
use gpio_bulk::{AsyncLineEventStream, Chip, LineRequestConfig, RequestType};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
struct Cli {
    /// The gpiochip device (e.g. /dev/gpiochip0)
    chip: String,
    /// The offset of the GPIO line for the provided chip
    line: u32,
}

async fn do_main(args: Cli) -> std::result::Result<(), gpio_bulk::Error> {
    let chip = Chip::open(args.chip)?;
    let line = chip.get_line(args.line)?;
    line.request(
        &LineRequestConfig::new("gpioevents", RequestType::EventBoth),
        0,
    )?;
    let mut events = AsyncLineEventStream::new(&line)?;

    while let Some(event) = events.next().await {
        println!("{:?}", event?);
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Cli::from_args();
    if let Err(e) = do_main(args).await {
        eprintln!("{}", e);
    }
}
