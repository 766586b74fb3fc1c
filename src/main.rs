// Copyright 2026 subtrie-broker contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use std::env;
use std::process::ExitCode;

use subtrie_broker::reactor::Reactor;

fn main() -> ExitCode {
    env_logger::init();

    let port = match parse_port(env::args().skip(1)) {
        Ok(port) => port,
        Err(msg) => {
            eprintln!("{}", msg);
            return ExitCode::FAILURE;
        }
    };

    let mut reactor = match Reactor::bind(port) {
        Ok(reactor) => reactor,
        Err(e) => {
            log::error!("failed to bind port {}: {}", port, e);
            return ExitCode::FAILURE;
        }
    };

    match reactor.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("reactor exited with error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn parse_port(mut args: impl Iterator<Item = String>) -> Result<u16, String> {
    let arg = args.next().ok_or("usage: broker <port>")?;
    arg.parse().map_err(|_| format!("invalid port: {}", arg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_valid_port() {
        assert_eq!(Ok(9000), parse_port(vec!["9000".to_string()].into_iter()));
    }

    #[test]
    fn rejects_missing_argument() {
        assert!(parse_port(std::iter::empty()).is_err());
    }

    #[test]
    fn rejects_non_numeric_argument() {
        assert!(parse_port(vec!["not-a-port".to_string()].into_iter()).is_err());
    }
}
