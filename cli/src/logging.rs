// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Shared logging setup for every role's binary, grounded on
//! `hebo/src/log.rs`: a console appender plus a size-triggered, gzip-rolled
//! file appender when a log file path is given.

use std::path::Path;

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

use crate::error::{Error, ErrorKind};

const LOG_FILE_SIZE: u64 = 16 * 1024 * 1024;
const ROLLER_PATTERN: &str = ".{}.gz";
const ROLLER_COUNT: u32 = 10;
const STDOUT_NAME: &str = "stdout";
const ROLLER_NAME: &str = "roller";

pub fn init(level: LevelFilter, log_file: Option<&Path>) -> Result<(), Error> {
    let stdout = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("{d} {h({l})} - {m}{n}")))
        .build();

    let mut builder = Config::builder().appender(Appender::builder().build(STDOUT_NAME, Box::new(stdout)));
    let mut roots = vec![STDOUT_NAME];

    if let Some(log_file) = log_file {
        let roller_pattern = log_file
            .to_str()
            .ok_or_else(|| Error::new(ErrorKind::ConfigError, format!("invalid log file path {log_file:?}")))?
            .to_string()
            + ROLLER_PATTERN;
        let roller = FixedWindowRoller::builder()
            .build(&roller_pattern, ROLLER_COUNT)
            .map_err(|err| Error::new(ErrorKind::LoggerError, format!("failed to build roller: {err}")))?;
        let policy = Box::new(CompoundPolicy::new(Box::new(SizeTrigger::new(LOG_FILE_SIZE)), Box::new(roller)));
        let file_appender = RollingFileAppender::builder()
            .build(log_file, policy)
            .map_err(|err| Error::new(ErrorKind::LoggerError, format!("failed to build file appender: {err}")))?;
        builder = builder.appender(Appender::builder().build(ROLLER_NAME, Box::new(file_appender)));
        roots.push(ROLLER_NAME);
    }

    let config = builder
        .build(Root::builder().appenders(roots).build(level))
        .map_err(|err| Error::new(ErrorKind::LoggerError, format!("failed to build log config: {err}")))?;

    log4rs::init_config(config).map_err(|err| Error::new(ErrorKind::LoggerError, format!("failed to init log4rs: {err}")))?;
    Ok(())
}
