// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::fmt::{self, Display};

#[derive(Clone, Debug)]
pub enum ErrorKind {
    ParameterError,
    ConfigError,
    LoggerError,
    IoError,
}

#[derive(Clone, Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    #[must_use]
    pub const fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::new(ErrorKind::IoError, err.to_string())
    }
}

impl From<mqttsuite_core::Error> for Error {
    fn from(err: mqttsuite_core::Error) -> Self {
        Error::new(ErrorKind::IoError, err.to_string())
    }
}

impl From<mqttsuite_mapping::Error> for Error {
    fn from(err: mqttsuite_mapping::Error) -> Self {
        Error::new(ErrorKind::ConfigError, err.to_string())
    }
}

impl From<mqttsuite_bridge::Error> for Error {
    fn from(err: mqttsuite_bridge::Error) -> Self {
        Error::new(ErrorKind::ConfigError, err.to_string())
    }
}
