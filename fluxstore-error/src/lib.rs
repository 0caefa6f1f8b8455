// Copyright 2024 The Fluxstore Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Shared error taxonomy used by every fluxstore crate. Mirrors `tonic::Status`
//! closely enough that mapping between the two at the gRPC boundary is lossless,
//! but stays decoupled from tonic so non-RPC crates (store backends, the
//! concurrency regulator) don't need to depend on it.

use std::fmt;

/// A status code. Deliberately kept isomorphic to `tonic::Code` so the
/// service layer can convert in both directions without losing information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// An error carrying a status code plus a chain of human-readable tips, each
/// one added by a layer of the call stack as the error propagates upward
/// (innermost first). This is the `err_tip` chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub code: Code,
    pub messages: Vec<String>,
}

impl Error {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Error {
            code,
            messages: vec![message.into()],
        }
    }

    /// Appends another tip to the front of the message chain without
    /// changing the code. Used by [`ResultExt::err_tip`].
    pub fn append(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    /// Combines two errors that occurred while handling the same operation
    /// (for example: a primary read failure and a secondary close failure).
    /// The code of `self` wins; `other`'s messages are appended for context.
    pub fn merge(mut self, other: Error) -> Self {
        self.messages.push(format!("Merged with: {other}"));
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.code == Code::NotFound
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {{ code: {:?}, messages: {:?} }}", self.code, self.messages)
    }
}

impl std::error::Error for Error {}

impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        let code = match err.code {
            Code::Ok => tonic::Code::Ok,
            Code::Cancelled => tonic::Code::Cancelled,
            Code::Unknown => tonic::Code::Unknown,
            Code::InvalidArgument => tonic::Code::InvalidArgument,
            Code::DeadlineExceeded => tonic::Code::DeadlineExceeded,
            Code::NotFound => tonic::Code::NotFound,
            Code::AlreadyExists => tonic::Code::AlreadyExists,
            Code::PermissionDenied => tonic::Code::PermissionDenied,
            Code::ResourceExhausted => tonic::Code::ResourceExhausted,
            Code::FailedPrecondition => tonic::Code::FailedPrecondition,
            Code::Aborted => tonic::Code::Aborted,
            Code::OutOfRange => tonic::Code::OutOfRange,
            Code::Unimplemented => tonic::Code::Unimplemented,
            Code::Internal => tonic::Code::Internal,
            Code::Unavailable => tonic::Code::Unavailable,
            Code::DataLoss => tonic::Code::DataLoss,
            Code::Unauthenticated => tonic::Code::Unauthenticated,
        };
        tonic::Status::new(code, err.messages.join(" -> "))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let code = match err.kind() {
            std::io::ErrorKind::NotFound => Code::NotFound,
            std::io::ErrorKind::PermissionDenied => Code::PermissionDenied,
            std::io::ErrorKind::AlreadyExists => Code::AlreadyExists,
            _ => Code::Internal,
        };
        Error::new(code, err.to_string())
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        let code = match status.code() {
            tonic::Code::Ok => Code::Ok,
            tonic::Code::Cancelled => Code::Cancelled,
            tonic::Code::Unknown => Code::Unknown,
            tonic::Code::InvalidArgument => Code::InvalidArgument,
            tonic::Code::DeadlineExceeded => Code::DeadlineExceeded,
            tonic::Code::NotFound => Code::NotFound,
            tonic::Code::AlreadyExists => Code::AlreadyExists,
            tonic::Code::PermissionDenied => Code::PermissionDenied,
            tonic::Code::ResourceExhausted => Code::ResourceExhausted,
            tonic::Code::FailedPrecondition => Code::FailedPrecondition,
            tonic::Code::Aborted => Code::Aborted,
            tonic::Code::OutOfRange => Code::OutOfRange,
            tonic::Code::Unimplemented => Code::Unimplemented,
            tonic::Code::Internal => Code::Internal,
            tonic::Code::Unavailable => Code::Unavailable,
            tonic::Code::DataLoss => Code::DataLoss,
            tonic::Code::Unauthenticated => Code::Unauthenticated,
        };
        Error::new(code, status.message())
    }
}

/// Construct an [`Error`] with a formatted message, the macro form of
/// [`Error::new`]. Used at the point a failure is first detected.
#[macro_export]
macro_rules! make_err {
    ($code:expr, $($arg:tt)+) => {
        $crate::Error::new($code, format!($($arg)+))
    };
}

/// Shorthand for `make_err!(Code::InvalidArgument, ...)`, the most common
/// kind of error produced while validating caller-supplied input.
#[macro_export]
macro_rules! make_input_err {
    ($($arg:tt)+) => {
        $crate::make_err!($crate::Code::InvalidArgument, $($arg)+)
    };
}

/// Early-return a formatted `InvalidArgument`-style error if `cond` holds.
#[macro_export]
macro_rules! error_if {
    ($cond:expr, $($arg:tt)+) => {
        if $cond {
            return Err($crate::make_input_err!($($arg)+));
        }
    };
}

/// Extension trait for attaching context to a `Result` as it propagates,
/// the Rust equivalent of wrapping an error with `fmt.Errorf("...: %w", err)`.
pub trait ResultExt<T> {
    fn err_tip<F, M>(self, f: F) -> Result<T, Error>
    where
        F: FnOnce() -> M,
        M: Into<String>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<Error>,
{
    fn err_tip<F, M>(self, f: F) -> Result<T, Error>
    where
        F: FnOnce() -> M,
        M: Into<String>,
    {
        self.map_err(|e| e.into().append(f().into()))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn err_tip<F, M>(self, f: F) -> Result<T, Error>
    where
        F: FnOnce() -> M,
        M: Into<String>,
    {
        self.ok_or_else(|| make_err!(Code::Internal, "{}", f().into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn err_tip_appends_in_order() {
        let base: Result<(), Error> = Err(make_err!(Code::NotFound, "missing row"));
        let tipped = base.err_tip(|| "while loading file metadata");
        assert_eq!(tipped.unwrap_err().messages, vec!["missing row", "while loading file metadata"]);
    }

    #[test]
    fn status_round_trips_code() {
        let err = make_err!(Code::ResourceExhausted, "too many uploads");
        let status: tonic::Status = err.clone().into();
        assert_eq!(status.code(), tonic::Code::ResourceExhausted);
        let back: Error = status.into();
        assert_eq!(back.code, Code::ResourceExhausted);
    }
}
