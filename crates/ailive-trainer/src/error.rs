use std::fmt;

/// String-message error used across the crate.
///
/// A failure is terminal for the operation that produced it; the message
/// names the path, request, or config field involved.
#[derive(Debug)]
pub struct Error(String);

impl Error {
    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::msg(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
