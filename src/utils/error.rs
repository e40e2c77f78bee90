//! Customized unified error type.

use std::error;
use std::fmt;
use std::io;
use std::net;

/// Customized error type for ivydsm.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DsmError(pub String);

impl DsmError {
    pub fn msg(msg: impl ToString) -> Self {
        DsmError(msg.to_string())
    }
}

impl fmt::Display for DsmError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0) // do not display literal quotes
    }
}

impl error::Error for DsmError {}

// Helper macro for saving boiler-plate `impl From<X>`s for transparent
// conversion from various common error types to `DsmError`.
macro_rules! impl_from_error {
    ($error:ty) => {
        impl From<$error> for DsmError {
            fn from(e: $error) -> Self {
                // just store the source error's string representation
                DsmError(e.to_string())
            }
        }
    };
}

// Helper macro for saving boiler-plate `impl From<X<T>>`s for transparent
// conversion from various common generic error types to `DsmError`.
macro_rules! impl_from_error_generic {
    ($error:ty) => {
        impl<T> From<$error> for DsmError {
            fn from(e: $error) -> DsmError {
                DsmError::msg(e.to_string())
            }
        }
    };
}

impl_from_error!(io::Error);
impl_from_error!(net::AddrParseError);
impl_from_error!(rmp_serde::encode::Error);
impl_from_error!(rmp_serde::decode::Error);
impl_from_error!(toml::ser::Error);
impl_from_error!(toml::de::Error);
impl_from_error!(ctrlc::Error);
impl_from_error!(tokio::task::JoinError);

impl_from_error_generic!(tokio::sync::watch::error::SendError<T>);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let e = DsmError("what the heck?".into());
        assert_eq!(format!("{}", e), String::from("what the heck?"));
    }

    #[test]
    fn from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "oh no!");
        let e = DsmError::from(io_error);
        assert!(e.0.contains("oh no!"));
    }

    #[test]
    fn from_addr_parse_error() {
        let res: Result<net::SocketAddr, DsmError> =
            "not-an-addr".parse::<net::SocketAddr>().map_err(DsmError::from);
        assert!(res.is_err());
    }
}
