//! Helper utilities, functions, and macros.

#[macro_use]
mod print;

#[macro_use]
mod config;

mod error;
mod safetcp;

pub use error::DsmError;
pub use print::logger_init;
pub use safetcp::tcp_bind_with_retry;

pub(crate) use safetcp::{tcp_connect_with_retry, tcp_read_obj, tcp_write_obj};
