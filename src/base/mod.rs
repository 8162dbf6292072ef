//! Error codes and I/O error mapping.
//!
//! - [`NetError`](neterror::NetError): numeric error codes, compatible with
//!   `net_error_list.h` where a counterpart exists
//! - [`context`]: `std::io::Error` to `NetError` conversion

pub mod context;
pub mod neterror;

#[cfg(test)]
mod tests;
