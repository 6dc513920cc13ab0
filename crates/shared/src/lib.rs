//! Apata shared library — ids and wire contracts exchanged with the key
//! directory and the message transport.

pub mod api;
pub mod constants;
pub mod error;
pub mod ids;
