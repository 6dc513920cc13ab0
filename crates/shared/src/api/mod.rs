pub mod keys;
pub mod message;
