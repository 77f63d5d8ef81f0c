//! Request middleware

pub mod decode;
pub mod trusted;
