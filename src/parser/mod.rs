//! Mailbox parsing: streaming mbox splitting and pre-upload header repair.

pub mod mbox;
pub mod sanitize;
