//! Built-in dialect tables.

pub mod cisco_ios;
pub mod tplink_sg;
