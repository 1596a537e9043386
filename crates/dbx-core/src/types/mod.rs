//! Core data types: enums, labels, channels, account and market records.

pub mod channel;
pub mod enums;
pub mod label;
pub mod market_data;
pub mod trading;

pub use channel::*;
pub use enums::*;
pub use label::*;
pub use market_data::*;
pub use trading::*;
