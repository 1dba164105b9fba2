pub mod data_item;

pub use data_item::*;
