pub mod common;

mod unit;
