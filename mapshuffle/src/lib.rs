// The changes suggested by this lint usually make the code more cluttered and less clear:
#![allow(clippy::needless_range_loop)]

pub mod exits;
pub mod metalocation;
pub mod parse;
pub mod rom;
pub mod transfer;
pub mod traverse;
pub mod write;
