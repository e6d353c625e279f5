#[macro_use]
extern crate lazy_static;

pub mod abi;
pub mod address_book;
pub mod artifact;
pub mod chain;
pub mod config;
pub mod constants;
pub mod create3;
pub mod deployer;
pub mod dispatch;
pub mod errors;
pub mod manifest;
pub mod queue;
pub mod retry;
pub mod sstore2;
pub mod store;
pub mod testing;
pub mod verify;
