#![allow(dead_code)]

pub mod client;
pub mod dirs;
pub mod harness;
pub mod origin;

pub use client::*;
pub use dirs::*;
pub use harness::*;
pub use origin::*;
