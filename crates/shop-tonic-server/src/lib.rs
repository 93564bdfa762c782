#![doc = include_str!("../README.md")]

pub mod cli;
pub mod inventory;
pub mod launch;
pub mod userop;
