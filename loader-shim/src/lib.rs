#![no_std]

pub mod script;
