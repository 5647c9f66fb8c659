#![allow(dead_code)]

pub mod shared_buffer;

pub mod server;

pub use shared_buffer::SharedBuf;
