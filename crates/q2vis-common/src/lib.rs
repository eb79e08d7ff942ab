#![allow(clippy::needless_range_loop, clippy::too_many_arguments, clippy::manual_range_contains)]

pub mod q_shared;
pub mod qfiles;
pub mod error;
pub mod common;
pub mod cvar;
pub mod files;
pub mod bspfile;
