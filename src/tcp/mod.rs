pub(crate) mod frame;
mod server;

pub use server::*;
