pub mod args;
pub mod codec;
pub mod handshake;
