mod client;

pub use client::{ClientArgs, client_command};
