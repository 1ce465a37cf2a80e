
mod client;
mod hook;
mod monitor;
