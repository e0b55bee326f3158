//! A federation worker: polls its current master, executes tasks, and
//! obeys REDIRECT/RETURN orders (§4.8).

pub mod client;
pub mod executor;

pub use client::WorkerClient;
