//! One handler module per connection role (§4.3–§4.5). Each handler is a
//! plain async function: it reads state, computes a reply, and returns —
//! the dispatcher owns the socket and does all I/O.

pub mod peer_request;
pub mod release;
pub mod worker;
