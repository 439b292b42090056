//! Connection Policy Module
//!
//! Accept/reject decisions applied per connection and per envelope recipient.

mod engine;

pub use engine::{ConnectionDecision, ConnectionPolicy, RecipientRejected};
