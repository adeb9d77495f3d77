//! Dataflow playbook runner library.
//!
//! Exports the scheduler core (C1-C7) and the ambient surface (C8-C11) for
//! integration testing.

pub mod cli;
pub mod config;
pub mod environment;
pub mod error;
pub mod expander;
pub mod invoker;
pub mod logging;
pub mod playbook;
pub mod runid;
pub mod scheduler;
pub mod template;
pub mod waiter;
