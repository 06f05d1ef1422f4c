//! Mail Assist: answers support email with a hosted assistant.

pub mod assistant;
pub mod certificate;
pub mod config;
pub mod driver;
pub mod error;
pub mod logging;
pub mod mailbox;

#[cfg(test)]
mod testing;
