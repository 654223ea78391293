//! Client registry: who is connected and where their audio goes

pub mod client;
pub mod manager;

pub use client::{Capabilities, Client, ClientReport, ClientStatus};
pub use manager::{CleanupStats, ClientRegistry, RegistryCleaner};
