//! Composition root of the mower controller.
//!
//! [`ResourceManager`] owns the hardware registry, instantiates every
//! subsystem, wires them over the event bus, and supervises ordered
//! startup and bounded reverse-order shutdown.  The `mower` binary is a
//! thin shell around it: environment configuration, logging, signal
//! handling, and the panic hook.

pub mod config;
pub mod instance;
pub mod supervisor;

pub use config::RuntimeConfig;
pub use instance::SingleInstanceLock;
pub use supervisor::ResourceManager;
