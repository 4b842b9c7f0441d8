//! Agent Registry: the capability directory the bus routes by.
//!
//! Maps an agent identifier to its accepted methods, its transport, its health
//! and the agents it may call directly. The registry is an explicit object
//! owned by the service root and injected into the bus and orchestrator.
//!
//! # Main types
//!
//! - [`AgentManifest`]: Declaration of methods, transport and direct-call targets.
//! - [`AgentRegistry`]: Shared directory with allow-list checks.
//! - [`TransportDescriptor`]: Result of resolving an agent and method.
//! - [`HealthMonitor`]: Periodic health polling.

/// Periodic agent health polling.
pub mod health;
/// Manifest types and manifest file loading.
pub mod manifest;
/// The shared agent directory.
pub mod registry;

pub use health::HealthMonitor;
pub use manifest::{
    load_manifests, parse_json, parse_toml, AgentManifest, HealthStatus, ManifestFile,
    MethodSpec, Transport, TransportMode,
};
pub use registry::{AgentRegistry, TransportDescriptor};
