//! Manifest loading (§6): turning a declarative manifest on disk into
//! an [`InstanceGraph`] plus the configurators it references.
//!
//! The manifest format itself — the YAML/TOML dialect, its schema, the
//! `Ref` expression language — is explicitly out of scope (§1 Non-goals,
//! §6): this module only pins the seam a concrete loader plugs into.

use async_trait::async_trait;

use crate::configurator::ConfiguratorRegistry;
use crate::error::Result;
use crate::instance::InstanceGraph;

/// Everything a runner needs to start a job: the instance graph as
/// declared, and the configurators available to run against it.
pub struct Manifest {
    pub graph: InstanceGraph,
    pub registry: ConfiguratorRegistry,
}

/// External collaborator that turns a manifest source into a
/// [`Manifest`]. A real deployment implements this against its own
/// file format; [`crate::demo::InMemoryManifestLoader`] is a minimal
/// stand-in used by the CLI's smoke-test path.
#[async_trait]
pub trait ManifestLoader: Send + Sync {
    async fn load(&self) -> Result<Manifest>;
}
