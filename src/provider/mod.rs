//! Provider registry
//!
//! Three axes of pluggable behaviour, each resolved by a discriminator string:
//!
//! - Infrastructure, by the Cluster's `spec.infrastructureRef.kind`
//! - ControlPlane, by the Cluster's `spec.controlPlaneRef.kind`
//! - Backend, by the configured backend name (`file` when none is given)
//!
//! Every provider persists itself as a JSON object carrying a `Name` key.
//! Restoring reads that key first, then hands the whole object to the
//! registered decoder for the concrete type.

pub mod backend;
pub mod confirm;
pub mod controlplane;
pub mod infrastructure;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};
use backend::{file::FileBackend, github::GithubBackend, s3::S3Backend, BackendProvider};
use controlplane::{k3s::K3sControlPlane, kubeadm::KubeadmControlPlane, ControlPlaneProvider};
use infrastructure::{linode::LinodeInfrastructure, InfrastructureProvider};

pub use confirm::{Confirm, StdinConfirm};

/// Backend used when no backend name is configured
pub const DEFAULT_BACKEND: &str = "file";

/// The provider triple one operation runs against
pub struct Providers {
    /// Compute, networking and front-end
    pub infrastructure: Box<dyn InfrastructureProvider>,
    /// Control plane flavor and trust material
    pub control_plane: Box<dyn ControlPlaneProvider>,
    /// State and offloaded file storage
    pub backend: Box<dyn BackendProvider>,
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers")
            .field("infrastructure", &self.infrastructure.name())
            .field("control_plane", &self.control_plane.name())
            .field("backend", &self.backend.name())
            .finish()
    }
}

/// Constructor and decoder registered under one name
pub struct Registration<T: ?Sized> {
    name: &'static str,
    construct: fn() -> Box<T>,
    restore: fn(Value) -> Result<Box<T>>,
}

impl<T: ?Sized> Registration<T> {
    /// Register `name` with a constructor for fresh instances and a decoder
    /// for persisted ones
    pub fn new(
        name: &'static str,
        construct: fn() -> Box<T>,
        restore: fn(Value) -> Result<Box<T>>,
    ) -> Self {
        Self {
            name,
            construct,
            restore,
        }
    }

    /// Discriminator this entry answers to
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Minimal view of a persisted provider used to pick its decoder
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "Name", default)]
    name: String,
}

/// Name-to-provider tables for the three axes
pub struct ProviderRegistry {
    infrastructure: Vec<Registration<dyn InfrastructureProvider>>,
    control_plane: Vec<Registration<dyn ControlPlaneProvider>>,
    backend: Vec<Registration<dyn BackendProvider>>,
}

impl Default for ProviderRegistry {
    /// Registry with every built-in provider
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register_infrastructure(Registration::new(
            LinodeInfrastructure::NAME,
            || Box::new(LinodeInfrastructure::new()),
            |raw| Ok(Box::new(LinodeInfrastructure::restore(raw)?)),
        ));
        registry.register_control_plane(Registration::new(
            KubeadmControlPlane::NAME,
            || Box::new(KubeadmControlPlane::new()),
            |raw| Ok(Box::new(KubeadmControlPlane::restore(raw)?)),
        ));
        registry.register_control_plane(Registration::new(
            K3sControlPlane::NAME,
            || Box::new(K3sControlPlane::new()),
            |raw| Ok(Box::new(K3sControlPlane::restore(raw)?)),
        ));
        registry.register_backend(Registration::new(
            FileBackend::NAME,
            || Box::new(FileBackend::new()),
            |raw| Ok(Box::new(FileBackend::restore(raw)?)),
        ));
        registry.register_backend(Registration::new(
            S3Backend::NAME,
            || Box::new(S3Backend::new()),
            |raw| Ok(Box::new(S3Backend::restore(raw)?)),
        ));
        registry.register_backend(Registration::new(
            GithubBackend::NAME,
            || Box::new(GithubBackend::new()),
            |raw| Ok(Box::new(GithubBackend::restore(raw)?)),
        ));
        registry
    }
}

impl ProviderRegistry {
    /// Registry with no providers at all
    pub fn empty() -> Self {
        Self {
            infrastructure: Vec::new(),
            control_plane: Vec::new(),
            backend: Vec::new(),
        }
    }

    /// Add an infrastructure provider; a later entry with the same name wins
    pub fn register_infrastructure(&mut self, entry: Registration<dyn InfrastructureProvider>) {
        self.infrastructure.retain(|e| e.name != entry.name);
        self.infrastructure.push(entry);
    }

    /// Add a control plane provider; a later entry with the same name wins
    pub fn register_control_plane(&mut self, entry: Registration<dyn ControlPlaneProvider>) {
        self.control_plane.retain(|e| e.name != entry.name);
        self.control_plane.push(entry);
    }

    /// Add a backend; a later entry with the same name wins
    pub fn register_backend(&mut self, entry: Registration<dyn BackendProvider>) {
        self.backend.retain(|e| e.name != entry.name);
        self.backend.push(entry);
    }

    /// Fresh infrastructure provider for `name`
    pub fn infrastructure(&self, name: &str) -> Result<Box<dyn InfrastructureProvider>> {
        Ok((lookup("infrastructure", &self.infrastructure, name)?.construct)())
    }

    /// Fresh control plane provider for `name`
    pub fn control_plane(&self, name: &str) -> Result<Box<dyn ControlPlaneProvider>> {
        Ok((lookup("control plane", &self.control_plane, name)?.construct)())
    }

    /// Fresh backend for `name`, or the file backend when `name` is empty
    pub fn backend(&self, name: &str) -> Result<Box<dyn BackendProvider>> {
        let name = if name.is_empty() { DEFAULT_BACKEND } else { name };
        Ok((lookup("backend", &self.backend, name)?.construct)())
    }

    /// Decode a persisted infrastructure provider
    pub fn restore_infrastructure(&self, raw: Value) -> Result<Box<dyn InfrastructureProvider>> {
        let name = envelope_name(&raw)?;
        (lookup("infrastructure", &self.infrastructure, &name)?.restore)(raw)
    }

    /// Decode a persisted control plane provider
    pub fn restore_control_plane(&self, raw: Value) -> Result<Box<dyn ControlPlaneProvider>> {
        let name = envelope_name(&raw)?;
        (lookup("control plane", &self.control_plane, &name)?.restore)(raw)
    }

    /// Decode a persisted backend
    pub fn restore_backend(&self, raw: Value) -> Result<Box<dyn BackendProvider>> {
        let name = envelope_name(&raw)?;
        (lookup("backend", &self.backend, &name)?.restore)(raw)
    }

    /// Registered backend names, in registration order
    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backend.iter().map(Registration::name).collect()
    }
}

/// Serialize `provider` as an object and tag it with `Name`
pub(crate) fn persist_named<T: Serialize>(name: &str, provider: &T) -> Result<Value> {
    let mut value = serde_json::to_value(provider)?;
    let object = value
        .as_object_mut()
        .ok_or_else(|| Error::config(format!("provider {name} did not persist as an object")))?;
    object.insert("Name".to_string(), Value::String(name.to_string()));
    Ok(value)
}

fn envelope_name(raw: &Value) -> Result<String> {
    Ok(Envelope::deserialize(raw)?.name)
}

fn lookup<'a, T: ?Sized>(
    axis: &'static str,
    entries: &'a [Registration<T>],
    name: &str,
) -> Result<&'a Registration<T>> {
    entries
        .iter()
        .find(|e| e.name == name)
        .ok_or_else(|| Error::UnknownProvider {
            axis,
            name: name.to_string(),
            known: entries
                .iter()
                .map(|e| e.name)
                .collect::<Vec<_>>()
                .join(", "),
        })
}
