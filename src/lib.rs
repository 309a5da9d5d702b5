//! capi-bootstrap - bootstrap self-managing Cluster API clusters from one machine
//!
//! A single bootstrap node is provisioned with a generated first-boot
//! payload that installs a minimal control plane, seeds it with the Cluster
//! API manifests of the real target cluster and lets it pivot itself into
//! that cluster.
//!
//! # Modules
//!
//! - [`manifest`] - Multi-document YAML classification, mutation and two-phase templating
//! - [`provider`] - Infrastructure, control plane and backend providers plus their registry
//! - [`pki`] - Control plane CA hierarchy and admin kubeconfig
//! - [`cloudinit`] - First-boot payload assembly, archive bundling and Helm add-ons
//! - [`state`] - Cluster state persisted inside the admin kubeconfig
//! - [`pipeline`] - Create and delete flows
//! - [`config`] - Profile configuration file
//! - [`nodes`] - Node listing for stored clusters
//! - [`cli`] - Command line interface
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod assets;
pub mod cli;
pub mod cloudinit;
pub mod config;
pub mod error;
pub mod kubeconfig;
pub mod manifest;
pub mod nodes;
pub mod pipeline;
pub mod pki;
pub mod provider;
pub mod state;
pub mod token;
pub mod values;

pub use cli::Cli;
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
