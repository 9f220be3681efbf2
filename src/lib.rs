//! Cluster import controller for a hub-and-spoke cluster manager
//!
//! The hub tracks every spoke as a `ManagedCluster`. This crate stages the
//! import package a spoke needs in order to join (klusterlet CRDs, agent
//! install manifests and a bootstrap kubeconfig), delivers the klusterlet to
//! joined spokes as `ManifestWork`s, and supervises teardown of those works
//! when a cluster is removed.
//!
//! # Modules
//!
//! - [`crd`] - ManagedCluster and ManifestWork resource types
//! - [`artifact`] - Artifact naming and role classification
//! - [`controller`] - Reconciliation, finalizer lifecycle and work storage
//! - [`import`] - Import package assembly (credentials, images, placement)
//! - [`template`] - Klusterlet manifest templates
//! - [`config`] - Controller configuration
//! - [`telemetry`] - Logging initialization
//! - [`error`] - Error types for the controller

#![deny(missing_docs)]

pub mod artifact;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod import;
pub mod telemetry;
pub mod template;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager recorded on every write made by the controller
pub const FIELD_MANAGER: &str = "cluster-import-controller";
