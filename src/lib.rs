//! flowforge-k8s: Kubernetes driver for FlowForge project instances
//!
//! This crate provisions each instance as a Deployment, Service and Ingress
//! (plus an optional volume and custom-hostname route), keeps them converged,
//! and recovers state after a driver restart.

pub mod config;
pub mod controller;
pub mod error;
pub mod model;
pub mod telemetry;

#[cfg(feature = "rest-api")]
pub mod rest_api;

pub use crate::error::{Error, Result};
