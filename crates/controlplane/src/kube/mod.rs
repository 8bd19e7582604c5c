//! Kubernetes-backed [`ControlPlane`](crate::api::ControlPlane).

mod client;
mod config;
mod quantity;
mod wire;

pub use client::KubeControlPlane;
pub use config::KubeConfig;
pub use quantity::{parse_cpu_millis, parse_memory_bytes};
