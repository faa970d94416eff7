//! Prometheus exporter for GPU allocation on Slurm clusters.

pub mod aggregate;
pub mod api;
pub mod app;
pub mod config;
pub mod metrics;
pub mod slurm;
