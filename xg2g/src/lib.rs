//! xg2g control plane: intent-to-session admission, attestation, and HLS
//! artifact serving for a set-top-box media backend.

pub mod admission;
pub mod attestation;
pub mod auth;
pub mod authz;
pub mod config;
pub mod errors;
pub mod eventbus;
pub mod hls_resolver;
pub mod hls_serving;
pub mod intents;
pub mod metrics;
pub mod models;
pub mod playback_info;
pub mod problem;
pub mod router;
pub mod session_store;
pub mod sessions;
pub mod slo;
pub mod web;
