//! Typed resources exchanged between the controllers.
//!
//! Every spec here is stored in a [`resource_state::State`]. The namespace
//! constants group them the way the controllers do: the machine config
//! lives in [`config`], node network state in [`network`], Kubernetes
//! derived specs in [`k8s`], key material in [`secrets`] and registry
//! settings in [`cri`].

pub mod config;
pub mod cri;
pub mod k8s;
pub mod network;
pub mod secrets;
