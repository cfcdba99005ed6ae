//! Declarative machine configuration for a Kubernetes node OS.
//!
//! A node is described by a YAML [config](crate::config) document stream.
//! The stream is decoded, validated and stored as a
//! [`MachineConfig`](resources::config::MachineConfig) resource, from which
//! a set of [controllers] derives everything the node runs: the kubelet
//! command line, the control plane static pods, the bootstrap manifests,
//! the containerd registry tree and the certificates of the machine API.
//!
//! Most of the derivations are plain functions (see [`kubelet`],
//! [`control_plane`], [`static_pod`], [`manifests`], [`cri`] and
//! [`kubeconfig`]) so they can be used without running the controllers.
//!
//! # Example
//! ```rust,no_run
//! use machinery::config::Container;
//! use machinery::controllers::{register_all, Options};
//! use machinery::resources::config::{MachineConfig, ACTIVE_ID};
//! use resource_state::{Context, Resource, Runtime, State};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let raw = std::fs::read("config.yaml")?;
//! let container = Container::from_bytes(&raw)?;
//!
//! let ctx = Context::new();
//! let state = State::new();
//! state
//!     .create(&ctx, Resource::new(ACTIVE_ID, MachineConfig::new(&container)?))
//!     .await?;
//!
//! let mut runtime = Runtime::new(state.clone());
//! register_all(&mut runtime, &Options::default())?;
//! runtime.run(&ctx).await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![cfg_attr(feature = "docs", feature(doc_cfg))]

pub mod argsbuilder;
pub mod cmd;
pub mod config;
pub mod constants;
pub mod control_plane;
pub mod controllers;
pub mod cri;
pub mod devlinks;
pub mod encoding;
pub mod images;
pub mod kubeconfig;
pub mod kubelet;
pub mod manifests;
pub mod net;
pub mod nodename;
pub mod protofile;
pub mod reaper;
pub mod resources;
pub mod scsi;
pub mod settings;
pub mod static_pod;
pub mod tls;
pub mod x509;

#[doc(inline)]
pub use config::Container;
#[doc(inline)]
pub use settings::Settings;
