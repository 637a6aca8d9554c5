#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use vap_controller_core as core;
pub use vap_controller_k8s_api as k8s;
pub use vap_controller_k8s_index as index;

mod args;
mod capability;
mod discovery;
mod events;
mod lease;
mod store;

pub use self::args::Args;
