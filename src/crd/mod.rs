//! Custom Resource Definitions for policy-operator.
//!
//! - `ClusterPolicy`: a cluster-scoped, ordered set of mutation rules
//!   evaluated against objects at admission time.

mod policy;

pub use policy::*;
