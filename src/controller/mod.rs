//! Leader-only controllers.
//!
//! These run only while this process holds the leadership lease and are
//! constructed fresh on every acquisition.

pub mod status;

pub use status::PolicyStatusController;
