//! Command modules for install-llvm.
//!
//! - [`install`] - Obtain LLVM and configure the downstream build
//! - [`status`] - Report the resolved installation without changing it

pub mod install;
pub mod status;
