//! Backend adapters that turn lowered kernel sources into build artifacts.
//!
//! Each backend family (host CPU, GPU, MPI-distributed, FPGA HLS) implements
//! [`BackendAdapter`]. Adapters write sources and build scripts into a slot's
//! staging directory and drive the external toolchain through a
//! [`ToolchainRunner`], which captures the toolchain log and enforces timeout
//! and cancellation bounds.

#![warn(missing_docs)]

pub mod adapter;
pub mod cpu;
pub mod distributed;
pub mod error;
pub mod fpga;
pub mod gpu;
pub mod ir;
pub mod runner;
pub mod transient;

pub use adapter::{create_adapter, BackendAdapter, Capabilities};
pub use error::BackendError;
pub use ir::{KernelIr, SourceUnit};
pub use runner::{CancelToken, Invocation, RunOutput, TimeoutClass, ToolchainRunner, LOG_FILE};
pub use transient::TransientPredicate;
