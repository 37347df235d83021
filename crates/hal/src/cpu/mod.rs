// Copyright 2025 Irreducible Inc.

//! Reference device that executes every operation on the host.

mod alloc;
mod config;
mod device;
mod executor;
mod memory;

pub use alloc::HeapAllocator;
pub use config::*;
pub use device::CpuDevice;
