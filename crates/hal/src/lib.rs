// Copyright 2025 Irreducible Inc.

//! Device-agnostic runtime dispatch layer.
//!
//! A [`Device`] wraps a backend implementing [`DeviceBackend`] and is the single entry point for
//! moving data between host and device memory, submitting queue-ordered work and waiting on
//! timeline [`Semaphore`]s. Arguments are validated here, once, before any backend is invoked.
//!
//! [`cpu::CpuDevice`] is a complete backend executing on the host.

pub mod allocator;
pub mod buffer;
pub mod channel;
pub mod command_buffer;
pub mod cpu;
pub mod device;
mod error;
pub mod file;
pub mod profiling;
pub mod queue;
pub mod resource;
pub mod semaphore;
pub mod timeout;
pub mod transfer;
mod wait;

pub use allocator::{Allocator, AllocatorPool, AllocatorStatistics, HostAllocator};
pub use buffer::{Allocation, Buffer, BufferOverlap, BufferParams, BufferUsage, MemoryType};
pub use command_buffer::{CommandBuffer, CommandBufferBuilder, CommandBufferMode, TransferCommand};
pub use device::{Device, DeviceBackend, DeviceCapabilities};
pub use error::*;
pub use file::{File, FileAccess, HostFile, MemoryFile};
pub use queue::QueueAffinity;
pub use semaphore::{Semaphore, SemaphoreCompatibility, SemaphoreList, Timepoints, WaitMode};
pub use timeout::Timeout;
pub use transfer::{HostSpan, TransferBuffer, TransferBufferFlags};

/// Byte offsets and lengths within device memory.
pub type DeviceSize = u64;
