// src/backend/device.rs

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Where row and chunk work units are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Device {
    /// The process-wide rayon pool.
    #[default]
    Global,
    /// A dedicated pool with this many workers. `Threads(1)` runs serially.
    Threads(usize),
}

impl Device {
    pub fn is_global(&self) -> bool {
        matches!(self, Device::Global)
    }

    // Worker count, None for the global pool
    pub fn num_threads(&self) -> Option<usize> {
        match self {
            Device::Global => None,
            Device::Threads(n) => Some(*n),
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Global => write!(f, "global"),
            Device::Threads(n) => write!(f, "threads:{}", n),
        }
    }
}

pub fn serial() -> Device {
    Device::Threads(1)
}

pub fn default_device() -> Device {
    Device::Global
}

/// Runs kernels on the pool selected by a [`Device`].
/// Built once per loss object so the dedicated pool is reused across calls.
#[derive(Debug, Clone, Default)]
pub struct Executor {
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl Executor {
    pub fn new(device: Device) -> Result<Self> {
        let pool = match device {
            Device::Global => None,
            Device::Threads(n) => Some(Arc::new(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("fused-xent-{}", i))
                    .build()?,
            )),
        };
        Ok(Self { pool })
    }

    /// Runs `op` with every nested rayon call scheduled on this executor's pool.
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    pub fn current_num_threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }
}
