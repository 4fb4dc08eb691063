//! Workflow building blocks for dispatching thread pools.
//!
//! # Key Components
//!
//! ## Queues and Channels
//!
//! - [`work_queue`] - A closable MPMC work queue with non-blocking, optionally
//!   bounded intake. A full queue refuses work instead of blocking the producer,
//!   which keeps dispatch latency deterministic.
//! - [`oneshot`] - Single-value communication between threads
//!
//! ## Task Management
//!
//! - [`join_handle`] - Handles for waiting on task results

pub mod join_handle;
pub mod oneshot;
pub mod work_queue;
