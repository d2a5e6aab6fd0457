//! # Task System Core Traits
//!
//! This module defines the fundamental building blocks of the task system,
//! which provides a framework for executing work asynchronously across multiple threads.
//!
//! ## Core Components
//! - `Task`: Represents a unit of work that can be executed asynchronously
//! - `TaskResult`: Represents the result of a completed task
//!
//! ## Task Lifecycle
//! 1. A `Task` is created and scheduled via `TaskManager::publish_task()`
//! 2. The task's `process()` method is called on a worker thread
//! 3. The task returns a boxed `TaskResult`
//! 4. The result's `handle_result()` is called on whichever thread next calls
//!    `TaskManager::process_completed_tasks()`
//! 5. The result can spawn follow-up tasks
//!
//! A task must publish its effects itself, inside `process()`. Results are
//! drained opportunistically, so nothing may depend on `handle_result()`
//! running promptly.

/// A unit of work that can be executed on a worker thread.
///
/// Tasks own all the data they need; shared state is reached through `Arc`
/// handles captured at construction.
pub trait Task: Send {
    /// Performs the work on a worker thread.
    ///
    /// # Returns
    /// A boxed `TaskResult` handed back to the thread that drains results.
    fn process(&self) -> Box<dyn TaskResult + Send>;
}

/// The result of processing a `Task`.
pub trait TaskResult: Send {
    /// Handles the result of a completed task.
    ///
    /// # Returns
    /// Follow-up tasks to schedule (can be empty).
    fn handle_result(self: Box<Self>) -> Vec<Box<dyn Task + Send>>;
}
