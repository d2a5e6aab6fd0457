//! # Task Management System
//!
//! This module provides a worker pool for executing work off the calling
//! thread. Chunk population is its main client: generation, storage reads and
//! remote fetches all run here so the frame loop never blocks on them.
//!
//! ## Architecture Overview
//!
//! The task management system consists of several key components:
//! - `TaskManager`: Central coordinator for task distribution and worker management
//! - `Task`: A unit of work that can be executed asynchronously
//! - `TaskResult`: The result of a completed task, which can spawn additional tasks
//! - `TaskChannel`: Communication channel between the owner and one worker thread
//!
//! ## Task Lifecycle
//! 1. Tasks are created and published via `TaskManager::publish_task()`
//! 2. The manager distributes tasks to available worker channels using round-robin
//! 3. Workers process tasks and return results
//! 4. Results are handled in `process_completed_tasks()`
//! 5. Results can spawn new tasks
//!
//! Workers release their in-flight slot as soon as `process()` returns, so
//! the pool keeps draining even when nobody collects results for a while.
//!
//! ## Example Usage
//! ```rust,ignore
//! let mut task_manager = TaskManager::new(num_workers);
//!
//! // Publish a task for background processing
//! task_manager.publish_task(Box::new(MyTask::new(...)));
//!
//! // In your main/game loop:
//! task_manager.process_completed_tasks();
//! task_manager.process_queued_tasks();
//! ```

pub mod task;

use log::{debug, error, info};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use task::{Task, TaskResult};

/// A communication channel between the owner and one worker thread.
///
/// # Fields
/// - `task_sender`: Sends tasks to the worker
/// - `result_receiver`: Receives task results from the worker
/// - `num_tasks_in_flight`: Tasks sent but not yet finished; the worker decrements it
/// - `_worker`: Handle to the worker thread
#[derive(Debug)]
pub struct TaskChannel {
    task_sender: Sender<Box<dyn Task + Send>>,
    result_receiver: Receiver<Box<dyn TaskResult + Send>>,
    num_tasks_in_flight: Arc<AtomicUsize>,
    _worker: JoinHandle<()>,
}

impl TaskChannel {
    fn in_flight(&self) -> usize {
        self.num_tasks_in_flight.load(Ordering::Acquire)
    }
}

/// Manages a pool of worker threads and coordinates task execution.
///
/// # Fields
/// - `channels`: Set of active worker channels
/// - `queued_tasks`: Tasks waiting for an available worker
/// - `current_channel`: Index for round-robin scheduling
///
/// Dropping the manager closes every task channel; workers finish their
/// current task and exit.
pub struct TaskManager {
    channels: Vec<TaskChannel>,
    queued_tasks: VecDeque<Box<dyn Task + Send>>,
    current_channel: usize,
}

/// Maximum number of tasks that can be in flight per worker channel.
pub const MAX_TASKS_IN_FLIGHT: usize = 4;

impl TaskManager {
    /// Creates a new `TaskManager` with the specified number of worker threads.
    ///
    /// # Arguments
    /// * `num_workers` - Number of worker threads to create. With zero workers
    ///   every task stays queued. A worker whose thread cannot be spawned is
    ///   logged and left out of the pool.
    pub fn new(num_workers: usize) -> Self {
        let mut channels = Vec::with_capacity(num_workers);

        info!(
            "Starting {} task workers (available parallelism: {:?})",
            num_workers,
            thread::available_parallelism()
        );

        for worker_idx in 0..num_workers {
            let (task_tx, task_rx) = channel::<Box<dyn Task + Send>>();
            let (result_tx, result_rx) = channel::<Box<dyn TaskResult + Send>>();
            let num_tasks_in_flight = Arc::new(AtomicUsize::new(0));
            let worker_in_flight = num_tasks_in_flight.clone();

            let task_closure = move || {
                while let Ok(task) = task_rx.recv() {
                    let result = task.process();
                    worker_in_flight.fetch_sub(1, Ordering::AcqRel);
                    if result_tx.send(result).is_err() {
                        break;
                    }
                }
                debug!("Task worker {} exiting", worker_idx);
            };

            let worker = match thread::Builder::new()
                .name(format!("task-worker-{worker_idx}"))
                .spawn(task_closure)
            {
                Ok(worker) => worker,
                Err(err) => {
                    error!("Could not start task worker {}: {}", worker_idx, err);
                    continue;
                }
            };

            channels.push(TaskChannel {
                task_sender: task_tx,
                result_receiver: result_rx,
                num_tasks_in_flight,
                _worker: worker,
            });
        }

        TaskManager {
            channels,
            queued_tasks: VecDeque::new(),
            current_channel: 0,
        }
    }

    /// Attempts to send a task to a specific worker channel.
    ///
    /// # Returns
    /// - `Ok(())` if the task was handed to the worker
    /// - `Err(task)` if the worker is gone, giving the task back for requeueing
    fn try_send_task(
        &mut self,
        task: Box<dyn Task + Send>,
        channel_idx: usize,
    ) -> Result<(), Box<dyn Task + Send>> {
        let channel = &self.channels[channel_idx];
        channel.num_tasks_in_flight.fetch_add(1, Ordering::AcqRel);
        match channel.task_sender.send(task) {
            Ok(_) => Ok(()),
            Err(task) => {
                channel.num_tasks_in_flight.fetch_sub(1, Ordering::AcqRel);
                Err(task.0)
            }
        }
    }

    /// Finds a worker channel that can accept a new task, round-robin from
    /// the last used channel.
    ///
    /// # Returns
    /// - `Some(usize)` index of an available channel
    /// - `None` if all channels are at `MAX_TASKS_IN_FLIGHT` or there are none
    fn find_available_channel(&self) -> Option<usize> {
        if self.channels.is_empty() {
            return None;
        }

        let start_channel = self.current_channel % self.channels.len();
        let mut current = start_channel;

        loop {
            if self.channels[current].in_flight() < MAX_TASKS_IN_FLIGHT {
                return Some(current);
            }
            current = (current + 1) % self.channels.len();
            if current == start_channel {
                return None;
            }
        }
    }

    /// Publishes a new task for execution.
    ///
    /// Older queued tasks are dispatched first so work keeps its submission
    /// order when workers free up.
    ///
    /// # Returns
    /// - `true` if the task was immediately scheduled on a worker
    /// - `false` if the task was queued because all workers are busy
    pub fn publish_task(&mut self, task: Box<dyn Task + Send>) -> bool {
        self.process_queued_tasks();
        if !self.queued_tasks.is_empty() {
            self.queued_tasks.push_back(task);
            return false;
        }

        match self.find_available_channel() {
            Some(channel_idx) => match self.try_send_task(task, channel_idx) {
                Ok(_) => {
                    self.current_channel = (channel_idx + 1) % self.channels.len();
                    true
                }
                Err(task) => {
                    self.queued_tasks.push_back(task);
                    false
                }
            },
            None => {
                self.queued_tasks.push_back(task);
                false
            }
        }
    }

    /// Dispatches queued tasks, oldest first, while workers have room.
    pub fn process_queued_tasks(&mut self) {
        while let Some(channel_idx) = self.find_available_channel() {
            let Some(task) = self.queued_tasks.pop_front() else {
                return;
            };
            match self.try_send_task(task, channel_idx) {
                Ok(_) => self.current_channel = (channel_idx + 1) % self.channels.len(),
                Err(task) => {
                    // Worker is gone; keep the task and stop for this round.
                    self.queued_tasks.push_front(task);
                    return;
                }
            }
        }
    }

    /// Handles every completed task result and schedules the follow-up tasks
    /// they return.
    ///
    /// # Returns
    /// Number of results handled.
    pub fn process_completed_tasks(&mut self) -> usize {
        let mut tasks_to_queue = Vec::new();
        let mut handled = 0;
        for channel in &self.channels {
            while let Ok(result) = channel.result_receiver.try_recv() {
                handled += 1;
                tasks_to_queue.extend(result.handle_result());
            }
        }

        for task in tasks_to_queue {
            self.publish_task(task);
        }
        handled
    }

    /// Tasks waiting for a free worker.
    pub fn queued_count(&self) -> usize {
        self.queued_tasks.len()
    }

    /// Tasks handed to workers and not yet finished.
    pub fn in_flight_count(&self) -> usize {
        self.channels.iter().map(TaskChannel::in_flight).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::Sender;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    struct RecordTask {
        value: usize,
        log: Arc<Mutex<Vec<usize>>>,
        follow_up: Option<usize>,
    }

    struct RecordResult {
        log: Arc<Mutex<Vec<usize>>>,
        follow_up: Option<usize>,
    }

    impl Task for RecordTask {
        fn process(&self) -> Box<dyn TaskResult + Send> {
            self.log.lock().unwrap().push(self.value);
            Box::new(RecordResult {
                log: self.log.clone(),
                follow_up: self.follow_up,
            })
        }
    }

    impl TaskResult for RecordResult {
        fn handle_result(self: Box<Self>) -> Vec<Box<dyn Task + Send>> {
            self.follow_up
                .map(|value| {
                    Box::new(RecordTask {
                        value,
                        log: self.log.clone(),
                        follow_up: None,
                    }) as Box<dyn Task + Send>
                })
                .into_iter()
                .collect()
        }
    }

    struct SignalTask(Mutex<Sender<()>>);

    struct NoResult;

    impl TaskResult for NoResult {
        fn handle_result(self: Box<Self>) -> Vec<Box<dyn Task + Send>> {
            Vec::new()
        }
    }

    impl Task for SignalTask {
        fn process(&self) -> Box<dyn TaskResult + Send> {
            let _ = self.0.lock().unwrap().send(());
            Box::new(NoResult)
        }
    }

    fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting for workers");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn every_published_task_runs_without_draining_results() {
        let mut manager = TaskManager::new(2);
        let (tx, rx) = std::sync::mpsc::channel();
        for _ in 0..20 {
            manager.publish_task(Box::new(SignalTask(Mutex::new(tx.clone()))));
        }
        let mut received = 0;
        while received < 20 {
            manager.process_queued_tasks();
            if rx.recv_timeout(Duration::from_millis(50)).is_ok() {
                received += 1;
            }
        }
        wait_for(|| manager.in_flight_count() == 0);
        assert_eq!(manager.queued_count(), 0);
    }

    #[test]
    fn results_schedule_follow_up_tasks() {
        let mut manager = TaskManager::new(1);
        let log = Arc::new(Mutex::new(Vec::new()));
        manager.publish_task(Box::new(RecordTask {
            value: 1,
            log: log.clone(),
            follow_up: Some(2),
        }));

        wait_for(|| manager.process_completed_tasks() > 0);
        wait_for(|| log.lock().unwrap().len() == 2);
        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn zero_workers_queue_everything() {
        let mut manager = TaskManager::new(0);
        let log = Arc::new(Mutex::new(Vec::new()));
        let scheduled = manager.publish_task(Box::new(RecordTask {
            value: 1,
            log: log.clone(),
            follow_up: None,
        }));
        assert!(!scheduled);
        assert_eq!(manager.queued_count(), 1);
        assert!(log.lock().unwrap().is_empty());
    }
}
