use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use derivative::Derivative;
use tokio::{
    sync::{oneshot, RwLock},
    task::JoinHandle,
};
use tracing::{debug, warn};

pub type Pid = u64;

/// Resolves once the owning [`ProcessManager`] asks the task to stop.
#[derive(Debug)]
pub struct StopSignal(oneshot::Receiver<()>);

impl StopSignal {
    pub async fn stopped(&mut self) {
        let _ = (&mut self.0).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The task saw the stop signal and returned in time.
    Exited,
    /// The grace period ran out and the task was aborted.
    Aborted,
    NotRunning,
}

#[derive(Derivative)]
#[derivative(Debug)]
struct Process {
    name: String,
    #[derivative(Debug = "ignore")]
    handle: JoinHandle<()>,
    #[derivative(Debug = "ignore")]
    stop: Option<oneshot::Sender<()>>,
}

#[derive(Debug, Default)]
struct ProcessManagerInternal {
    processes: HashMap<Pid, Process>,
    next: Pid,
}

impl ProcessManagerInternal {
    fn add_handle<F: FnOnce(Pid) -> (JoinHandle<()>, oneshot::Sender<()>)>(
        &mut self,
        name: String,
        f: F,
    ) -> Pid {
        let pid = self.next;
        self.next += 1;
        let (handle, stop) = f(pid);
        self.processes.insert(
            pid,
            Process {
                name,
                handle,
                stop: Some(stop),
            },
        );
        pid
    }

    fn remove(&mut self, pid: Pid) -> Option<Process> {
        self.processes.remove(&pid)
    }
}

/// Tracks spawned background tasks so they can be stopped with a bounded
/// wait. Pids are never reused.
#[derive(Default, Debug, Clone)]
pub struct ProcessManager {
    internal: Arc<RwLock<ProcessManagerInternal>>,
}

impl ProcessManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add<F, Fut>(&self, name: impl Into<String>, f: F) -> Pid
    where
        F: FnOnce(Pid, StopSignal) -> Fut + Send,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let internal = self.internal.clone();
        self.internal
            .write()
            .await
            .add_handle(name.into(), move |pid| {
                let (stop_tx, stop_rx) = oneshot::channel();
                let fut = f(pid, StopSignal(stop_rx));
                let handle = tokio::spawn(async move {
                    fut.await;
                    internal.write().await.remove(pid);
                });
                (handle, stop_tx)
            })
    }

    pub async fn is_running(&self, pid: Pid) -> bool {
        self.internal.read().await.processes.contains_key(&pid)
    }

    /// Running processes as (pid, name), sorted by pid.
    pub async fn list(&self) -> Vec<(Pid, String)> {
        let mut list: Vec<_> = self
            .internal
            .read()
            .await
            .processes
            .iter()
            .map(|(pid, p)| (*pid, p.name.clone()))
            .collect();
        list.sort();
        list
    }

    /// Signals the task, waits up to `grace` for it to return and aborts it
    /// otherwise.
    pub async fn stop_process(&self, pid: Pid, grace: Duration) -> StopOutcome {
        let Some(mut process) = self.internal.write().await.remove(pid) else {
            return StopOutcome::NotRunning;
        };
        if let Some(stop) = process.stop.take() {
            let _ = stop.send(());
        }
        match tokio::time::timeout(grace, &mut process.handle).await {
            Ok(Ok(())) => {
                debug!(pid, name = %process.name, "Process exited");
                StopOutcome::Exited
            }
            Ok(Err(e)) => {
                warn!(pid, name = %process.name, "Process failed: {e}");
                StopOutcome::Exited
            }
            Err(_) => {
                warn!(pid, name = %process.name, "Process did not stop in time, aborting");
                process.handle.abort();
                let _ = process.handle.await;
                StopOutcome::Aborted
            }
        }
    }

    pub async fn stop_all(&self, grace: Duration) {
        let pids: Vec<_> = self.list().await.into_iter().map(|(pid, _)| pid).collect();
        for pid in pids {
            self.stop_process(pid, grace).await;
        }
    }
}
