use std::future::Future;
use std::pin::Pin;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Waker};
use std::thread::JoinHandle;

use log::warn;

use crate::common::config::PageId;
use crate::storage::disk::manager::DiskManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IoStatus {
    Pending,
    Success,
    Failed,
}

struct IoState {
    status: Mutex<IoStatus>,
    cond: Condvar,
    waker: Mutex<Option<Waker>>,
}

/// Completion handle for a scheduled disk request. The worker resolves it
/// exactly once; callers either block on [`IoFuture::wait`] or `.await` it.
pub struct IoFuture {
    state: Arc<IoState>,
}

/// Worker-side half of an [`IoFuture`].
pub struct IoPromise {
    state: Arc<IoState>,
}

impl IoFuture {
    fn new() -> Self {
        Self {
            state: Arc::new(IoState {
                status: Mutex::new(IoStatus::Pending),
                cond: Condvar::new(),
                waker: Mutex::new(None),
            }),
        }
    }

    pub fn promise(&self) -> IoPromise {
        IoPromise {
            state: Arc::clone(&self.state),
        }
    }

    /// Blocks the calling thread until the request completes.
    pub fn wait(&self) -> bool {
        let mut status = self.state.status.lock().unwrap();
        while *status == IoStatus::Pending {
            status = self.state.cond.wait(status).unwrap();
        }
        *status == IoStatus::Success
    }
}

impl IoPromise {
    pub fn complete(&self, success: bool) {
        {
            let mut status = self.state.status.lock().unwrap();
            *status = if success {
                IoStatus::Success
            } else {
                IoStatus::Failed
            };
        }
        self.state.cond.notify_all();
        if let Some(waker) = self.state.waker.lock().unwrap().take() {
            waker.wake();
        }
    }
}

impl Future for IoFuture {
    type Output = bool;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let status = *self.state.status.lock().unwrap();
        match status {
            IoStatus::Success => Poll::Ready(true),
            IoStatus::Failed => Poll::Ready(false),
            IoStatus::Pending => {
                let mut waker = self.state.waker.lock().unwrap();
                *waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

pub enum DiskData {
    /// Bytes to persist. The buffer is moved into the request.
    Write(Box<[u8]>),
    /// Shared buffer the worker fills in.
    Read(Arc<Mutex<Box<[u8]>>>),
}

pub struct DiskRequest {
    pub page_id: PageId,
    pub data: DiskData,
    pub done: IoPromise,
}

/// Queues page-sized I/O requests and drains them on a dedicated worker
/// thread. Each request is completed through its promise; a failed request
/// never crashes the worker.
pub struct DiskScheduler {
    queue: Option<Sender<DiskRequest>>,
    worker: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    pub fn new(manager: Arc<Mutex<DiskManager>>) -> Self {
        let (tx, rx) = mpsc::channel();
        let worker = std::thread::spawn(move || Self::worker_loop(manager, rx));
        Self {
            queue: Some(tx),
            worker: Some(worker),
        }
    }

    pub fn create_future(&self) -> IoFuture {
        IoFuture::new()
    }

    pub fn schedule(&self, request: DiskRequest) {
        self.queue
            .as_ref()
            .expect("scheduler queue is open until drop")
            .send(request)
            .expect("disk worker is alive until drop");
    }

    fn worker_loop(manager: Arc<Mutex<DiskManager>>, rx: Receiver<DiskRequest>) {
        while let Ok(request) = rx.recv() {
            let mut manager_guard = manager.lock().unwrap();
            let outcome = match &request.data {
                DiskData::Write(data) => manager_guard.write_page(request.page_id, data),
                DiskData::Read(buffer) => {
                    let mut buffer_guard = buffer.lock().unwrap();
                    manager_guard.read_page(request.page_id, &mut buffer_guard)
                }
            };
            drop(manager_guard);

            if let Err(err) = &outcome {
                warn!("disk request for page {} failed: {err}", request.page_id);
            }
            request.done.complete(outcome.is_ok());
        }
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain what is queued and exit.
        drop(self.queue.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
