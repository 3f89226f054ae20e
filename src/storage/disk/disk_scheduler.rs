use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{trace, warn};

use crate::common::{PageId, Result, StorageError, PAGE_SIZE};

use super::DiskManager;

/// Page-sized buffer moved between the caller and the worker thread.
pub type PageBuf = Box<[u8; PAGE_SIZE]>;

/// What the worker should do with a request's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskOp {
    Read,
    Write,
}

/// A disk I/O request. The buffer travels with the request and comes back
/// through the reply channel once the operation completes.
pub struct DiskRequest {
    pub op: DiskOp,
    pub page_id: PageId,
    pub data: PageBuf,
    /// Receives the buffer and the operation's outcome
    pub reply: Sender<(PageBuf, Result<()>)>,
}

/// DiskScheduler owns a background worker thread that serves page reads and
/// writes for the buffer pool.
pub struct DiskScheduler {
    disk_manager: Arc<DiskManager>,
    request_sender: Sender<DiskRequest>,
    shutdown: Arc<AtomicBool>,
    worker_handle: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Creates a new DiskScheduler and spawns its worker thread.
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (sender, receiver) = bounded::<DiskRequest>(128);
        let shutdown = Arc::new(AtomicBool::new(false));

        let dm_clone = Arc::clone(&disk_manager);
        let shutdown_clone = Arc::clone(&shutdown);

        let worker_handle = thread::spawn(move || {
            Self::start_worker_thread(dm_clone, receiver, shutdown_clone);
        });

        Self {
            disk_manager,
            request_sender: sender,
            shutdown,
            worker_handle: Some(worker_handle),
        }
    }

    /// Queues a request for the worker thread.
    pub fn schedule(&self, request: DiskRequest) -> Result<()> {
        self.request_sender
            .send(request)
            .map_err(|e| StorageError::DiskScheduler(format!("failed to schedule request: {}", e)))
    }

    /// Reads `page_id` into `data` and waits for completion.
    pub fn schedule_read_sync(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);
        let buf = self.round_trip(DiskOp::Read, page_id, Box::new([0u8; PAGE_SIZE]))?;
        data.copy_from_slice(&buf[..]);
        Ok(())
    }

    /// Writes `data` to `page_id` and waits for completion.
    pub fn schedule_write_sync(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);
        let mut buf: PageBuf = Box::new([0u8; PAGE_SIZE]);
        buf.copy_from_slice(data);
        self.round_trip(DiskOp::Write, page_id, buf)?;
        Ok(())
    }

    fn round_trip(&self, op: DiskOp, page_id: PageId, data: PageBuf) -> Result<PageBuf> {
        let (tx, rx) = bounded(1);
        self.schedule(DiskRequest {
            op,
            page_id,
            data,
            reply: tx,
        })?;

        let (buf, outcome) = rx.recv().map_err(|e| {
            StorageError::DiskScheduler(format!("failed to receive completion: {}", e))
        })?;
        outcome.map(|()| buf)
    }

    fn start_worker_thread(
        disk_manager: Arc<DiskManager>,
        receiver: Receiver<DiskRequest>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                // Drain remaining requests before exiting
                while let Ok(request) = receiver.try_recv() {
                    Self::process_request(&disk_manager, request);
                }
                break;
            }

            match receiver.recv_timeout(Duration::from_millis(100)) {
                Ok(request) => Self::process_request(&disk_manager, request),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn process_request(disk_manager: &DiskManager, request: DiskRequest) {
        let DiskRequest {
            op,
            page_id,
            mut data,
            reply,
        } = request;

        trace!("disk {:?} of {}", op, page_id);
        let outcome = match op {
            DiskOp::Read => disk_manager.read_page(page_id, &mut data[..]),
            DiskOp::Write => disk_manager.write_page(page_id, &data[..]),
        };
        if let Err(e) = &outcome {
            warn!("disk {:?} of {} failed: {}", op, page_id, e);
        }

        let _ = reply.send((data, outcome));
    }

    /// Returns the underlying DiskManager.
    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}
