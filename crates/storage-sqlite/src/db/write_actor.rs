use std::any::Any;
use std::sync::Arc;

use diesel::SqliteConnection;
use entity_events_core::errors::{DatabaseError, Error, Result};
use entity_events_core::{Interceptor, UnitOfWork};
use log::{debug, error, info};
use tokio::sync::{mpsc, oneshot};

use super::{get_connection, DbPool, TrackedConnection};
use crate::errors::StorageError;

// Type alias for the job to be executed by the writer actor.
// It takes the tracked connection for the open transaction and returns a Result.
type Job<T> = Box<dyn FnOnce(&mut TrackedConnection<'_>) -> Result<T> + Send + 'static>;

// The Box<dyn Any + Send> is used for type erasure of the job's return type.
type ErasedJob = Job<Box<dyn Any + Send + 'static>>;
type Reply = oneshot::Sender<Result<Box<dyn Any + Send + 'static>>>;

/// Bound of the job queue; senders wait when the writer falls this far behind.
const QUEUE_CAPACITY: usize = 1024;

/// Handle for sending jobs to the writer actor.
#[derive(Clone)]
pub struct WriteHandle {
    tx: mpsc::Sender<(ErasedJob, Reply)>,
}

impl WriteHandle {
    /// Executes a write job on the writer actor's dedicated connection.
    ///
    /// The job runs inside an immediate SQLite transaction wrapped in a unit of
    /// work. Whatever the job reports through the [`TrackedConnection`] is
    /// fired as change events once the transaction commits, and discarded if
    /// the job fails and the transaction rolls back.
    ///
    /// # Returns
    /// A `Result<T>` containing the outcome of the job.
    pub async fn exec<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut TrackedConnection<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        // Create a oneshot channel for receiving the result from the actor.
        let (ret_tx, ret_rx) = oneshot::channel();

        let erased: ErasedJob = Box::new(move |c: &mut TrackedConnection<'_>| {
            job(c).map(|v| Box::new(v) as Box<dyn Any + Send>)
        });

        self.tx.send((erased, ret_tx)).await.map_err(|_| {
            DatabaseError::WriterUnavailable("writer actor stopped accepting jobs".to_string())
        })?;

        let boxed = ret_rx.await.map_err(|_| {
            DatabaseError::WriterUnavailable("writer actor dropped the reply".to_string())
        })??;

        boxed
            .downcast::<T>()
            .map(|v| *v)
            .map_err(|_| Error::Unexpected("writer actor returned an unexpected type".to_string()))
    }
}

/// Spawns a background Tokio task that acts as a single writer to the database.
/// This actor owns one database connection from the pool and processes write
/// jobs serially, each in its own transaction and unit of work.
///
/// Must be called from within a Tokio runtime.
pub fn spawn_writer(pool: Arc<DbPool>, interceptor: Arc<dyn Interceptor>) -> Result<WriteHandle> {
    // This connection will be held for the lifetime of the actor.
    let mut conn = get_connection(&pool)?;
    let (tx, mut rx) = mpsc::channel::<(ErasedJob, Reply)>(QUEUE_CAPACITY);

    tokio::spawn(async move {
        info!("Writer actor started");
        while let Some((job, reply_tx)) = rx.recv().await {
            let result = run_job(&mut conn, interceptor.as_ref(), job);

            // Ignore error if the receiver has dropped (e.g., request timed out or was cancelled).
            let _ = reply_tx.send(result);
        }
        // All WriteHandles were dropped.
        info!("Writer actor stopped");
    });

    Ok(WriteHandle { tx })
}

/// Runs one job between unit-of-work begin and completion.
///
/// Kept synchronous so begin, the job's callbacks and completion all happen on
/// the same thread.
fn run_job(
    conn: &mut SqliteConnection,
    interceptor: &dyn Interceptor,
    job: ErasedJob,
) -> Result<Box<dyn Any + Send + 'static>> {
    let uow = UnitOfWork::begin(interceptor);

    let result = conn
        .immediate_transaction::<_, StorageError, _>(|c| {
            let mut tracked = TrackedConnection::new(c, interceptor);
            job(&mut tracked).map_err(StorageError::from)
        })
        .map_err(Error::from);

    match result {
        Ok(value) => {
            // The write is durable at this point; a dispatch failure must not
            // turn it into an error for the caller.
            if let Err(e) = uow.commit() {
                error!("Write committed but change dispatch failed: {}", e);
            }
            Ok(value)
        }
        Err(e) => {
            debug!("Write job failed, transaction rolled back: {}", e);
            if let Err(rollback_err) = uow.rollback() {
                error!(
                    "Write rolled back but unit of work completion failed: {}",
                    rollback_err
                );
            }
            Err(e)
        }
    }
}
