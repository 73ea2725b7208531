//! Serialized write actor: every mutation runs on one dedicated thread,
//! each job wrapped in an immediate transaction.

use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sqlite::SqliteConnection;
use tokio::sync::{mpsc, oneshot};

use ledgerbook_core::errors::{Error, Result};

use crate::errors::StorageError;

type WriteJob = Box<dyn FnOnce(&mut SqliteConnection) + Send>;

/// Cloneable handle to the write actor. Jobs run strictly in submission
/// order, each inside its own immediate transaction.
#[derive(Clone)]
pub struct WriteHandle {
    jobs: mpsc::UnboundedSender<WriteJob>,
}

/// Transaction-scope error: either the job's domain error or a database
/// error raised by the transaction machinery itself.
enum TxError {
    Job(Error),
    Db(diesel::result::Error),
}

impl From<diesel::result::Error> for TxError {
    fn from(err: diesel::result::Error) -> Self {
        TxError::Db(err)
    }
}

impl WriteHandle {
    /// Run `job` on the writer thread. A job error rolls the transaction
    /// back before it is returned to the caller.
    pub async fn exec<R, F>(&self, job: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<R> + Send + 'static,
    {
        let (reply, receive) = oneshot::channel();
        let wrapped: WriteJob = Box::new(move |conn| {
            let outcome =
                conn.immediate_transaction::<R, TxError, _>(|tx| job(tx).map_err(TxError::Job));
            let result = outcome.map_err(|err| match err {
                TxError::Job(err) => err,
                TxError::Db(err) => StorageError::from(err).into(),
            });
            let _ = reply.send(result);
        });

        self.jobs
            .send(wrapped)
            .map_err(|_| StorageError::WriterGone("write actor has stopped".to_string()))?;
        receive
            .await
            .map_err(|_| StorageError::WriterGone("write actor dropped the job".to_string()))?
    }
}

/// Spawn the writer thread for a pool.
pub fn spawn_writer(pool: Pool<ConnectionManager<SqliteConnection>>) -> WriteHandle {
    let (jobs, mut queue) = mpsc::unbounded_channel::<WriteJob>();

    std::thread::Builder::new()
        .name("ledgerbook-db-writer".to_string())
        .spawn(move || {
            while let Some(job) = queue.blocking_recv() {
                match pool.get() {
                    Ok(mut conn) => job(&mut conn),
                    Err(err) => {
                        // The job's reply channel is dropped with it; the
                        // caller observes a WriterGone error.
                        log::error!("Write actor could not acquire a connection: {err}");
                    }
                }
            }
        })
        .expect("Failed to spawn database writer thread");

    WriteHandle { jobs }
}
