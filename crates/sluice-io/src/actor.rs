//! The filesystem actor.
//!
//! A single blocking task owns the [`Storage`] backend and serves requests in
//! arrival order. Operators never touch the filesystem themselves: they hold
//! an [`FsHandle`], issue a request, and get the answer back on a oneshot
//! channel. Anything that needs the answer later (a loader waiting for bytes)
//! spawns the request as a future and is woken when it completes.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::storage::Storage;

/// Queue depth between handles and the actor.
const REQUEST_QUEUE: usize = 64;

enum Request {
    Write {
        path: String,
        bytes: Bytes,
        reply: oneshot::Sender<Result<()>>,
    },
    Read {
        path: String,
        reply: oneshot::Sender<Result<Bytes>>,
    },
    Erase {
        path: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Move {
        from: String,
        to: String,
        reply: oneshot::Sender<Result<()>>,
    },
    List {
        prefix: String,
        reply: oneshot::Sender<Result<Vec<String>>>,
    },
}

pub struct FilesystemActor {
    storage: Box<dyn Storage>,
    rx: mpsc::Receiver<Request>,
}

impl FilesystemActor {
    /// Start the actor on the blocking pool. It exits once every handle has
    /// been dropped. Must be called from within a tokio runtime.
    pub fn spawn(storage: Box<dyn Storage>) -> (FsHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE);
        let actor = FilesystemActor { storage, rx };
        let join = tokio::task::spawn_blocking(move || actor.run());
        (FsHandle { tx }, join)
    }

    fn run(mut self) {
        debug!("filesystem actor started");
        while let Some(req) = self.rx.blocking_recv() {
            self.serve(req);
        }
        debug!("filesystem actor stopped");
    }

    // A dropped reply receiver means the requester gave up (cancelled or
    // timed out); the result is discarded.
    fn serve(&self, req: Request) {
        match req {
            Request::Write { path, bytes, reply } => {
                trace!(%path, len = bytes.len(), "fs write");
                let _ = reply.send(self.storage.write(&path, &bytes));
            }
            Request::Read { path, reply } => {
                trace!(%path, "fs read");
                let _ = reply.send(self.storage.read(&path).map(Bytes::from));
            }
            Request::Erase { path, reply } => {
                trace!(%path, "fs erase");
                let _ = reply.send(self.storage.delete(&path));
            }
            Request::Move { from, to, reply } => {
                trace!(%from, %to, "fs move");
                let _ = reply.send(self.storage.rename(&from, &to));
            }
            Request::List { prefix, reply } => {
                trace!(%prefix, "fs list");
                let _ = reply.send(self.storage.list(&prefix));
            }
        }
    }
}

/// Cloneable request handle to a [`FilesystemActor`].
#[derive(Clone, Debug)]
pub struct FsHandle {
    tx: mpsc::Sender<Request>,
}

impl FsHandle {
    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> Request,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| Error::ActorClosed)?;
        rx.await.map_err(|_| Error::ActorClosed)?
    }

    pub async fn write(&self, path: impl Into<String>, bytes: impl Into<Bytes>) -> Result<()> {
        let (path, bytes) = (path.into(), bytes.into());
        self.call(|reply| Request::Write { path, bytes, reply }).await
    }

    pub async fn read(&self, path: impl Into<String>) -> Result<Bytes> {
        let path = path.into();
        self.call(|reply| Request::Read { path, reply }).await
    }

    /// Recursive and idempotent.
    pub async fn erase(&self, path: impl Into<String>) -> Result<()> {
        let path = path.into();
        self.call(|reply| Request::Erase { path, reply }).await
    }

    pub async fn move_path(&self, from: impl Into<String>, to: impl Into<String>) -> Result<()> {
        let (from, to) = (from.into(), to.into());
        self.call(|reply| Request::Move { from, to, reply }).await
    }

    pub async fn list(&self, prefix: impl Into<String>) -> Result<Vec<String>> {
        let prefix = prefix.into();
        self.call(|reply| Request::List { prefix, reply }).await
    }
}
