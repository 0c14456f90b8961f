//! Future-returning wrappers around the callback API.
//!
//! Each `*_async` call submits immediately; the returned [`Pending`] resolves
//! when the completion callback runs. Dropping it does not cancel anything.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::backend::Stats;
use crate::error::{Error, Result};
use crate::storage::Storage;

/// Result of a submitted operation. Resolves to `Abandoned` if the request
/// is dropped without ever completing.
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct Pending<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Pending<T> {
    fn channel() -> (oneshot::Sender<Result<T>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    fn settled(result: Result<T>) -> Self {
        let (tx, pending) = Self::channel();
        let _ = tx.send(result);
        pending
    }

    fn or_failed(self, submitted: Result<()>) -> Self {
        match submitted {
            Ok(()) => self,
            Err(err) => Self::settled(Err(err)),
        }
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Abandoned)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Storage {
    pub fn open_async(&self) -> Pending<()> {
        let (tx, pending) = Pending::channel();
        let submitted = self.open(move |_, result| {
            let _ = tx.send(result);
        });
        pending.or_failed(submitted)
    }

    pub fn read_async(&self, offset: u64, size: usize) -> Pending<Vec<u8>> {
        let (tx, pending) = Pending::channel();
        let submitted = self.read(offset, size, move |_, result| {
            let _ = tx.send(result.map(<[u8]>::to_vec));
        });
        pending.or_failed(submitted)
    }

    pub fn write_async(&self, offset: u64, data: &[u8]) -> Pending<()> {
        let (tx, pending) = Pending::channel();
        let submitted = self.write(offset, data, move |_, result| {
            let _ = tx.send(result);
        });
        pending.or_failed(submitted)
    }

    pub fn delete_async(&self, offset: u64, size: usize) -> Pending<()> {
        let (tx, pending) = Pending::channel();
        let submitted = self.delete(offset, size, move |_, result| {
            let _ = tx.send(result);
        });
        pending.or_failed(submitted)
    }

    pub fn stat_async(&self) -> Pending<Stats> {
        let (tx, pending) = Pending::channel();
        let submitted = self.stat(move |_, result| {
            let _ = tx.send(result.cloned());
        });
        pending.or_failed(submitted)
    }

    pub fn close_async(&self) -> Pending<()> {
        let (tx, pending) = Pending::channel();
        let submitted = self.close(move |_, result| {
            let _ = tx.send(result);
        });
        pending.or_failed(submitted)
    }

    pub fn destroy_async(&self) -> Pending<()> {
        let (tx, pending) = Pending::channel();
        let submitted = self.destroy(move |_, result| {
            let _ = tx.send(result);
        });
        pending.or_failed(submitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn settled_resolves_at_once() {
        let pending: Pending<u8> = Pending::settled(Err(Error::NotReady));
        assert_eq!(pending.await, Err(Error::NotReady));
    }

    #[tokio::test]
    async fn dropped_sender_is_abandoned() {
        let (tx, pending) = Pending::<()>::channel();
        drop(tx);
        assert_eq!(pending.await, Err(Error::Abandoned));
    }
}
