use core::future::Future;
use core::pin::Pin;

/// A dynamically typed, boxed, sendable future.
pub type DynFut<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Block until the [future](Future) is completed and returns the result.
pub fn block_on<O>(fut: impl Future<Output = O>) -> O {
    futures_lite::future::block_on(fut)
}
