use core::future::Future;

/// Read a future synchronously.
///
/// Panics if the current platform cannot block on a future. If you want to
/// handle this case, use [try_read_sync] instead.
pub fn read_sync<F: Future<Output = T>, T>(f: F) -> T {
    try_read_sync(f).expect(
        "Failed to read data synchronously. This can happen on platforms that don't support blocking futures. If possible, try using an async variant of this function instead.",
    )
}

/// Read a future synchronously, returning `None` where blocking is
/// unsupported.
pub fn try_read_sync<F: Future<Output = T>, T>(f: F) -> Option<T> {
    Some(super::future::block_on(f))
}
