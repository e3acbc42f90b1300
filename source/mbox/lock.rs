//! Advisory whole-file locking held for a [`super::Mailbox`]'s entire lifetime. A lock acquired
//! only around individual mutating calls protects against nothing once that call returns: another
//! process could open the same mbox file in between and race the next one.

use std::fs;

enum Guard {
  Shared(fd_lock::RwLockReadGuard<'static, fs::File>),
  Exclusive(fd_lock::RwLockWriteGuard<'static, fs::File>),
}

/// Owns a cloned file descriptor and an advisory lock on it. The `fd_lock::RwLock` is boxed so its
/// address stays put even if `FileLock` itself is moved; the guard borrows from that fixed
/// address, not from `FileLock`, which is what lets the guard live as long as the struct that holds
/// it rather than just a single call.
pub struct FileLock {
  lock: Box<fd_lock::RwLock<fs::File>>,
  guard: Option<Guard>,
}

impl FileLock {
  /// Shared for read-only opens, exclusive otherwise.
  pub fn acquire(file: &fs::File, exclusive: bool) -> std::io::Result<FileLock> {
    let mut lock = Box::new(fd_lock::RwLock::new(file.try_clone()?));
    let guard = if exclusive {
      let guard = lock.write()?;
      // SAFETY: `guard` borrows `*lock`, which lives on the heap behind `lock` and never moves,
      // even when the `Box` itself does. The extended borrow is cleared by `Drop` below before
      // `lock` can be dropped, so it never outlives the allocation it points into.
      let guard: fd_lock::RwLockWriteGuard<'static, fs::File> = unsafe { std::mem::transmute(guard) };
      Guard::Exclusive(guard)
    } else {
      let guard = lock.read()?;
      let guard: fd_lock::RwLockReadGuard<'static, fs::File> = unsafe { std::mem::transmute(guard) };
      Guard::Shared(guard)
    };
    Ok(FileLock { lock, guard: Some(guard) })
  }
}

impl Drop for FileLock {
  fn drop(&mut self) {
    // Drop the guard (releasing the OS lock) before `lock`'s box can be freed.
    self.guard = None;
  }
}
