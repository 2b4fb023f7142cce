//! courier-services — client session and message-delivery registry.
//!
//! `Authenticate` maps secret tokens to sessions and login names to subjects,
//! `SubjectInfo` routes point-to-point messages with store-and-forward, and
//! `SessionInfo` owns a callback queue, a delivery pipe and an expiry timer.
//! The remaining modules are the collaborators they call through traits.

pub mod authenticate;
pub mod dispatch;
pub mod error;
pub mod error_handler;
pub mod events;
pub mod queue;
pub mod security;
pub mod session;
pub mod snapshot;
pub mod subject;
pub mod subscription;
pub mod timer;

pub use authenticate::{Authenticate, Collaborators};
pub use error::{QueueError, RegistryError, SecurityError};
pub use events::{ClientEvent, ClientEventKind, ClientListener};
pub use session::SessionInfo;
pub use snapshot::{RegistrySnapshot, SessionSnapshot, SubjectSnapshot};
pub use subject::{Routed, SubjectInfo};
pub use timer::TimerService;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock, recovering from poisoning. Every critical section leaves its data consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
