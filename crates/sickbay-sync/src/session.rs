//! Who the current user is. Authentication itself happens elsewhere; the
//! sync layer only needs the signed-in subject id.

use std::sync::{Arc, PoisonError, RwLock};

use uuid::Uuid;

pub trait SessionProvider: Send + Sync {
  /// The signed-in subject, or `None` when nobody is signed in.
  fn current_subject(&self) -> Option<Uuid>;
}

/// A session fixed for the lifetime of the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticSession(pub Option<Uuid>);

impl StaticSession {
  pub fn signed_in(subject_id: Uuid) -> Self { Self(Some(subject_id)) }

  pub fn anonymous() -> Self { Self(None) }
}

impl SessionProvider for StaticSession {
  fn current_subject(&self) -> Option<Uuid> { self.0 }
}

/// A session that can change while the dashboard is mounted.
///
/// Views read the subject on every refetch; call
/// [`crate::Dashboard::session_changed`] after signing in or out.
#[derive(Debug, Clone, Default)]
pub struct SharedSession {
  subject: Arc<RwLock<Option<Uuid>>>,
}

impl SharedSession {
  pub fn new() -> Self { Self::default() }

  pub fn sign_in(&self, subject_id: Uuid) {
    *self.subject.write().unwrap_or_else(PoisonError::into_inner) = Some(subject_id);
    tracing::info!(%subject_id, "signed in");
  }

  pub fn sign_out(&self) {
    if let Some(subject_id) = self.subject.write().unwrap_or_else(PoisonError::into_inner).take() {
      tracing::info!(%subject_id, "signed out");
    }
  }
}

impl SessionProvider for SharedSession {
  fn current_subject(&self) -> Option<Uuid> {
    *self.subject.read().unwrap_or_else(PoisonError::into_inner)
  }
}

impl<P: SessionProvider + ?Sized> SessionProvider for Arc<P> {
  fn current_subject(&self) -> Option<Uuid> { (**self).current_subject() }
}
