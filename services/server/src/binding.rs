use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;

use crate::repo::display_screens::{self, DisplayScreenRow};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BindError {
    #[error("token not found or screen inactive")]
    ScreenUnknown,
    #[error("screen is bound to a different device")]
    ScreenBound,
    #[error("device id is required")]
    DeviceRequired,
}

/// The slice of `DisplayScreen` persistence `bind_atomic` needs, abstracted
/// so the race-resolution logic below can be unit-tested against an
/// in-memory double instead of requiring a live Postgres instance for
/// every test run.
#[async_trait]
pub trait DisplayScreenStore: Send + Sync {
    async fn find_active_by_token(&self, token: &str) -> Result<Option<DisplayScreenRow>, BindError>;
    async fn find_by_id(&self, id: i64) -> Result<Option<DisplayScreenRow>, BindError>;
    /// Conditional `UPDATE ... WHERE bound_device_id IS NULL`; returns the
    /// number of rows touched (0 or 1).
    async fn bind_if_unbound(&self, id: i64, device_id: &str) -> Result<u64, BindError>;
}

pub struct PgDisplayScreenStore {
    pool: PgPool,
}

impl PgDisplayScreenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DisplayScreenStore for PgDisplayScreenStore {
    async fn find_active_by_token(&self, token: &str) -> Result<Option<DisplayScreenRow>, BindError> {
        display_screens::find_active_by_token(&self.pool, token)
            .await
            .map_err(|_| BindError::ScreenUnknown)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<DisplayScreenRow>, BindError> {
        display_screens::find_by_id(&self.pool, id)
            .await
            .map_err(|_| BindError::ScreenUnknown)
    }

    async fn bind_if_unbound(&self, id: i64, device_id: &str) -> Result<u64, BindError> {
        display_screens::bind_if_unbound(&self.pool, id, device_id)
            .await
            .map_err(|_| BindError::ScreenUnknown)
    }
}

/// Enforces one-device-per-token under concurrency, per `spec.md` §4.7.
/// Holds no lock across a request boundary: the conditional `UPDATE ...
/// WHERE bound_device_id IS NULL` is itself the atomic operation, so two
/// concurrent binders racing for the same token see at most one success at
/// the database's own row-level consistency, not at this function's.
pub async fn bind_atomic(
    store: &dyn DisplayScreenStore,
    token: &str,
    device_id: &str,
    allow_multi_device: bool,
) -> Result<DisplayScreenRow, BindError> {
    if device_id.is_empty() {
        return Err(BindError::DeviceRequired);
    }

    let screen = store
        .find_active_by_token(token)
        .await?
        .ok_or(BindError::ScreenUnknown)?;

    if screen.bound_device_id.as_deref() == Some(device_id) {
        return Ok(screen);
    }

    if let Some(existing) = &screen.bound_device_id {
        if existing != device_id && !allow_multi_device {
            return Err(BindError::ScreenBound);
        }
        if allow_multi_device {
            return Ok(screen);
        }
    }

    let affected = store.bind_if_unbound(screen.id, device_id).await?;

    if affected == 1 {
        return store
            .find_by_id(screen.id)
            .await?
            .ok_or(BindError::ScreenUnknown);
    }

    // Lost the race: re-read and check who won.
    let refreshed = store.find_by_id(screen.id).await?.ok_or(BindError::ScreenUnknown)?;

    if refreshed.bound_device_id.as_deref() == Some(device_id) {
        Ok(refreshed)
    } else {
        Err(BindError::ScreenBound)
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::Barrier;

    /// An in-process double guarding the same race the real Postgres
    /// conditional `UPDATE` resolves, so `bind_atomic`'s contract can be
    /// exercised without a database.
    pub struct InMemoryDisplayScreenStore {
        screens: Mutex<Vec<DisplayScreenRow>>,
    }

    impl InMemoryDisplayScreenStore {
        pub fn with_screen(screen: DisplayScreenRow) -> Self {
            Self {
                screens: Mutex::new(vec![screen]),
            }
        }
    }

    #[async_trait]
    impl DisplayScreenStore for InMemoryDisplayScreenStore {
        async fn find_active_by_token(
            &self,
            token: &str,
        ) -> Result<Option<DisplayScreenRow>, BindError> {
            Ok(self
                .screens
                .lock()
                .unwrap()
                .iter()
                .find(|s| s.token == token && s.is_active)
                .cloned())
        }

        async fn find_by_id(&self, id: i64) -> Result<Option<DisplayScreenRow>, BindError> {
            Ok(self.screens.lock().unwrap().iter().find(|s| s.id == id).cloned())
        }

        async fn bind_if_unbound(&self, id: i64, device_id: &str) -> Result<u64, BindError> {
            let mut screens = self.screens.lock().unwrap();
            let Some(screen) = screens.iter_mut().find(|s| s.id == id) else {
                return Ok(0);
            };
            if screen.bound_device_id.is_some() {
                return Ok(0);
            }
            screen.bound_device_id = Some(device_id.to_owned());
            screen.bound_at = Some(chrono::Utc::now());
            Ok(1)
        }
    }

    pub fn fresh_screen(token: &str, school_id: i64) -> DisplayScreenRow {
        DisplayScreenRow {
            id: 1,
            token: token.to_owned(),
            school_id,
            bound_device_id: None,
            bound_at: None,
            is_active: true,
        }
    }

    pub struct GatedStore {
        inner: InMemoryDisplayScreenStore,
        barrier: Barrier,
    }

    impl GatedStore {
        pub fn new(screen: DisplayScreenRow, parties: usize) -> Self {
            Self {
                inner: InMemoryDisplayScreenStore::with_screen(screen),
                barrier: Barrier::new(parties),
            }
        }
    }

    #[async_trait]
    impl DisplayScreenStore for GatedStore {
        async fn find_active_by_token(
            &self,
            token: &str,
        ) -> Result<Option<DisplayScreenRow>, BindError> {
            self.inner.find_active_by_token(token).await
        }

        async fn find_by_id(&self, id: i64) -> Result<Option<DisplayScreenRow>, BindError> {
            self.inner.find_by_id(id).await
        }

        async fn bind_if_unbound(&self, id: i64, device_id: &str) -> Result<u64, BindError> {
            // Force both racers to attempt the conditional update at
            // roughly the same instant, so the test exercises the actual
            // interleaving rather than two sequential calls.
            self.barrier.wait().await;
            self.inner.bind_if_unbound(id, device_id).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn device_required_short_circuits_before_any_lookup() {
        let store = InMemoryDisplayScreenStore::with_screen(fresh_screen("tk", 1));
        let result = bind_atomic(&store, "tk", "", false).await;
        assert_eq!(result.unwrap_err(), BindError::DeviceRequired);
    }

    #[tokio::test]
    async fn unknown_token_is_rejected() {
        let store = InMemoryDisplayScreenStore::with_screen(fresh_screen("tk", 1));
        let result = bind_atomic(&store, "other-token", "d1", false).await;
        assert_eq!(result.unwrap_err(), BindError::ScreenUnknown);
    }

    #[tokio::test]
    async fn first_bind_on_an_unbound_screen_succeeds_and_is_idempotent_for_the_winner() {
        let store = InMemoryDisplayScreenStore::with_screen(fresh_screen("tk", 1));
        let first = bind_atomic(&store, "tk", "d1", false).await.unwrap();
        assert_eq!(first.bound_device_id.as_deref(), Some("d1"));

        let second = bind_atomic(&store, "tk", "d1", false).await.unwrap();
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn a_different_device_is_rejected_once_bound() {
        let store = InMemoryDisplayScreenStore::with_screen(fresh_screen("tk", 1));
        bind_atomic(&store, "tk", "d1", false).await.unwrap();
        let result = bind_atomic(&store, "tk", "d2", false).await;
        assert_eq!(result.unwrap_err(), BindError::ScreenBound);
    }

    #[tokio::test]
    async fn allow_multi_device_bypasses_the_mismatch_without_changing_ownership() {
        let store = InMemoryDisplayScreenStore::with_screen(fresh_screen("tk", 1));
        bind_atomic(&store, "tk", "d1", false).await.unwrap();
        let result = bind_atomic(&store, "tk", "d2", true).await.unwrap();
        assert_eq!(result.bound_device_id.as_deref(), Some("d1"));
    }

    #[tokio::test]
    async fn concurrent_binds_from_different_devices_resolve_to_exactly_one_winner() {
        let store = Arc::new(GatedStore::new(fresh_screen("tk", 1), 2));

        let a = {
            let store = store.clone();
            tokio::spawn(async move { bind_atomic(store.as_ref(), "tk", "da", false).await })
        };
        let b = {
            let store = store.clone();
            tokio::spawn(async move { bind_atomic(store.as_ref(), "tk", "db", false).await })
        };

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
        let failures = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(BindError::ScreenBound)))
            .count();
        assert_eq!(successes, 1);
        assert_eq!(failures, 1);
    }
}
