//! Request authorization.
//!
//! An [`AuthHeaders`] implementation supplies headers for every API call.
//! [`SessionHandle`] is an explicitly shared session object; callers pass
//! the same `Arc<SessionHandle>` to every client that needs it.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytelift_transfer::ExclusiveLock;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};

use crate::error::UploadError;

/// Header carrying a session access token.
pub const AUTHORIZATION_TOKEN: HeaderName = HeaderName::from_static("authorization-token");

pub type HeadersFuture<'a> =
    Pin<Box<dyn Future<Output = Result<HeaderMap, UploadError>> + Send + 'a>>;

/// Supplies authorization headers for API requests.
pub trait AuthHeaders: Send + Sync {
    fn headers(&self) -> HeadersFuture<'_>;
}

// ---------------------------------------------------------------------------
// ApiKeyAuth
// ---------------------------------------------------------------------------

/// `Authorization: Bearer <key>`.
#[derive(Clone)]
pub struct ApiKeyAuth {
    value: HeaderValue,
}

impl ApiKeyAuth {
    pub fn new(api_key: &str) -> Result<Self, UploadError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| UploadError::Auth("API key contains invalid characters".into()))?;
        value.set_sensitive(true);
        Ok(Self { value })
    }
}

impl fmt::Debug for ApiKeyAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKeyAuth(..)")
    }
}

impl AuthHeaders for ApiKeyAuth {
    fn headers(&self) -> HeadersFuture<'_> {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, self.value.clone());
        Box::pin(async move { Ok(headers) })
    }
}

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

/// An access-token session shared between clients.
///
/// Every operation runs under one [`ExclusiveLock`], so a refresh never
/// interleaves with a concurrent begin or end.
#[derive(Default)]
pub struct SessionHandle {
    lock: ExclusiveLock,
    token: Mutex<Option<HeaderValue>>,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a session. Fails if one is already active.
    pub async fn begin_session(&self, access_token: &str) -> Result<(), UploadError> {
        let value = token_header(access_token)?;
        self.lock
            .run_exclusive(|| async {
                let mut token = self.token_slot();
                if token.is_some() {
                    return Err(UploadError::Auth("an auth session is already active".into()));
                }
                *token = Some(value);
                Ok(())
            })
            .await
    }

    /// Replaces the token of the active session.
    pub async fn refresh(&self, access_token: &str) -> Result<(), UploadError> {
        let value = token_header(access_token)?;
        self.lock
            .run_exclusive(|| async {
                let mut token = self.token_slot();
                match token.as_mut() {
                    Some(current) => {
                        *current = value;
                        Ok(())
                    }
                    None => Err(UploadError::Auth("no auth session is active".into())),
                }
            })
            .await
    }

    /// Ends the session. Calling this without an active session is a no-op.
    pub async fn end_session(&self) {
        self.lock
            .run_exclusive(|| async {
                self.token_slot().take();
            })
            .await;
    }

    pub fn is_active(&self) -> bool {
        self.token_slot().is_some()
    }

    fn token_slot(&self) -> MutexGuard<'_, Option<HeaderValue>> {
        self.token.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("active", &self.is_active())
            .finish()
    }
}

impl AuthHeaders for SessionHandle {
    fn headers(&self) -> HeadersFuture<'_> {
        Box::pin(self.lock.run_exclusive(|| async {
            let mut headers = HeaderMap::new();
            let token = self.token_slot().clone();
            if let Some(token) = token {
                headers.insert(AUTHORIZATION_TOKEN, token);
            }
            Ok(headers)
        }))
    }
}

fn token_header(access_token: &str) -> Result<HeaderValue, UploadError> {
    let mut value = HeaderValue::from_str(access_token)
        .map_err(|_| UploadError::Auth("access token contains invalid characters".into()))?;
    value.set_sensitive(true);
    Ok(value)
}
