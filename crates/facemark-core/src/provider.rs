//! Landmark provider boundary and its lazily initialized handle.
//!
//! A provider wraps a pre-trained landmark model. Loading one is expensive,
//! so callers share a [`ProviderHandle`]: the first `get()` runs the loader on
//! the blocking pool and every concurrent caller awaits that same load.

use crate::types::Face;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("landmark model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("provider initialization failed: {0}")]
    InitFailed(String),
    #[error("landmark inference failed: {0}")]
    InferenceFailed(String),
}

/// One camera frame handed to a provider.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic frame counter assigned by the capture loop.
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Pixel data in the provider's expected layout; may be empty for
    /// providers that do not read pixels.
    pub data: Vec<u8>,
}

/// A landmark model: frame in, zero or more faces out.
///
/// An empty result is the normal "no face" outcome, not an error.
pub trait LandmarkProvider: Send + Sync {
    fn estimate_faces(&self, frame: &Frame) -> Result<Vec<Face>, ProviderError>;
}

type Loader<P> = dyn Fn() -> Result<P, ProviderError> + Send + Sync;

fn no_loader<P>() -> Result<P, ProviderError> {
    Err(ProviderError::InitFailed(
        "handle was created with a ready provider".into(),
    ))
}

/// Owned, lazily initialized provider with single-flight initialization.
///
/// A failed load leaves the handle empty so the next `get()` retries.
pub struct ProviderHandle<P> {
    cell: OnceCell<Arc<P>>,
    loader: Arc<Loader<P>>,
}

impl<P: LandmarkProvider + 'static> ProviderHandle<P> {
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> Result<P, ProviderError> + Send + Sync + 'static,
    {
        Self {
            cell: OnceCell::new(),
            loader: Arc::new(loader),
        }
    }

    /// A handle around an already constructed provider.
    pub fn ready(provider: P) -> Self {
        Self {
            cell: OnceCell::new_with(Some(Arc::new(provider))),
            loader: Arc::new(no_loader::<P>),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }

    /// Get the provider, loading it on first use.
    pub async fn get(&self) -> Result<Arc<P>, ProviderError> {
        let provider = self
            .cell
            .get_or_try_init(|| async {
                let loader = Arc::clone(&self.loader);
                tracing::info!("initializing landmark provider");
                let provider = tokio::task::spawn_blocking(move || loader())
                    .await
                    .map_err(|e| ProviderError::InitFailed(format!("loader task: {e}")))??;
                tracing::info!("landmark provider ready");
                Ok::<_, ProviderError>(Arc::new(provider))
            })
            .await?;
        Ok(Arc::clone(provider))
    }
}
