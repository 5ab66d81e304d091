use std::collections::HashMap;
use std::sync::Arc;

use clap::ValueEnum;
use parking_lot::Mutex;
use tracing::debug;

use crate::{
    errors::{LesionSegError, Result},
    lesion::LesionType,
    model::{InputTensor, ProbabilityMap},
    traits::{ModelLoader, ModelSessionProvider, SegmentationSession},
};

/// How model sessions live between requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum SessionPolicy {
    /// Load a fresh session for every request and drop it afterwards.
    /// Peak memory is bounded by one model per in-flight request.
    #[default]
    LoadPerCall,
    /// Keep sessions resident per lesion type and reuse them.
    Resident,
}

/// Loads on every acquire, drops on every release.
pub struct LoadPerCall<L> {
    loader: L,
}

impl<L: ModelLoader> LoadPerCall<L> {
    pub const fn new(loader: L) -> Self {
        Self { loader }
    }
}

impl<L: ModelLoader> ModelSessionProvider for LoadPerCall<L> {
    type Session = L::Session;

    fn acquire(&self, lesion: LesionType) -> Result<Self::Session> {
        self.loader.load(lesion)
    }

    fn release(&self, lesion: LesionType, session: Self::Session) {
        drop(session);
        debug!(%lesion, "model session dropped");
    }
}

/// Keeps idle sessions around so later requests skip the load.
pub struct ResidentSessions<L: ModelLoader> {
    loader: L,
    idle: Mutex<HashMap<LesionType, Vec<L::Session>>>,
}

impl<L: ModelLoader> ResidentSessions<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            idle: Mutex::new(HashMap::new()),
        }
    }

    /// Number of idle sessions currently held for `lesion`.
    pub fn idle_count(&self, lesion: LesionType) -> usize {
        self.idle.lock().get(&lesion).map_or(0, Vec::len)
    }
}

impl<L: ModelLoader> ModelSessionProvider for ResidentSessions<L> {
    type Session = L::Session;

    fn acquire(&self, lesion: LesionType) -> Result<Self::Session> {
        let cached = self.idle.lock().get_mut(&lesion).and_then(Vec::pop);
        match cached {
            Some(session) => {
                debug!(%lesion, "reusing resident model session");
                Ok(session)
            }
            // The lock is not held while loading.
            None => self.loader.load(lesion),
        }
    }

    fn release(&self, lesion: LesionType, session: Self::Session) {
        self.idle.lock().entry(lesion).or_default().push(session);
        debug!(%lesion, "model session returned to pool");
    }
}

/// Scoped ownership of a session: handed back to its provider exactly once,
/// when the lease is dropped. A session whose prediction failed is discarded
/// instead of released.
pub struct SessionLease<P: ModelSessionProvider + ?Sized> {
    provider: Arc<P>,
    lesion: LesionType,
    session: Option<P::Session>,
    failed: bool,
}

impl<P: ModelSessionProvider + ?Sized> SessionLease<P> {
    pub fn acquire(provider: Arc<P>, lesion: LesionType) -> Result<Self> {
        let session = provider.acquire(lesion)?;
        debug!(%lesion, "model session acquired");
        Ok(Self {
            provider,
            lesion,
            session: Some(session),
            failed: false,
        })
    }

    pub const fn lesion(&self) -> LesionType {
        self.lesion
    }

    pub fn predict(&mut self, input: &InputTensor) -> Result<ProbabilityMap> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| LesionSegError::inference("predict", "session already released"))?;
        let prediction = session.predict(input);
        if prediction.is_err() {
            self.failed = true;
        }
        prediction
    }
}

impl<P: ModelSessionProvider + ?Sized> Drop for SessionLease<P> {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        if self.failed {
            self.provider.discard(self.lesion, session);
        } else {
            self.provider.release(self.lesion, session);
        }
    }
}
