//! Blocking policy
//!
//! A process-wide tri-state switch deciding whether a matched tracker is
//! blocked. The mode is persisted through a [`PolicyStore`]; every mutator
//! takes effect in memory first and then reports whether it was persisted.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{PersistenceError, PolicyError};
use crate::types::AppId;

// =============================================================================
// Blocking Mode
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "apps", rename_all = "snake_case")]
pub enum BlockingMode {
    /// Nothing is blocked
    #[default]
    None,
    /// Every matched tracker is blocked
    All,
    /// Only trackers owned by these companies are blocked
    Selected(BTreeSet<AppId>),
}

impl BlockingMode {
    pub fn should_block(&self, app_id: AppId) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::Selected(apps) => apps.contains(&app_id),
        }
    }
}

// =============================================================================
// Persistence
// =============================================================================

/// Storage for the blocking mode.
pub trait PolicyStore: Send + Sync {
    /// Stored mode, or [`BlockingMode::None`] when nothing was stored yet.
    fn load_policy_state(&self) -> Result<BlockingMode, PersistenceError>;

    fn store_policy_state(&self, mode: &BlockingMode) -> Result<(), PersistenceError>;
}

/// Store that keeps the mode in memory only.
#[derive(Debug, Default)]
pub struct MemoryPolicyStore {
    mode: Mutex<Option<BlockingMode>>,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PolicyStore for MemoryPolicyStore {
    fn load_policy_state(&self) -> Result<BlockingMode, PersistenceError> {
        let mode = self.mode.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(mode.clone().unwrap_or_default())
    }

    fn store_policy_state(&self, mode: &BlockingMode) -> Result<(), PersistenceError> {
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner) = Some(mode.clone());
        Ok(())
    }
}

// =============================================================================
// Blocking Policy
// =============================================================================

pub struct BlockingPolicy {
    mode: RwLock<BlockingMode>,
    store: Arc<dyn PolicyStore>,
    // Serializes set-then-persist so the store sees changes in order
    write_lock: Mutex<()>,
}

impl BlockingPolicy {
    /// Restore the policy from `store`. A store that cannot be read leaves
    /// the policy at [`BlockingMode::None`].
    pub fn load(store: Arc<dyn PolicyStore>) -> Self {
        let mode = match store.load_policy_state() {
            Ok(mode) => mode,
            Err(e) => {
                warn!("Could not restore blocking policy, blocking nothing: {}", e);
                BlockingMode::default()
            }
        };

        Self {
            mode: RwLock::new(mode),
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub fn should_block(&self, app_id: AppId) -> bool {
        self.mode.read().unwrap_or_else(PoisonError::into_inner).should_block(app_id)
    }

    /// Current mode.
    pub fn mode(&self) -> BlockingMode {
        self.mode.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn block_all(&self) -> Result<(), PolicyError> {
        self.set_mode(BlockingMode::All)
    }

    pub fn unblock_all(&self) -> Result<(), PolicyError> {
        self.set_mode(BlockingMode::None)
    }

    /// Block exactly `apps`, replacing whatever was blocked before.
    pub fn block_selected<I>(&self, apps: I) -> Result<(), PolicyError>
    where
        I: IntoIterator<Item = AppId>,
    {
        self.set_mode(BlockingMode::Selected(apps.into_iter().collect()))
    }

    /// Switch to `mode`. It is in effect once this returns, whether or not
    /// it was persisted.
    pub fn set_mode(&self, mode: BlockingMode) -> Result<(), PolicyError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        *self.mode.write().unwrap_or_else(PoisonError::into_inner) = mode.clone();
        info!("Blocking policy set to {:?}", mode);

        self.store.store_policy_state(&mode).map_err(|e| {
            warn!("Blocking policy not persisted: {}", e);
            PolicyError::from(e)
        })
    }
}
