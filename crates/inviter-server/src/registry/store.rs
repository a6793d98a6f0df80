//! Durable user-to-daemon bindings.
//!
//! The relay only consumes this store; where bindings really live is up to
//! the deployment. Two adapters ship here: an in-memory map and a JSON file.

use crate::error::ServerResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Boxed future returned by [`BindingStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = ServerResult<T>> + Send + 'a>>;

/// A chat user linked to a daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBinding {
    pub user_id: String,
    pub user_name: String,
    pub daemon_id: String,
    pub locale: String,
    /// Last protocol version seen from the daemon, if it was ever connected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daemon_version: Option<String>,
}

/// Key-value store of bindings, keyed by user id.
pub trait BindingStore: Send + Sync {
    /// Find the binding pointing at `daemon_id`.
    fn find_by_daemon_id<'a>(&'a self, daemon_id: &'a str) -> StoreFuture<'a, Option<UserBinding>>;

    fn find_by_user_id<'a>(&'a self, user_id: &'a str) -> StoreFuture<'a, Option<UserBinding>>;

    /// Insert or replace the binding for `binding.user_id`.
    fn upsert_by_user_id(&self, binding: UserBinding) -> StoreFuture<'_, ()>;

    /// Remove the binding for `user_id`. Returns whether one existed.
    fn delete_by_user_id<'a>(&'a self, user_id: &'a str) -> StoreFuture<'a, bool>;

    /// Number of bindings.
    fn count(&self) -> StoreFuture<'_, usize>;
}

fn find_daemon(bindings: &HashMap<String, UserBinding>, daemon_id: &str) -> Option<UserBinding> {
    bindings
        .values()
        .find(|b| b.daemon_id == daemon_id)
        .cloned()
}

/// Volatile store; bindings are lost on restart.
#[derive(Default)]
pub struct MemoryBindingStore {
    bindings: RwLock<HashMap<String, UserBinding>>,
}

impl MemoryBindingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BindingStore for MemoryBindingStore {
    fn find_by_daemon_id<'a>(&'a self, daemon_id: &'a str) -> StoreFuture<'a, Option<UserBinding>> {
        Box::pin(async move { Ok(find_daemon(&*self.bindings.read().await, daemon_id)) })
    }

    fn find_by_user_id<'a>(&'a self, user_id: &'a str) -> StoreFuture<'a, Option<UserBinding>> {
        Box::pin(async move { Ok(self.bindings.read().await.get(user_id).cloned()) })
    }

    fn upsert_by_user_id(&self, binding: UserBinding) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.bindings
                .write()
                .await
                .insert(binding.user_id.clone(), binding);
            Ok(())
        })
    }

    fn delete_by_user_id<'a>(&'a self, user_id: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(self.bindings.write().await.remove(user_id).is_some()) })
    }

    fn count(&self) -> StoreFuture<'_, usize> {
        Box::pin(async move { Ok(self.bindings.read().await.len()) })
    }
}

/// On-disk format of [`JsonFileBindingStore`].
#[derive(Debug, Default, Serialize, Deserialize)]
struct BindingsFile {
    #[serde(default)]
    bindings: Vec<UserBinding>,
}

/// Store persisted as a single JSON file, rewritten on every change.
pub struct JsonFileBindingStore {
    path: PathBuf,
    bindings: RwLock<HashMap<String, UserBinding>>,
}

impl JsonFileBindingStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> ServerResult<Self> {
        let path = path.into();
        let bindings = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let file: BindingsFile = serde_json::from_slice(&bytes)?;
                file.bindings
                    .into_iter()
                    .map(|b| (b.user_id.clone(), b))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        info!(path = %path.display(), count = bindings.len(), "loaded user bindings");
        Ok(Self {
            path,
            bindings: RwLock::new(bindings),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the whole map through a temp file so a crash never leaves a torn file.
    async fn persist(&self, bindings: &HashMap<String, UserBinding>) -> ServerResult<()> {
        let mut sorted: Vec<UserBinding> = bindings.values().cloned().collect();
        sorted.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        let json = serde_json::to_vec_pretty(&BindingsFile { bindings: sorted })?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), count = bindings.len(), "persisted user bindings");
        Ok(())
    }
}

impl BindingStore for JsonFileBindingStore {
    fn find_by_daemon_id<'a>(&'a self, daemon_id: &'a str) -> StoreFuture<'a, Option<UserBinding>> {
        Box::pin(async move { Ok(find_daemon(&*self.bindings.read().await, daemon_id)) })
    }

    fn find_by_user_id<'a>(&'a self, user_id: &'a str) -> StoreFuture<'a, Option<UserBinding>> {
        Box::pin(async move { Ok(self.bindings.read().await.get(user_id).cloned()) })
    }

    fn upsert_by_user_id(&self, binding: UserBinding) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut bindings = self.bindings.write().await;
            bindings.insert(binding.user_id.clone(), binding);
            self.persist(&bindings).await
        })
    }

    fn delete_by_user_id<'a>(&'a self, user_id: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut bindings = self.bindings.write().await;
            if bindings.remove(user_id).is_none() {
                return Ok(false);
            }
            self.persist(&bindings).await?;
            Ok(true)
        })
    }

    fn count(&self) -> StoreFuture<'_, usize> {
        Box::pin(async move { Ok(self.bindings.read().await.len()) })
    }
}
