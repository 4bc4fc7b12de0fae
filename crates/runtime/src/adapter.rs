//! Process-wide policy adapter.

use crate::{Error, Result};
use async_trait::async_trait;
use casbin::{Adapter, FileAdapter, Filter, Model};
use std::path::Path;
use std::sync::Arc;
use storage::SqliteAdapter;
use tokio::sync::Mutex;
use tracing::info;

/// Open the adapter named by `driver`.
///
/// An empty driver or connection string means no adapter. `db_specified`
/// requires the target database to exist already; otherwise it is created.
pub fn open_adapter(
    driver: &str,
    connection: &str,
    db_specified: bool,
) -> Result<Option<SharedAdapter>> {
    if driver.is_empty() || connection.is_empty() {
        info!("no policy adapter configured, enforcers are memory-only");
        return Ok(None);
    }

    let adapter: Box<dyn Adapter> = match driver {
        "file" => {
            let path = Path::new(connection);
            if !path.exists() {
                if db_specified {
                    return Err(Error::AdapterInit(format!(
                        "policy file not found: {connection}"
                    )));
                }
                std::fs::File::create(path)
                    .map_err(|e| Error::AdapterInit(format!("{connection}: {e}")))?;
            }
            Box::new(FileAdapter::new(connection.to_string()))
        }
        "sqlite" => Box::new(
            SqliteAdapter::open(connection, !db_specified)
                .map_err(|e| Error::AdapterInit(format!("{connection}: {e}")))?,
        ),
        other => {
            return Err(Error::AdapterInit(format!("unsupported driver: {other}")));
        }
    };

    info!(driver, connection, "opened policy adapter");
    Ok(Some(SharedAdapter::new(adapter)))
}

/// An adapter shared by every enforcer built with it.
///
/// Each clone forwards to the same underlying adapter; calls are
/// serialized by an async mutex.
pub struct SharedAdapter {
    inner: Arc<Mutex<Box<dyn Adapter>>>,
    filtered: bool,
}

impl SharedAdapter {
    pub fn new(adapter: Box<dyn Adapter>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(adapter)),
            filtered: false,
        }
    }
}

impl Clone for SharedAdapter {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            filtered: false,
        }
    }
}

#[async_trait]
impl Adapter for SharedAdapter {
    async fn load_policy(&mut self, m: &mut dyn Model) -> casbin::Result<()> {
        self.inner.lock().await.load_policy(m).await?;
        self.filtered = false;
        Ok(())
    }

    async fn load_filtered_policy<'a>(
        &mut self,
        m: &mut dyn Model,
        f: Filter<'a>,
    ) -> casbin::Result<()> {
        self.inner.lock().await.load_filtered_policy(m, f).await?;
        self.filtered = true;
        Ok(())
    }

    async fn save_policy(&mut self, m: &mut dyn Model) -> casbin::Result<()> {
        self.inner.lock().await.save_policy(m).await
    }

    async fn clear_policy(&mut self) -> casbin::Result<()> {
        self.inner.lock().await.clear_policy().await
    }

    fn is_filtered(&self) -> bool {
        self.filtered
    }

    async fn add_policy(
        &mut self,
        sec: &str,
        ptype: &str,
        rule: Vec<String>,
    ) -> casbin::Result<bool> {
        self.inner.lock().await.add_policy(sec, ptype, rule).await
    }

    async fn add_policies(
        &mut self,
        sec: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> casbin::Result<bool> {
        self.inner.lock().await.add_policies(sec, ptype, rules).await
    }

    async fn remove_policy(
        &mut self,
        sec: &str,
        ptype: &str,
        rule: Vec<String>,
    ) -> casbin::Result<bool> {
        self.inner.lock().await.remove_policy(sec, ptype, rule).await
    }

    async fn remove_policies(
        &mut self,
        sec: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> casbin::Result<bool> {
        self.inner.lock().await.remove_policies(sec, ptype, rules).await
    }

    async fn remove_filtered_policy(
        &mut self,
        sec: &str,
        ptype: &str,
        field_index: usize,
        field_values: Vec<String>,
    ) -> casbin::Result<bool> {
        self.inner
            .lock()
            .await
            .remove_filtered_policy(sec, ptype, field_index, field_values)
            .await
    }
}
