//! Artifact store backed by a local directory.
//!
//! Availability is announced through leased `(file, name, path)` entries in
//! the Space. Fetching copies from the announced path, so the path must be
//! reachable from the fetching host.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{Entry, Kind, Template};
use crate::ports::{ArtifactError, ArtifactStore};
use crate::space::{LeaseGuard, Space, SpaceError, Wait};

pub struct LocalArtifactStore {
    dir: PathBuf,
    space: Arc<dyn Space>,
    lease: Duration,
    published: Mutex<HashMap<String, LeaseGuard>>,
}

impl LocalArtifactStore {
    /// `lease` is the length of each published file entry; entries are
    /// renewed for as long as the store lives.
    pub async fn open(dir: impl AsRef<Path>, space: Arc<dyn Space>, lease: Duration) -> Result<Self, ArtifactError> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ArtifactError::io(&dir.display().to_string(), e))?;
        let dir = tokio::fs::canonicalize(dir)
            .await
            .map_err(|e| ArtifactError::io(&dir.display().to_string(), e))?;
        Ok(Self {
            dir,
            space,
            lease,
            published: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    async fn exists_locally(&self, name: &str) -> bool {
        tokio::fs::try_exists(self.path_of(name)).await.unwrap_or(false)
    }

    /// Publish every regular file already in the directory. Returns how many
    /// were published.
    pub async fn publish_all(&self) -> Result<usize, ArtifactError> {
        let dir_name = self.dir.display().to_string();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| ArtifactError::io(&dir_name, e))?;

        let mut count = 0;
        while let Some(entry) = entries.next_entry().await.map_err(|e| ArtifactError::io(&dir_name, e))? {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if is_file {
                self.publish(&name).await?;
                count += 1;
            }
        }
        tracing::info!(dir = %self.dir.display(), count, "published existing files");
        Ok(count)
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn available(&self, name: &str) -> bool {
        if self.exists_locally(name).await {
            return true;
        }
        let template = Template::kind(Kind::File).with_key(name);
        self.space.read(&template, Wait::NOW).await.is_ok()
    }

    async fn get(&self, name: &str) -> Result<(), ArtifactError> {
        if self.exists_locally(name).await {
            return Ok(());
        }

        tracing::debug!(artifact = name, "waiting for artifact");
        let template = Template::kind(Kind::File).with_key(name);
        let entry = self.space.read(&template, Wait::Forever).await?;
        let Some(source) = entry.text() else {
            return Err(ArtifactError::Missing(name.to_string()));
        };

        let target = self.path_of(name);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ArtifactError::io(name, e))?;
        }
        if Path::new(source) != target {
            tokio::fs::copy(source, &target)
                .await
                .map_err(|e| ArtifactError::io(name, e))?;
        }
        tracing::debug!(artifact = name, from = source, "artifact fetched");
        Ok(())
    }

    async fn publish(&self, name: &str) -> Result<(), ArtifactError> {
        if !self.exists_locally(name).await {
            return Err(ArtifactError::Missing(name.to_string()));
        }

        let location = self.path_of(name).display().to_string();
        let lease = self
            .space
            .write(Entry::file(name, location), Some(self.lease))
            .await?;
        let guard = LeaseGuard::spawn(Arc::clone(&self.space), lease, self.lease, self.lease / 2);

        let previous = self.published.lock().await.insert(name.to_string(), guard);
        if let Some(previous) = previous {
            // The old entry would linger until its lease ran out.
            match self.space.cancel(previous.stop()).await {
                Ok(_) | Err(SpaceError::LeaseNotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        tracing::debug!(artifact = name, "published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::{InMemorySpace, LeaseId};

    const LEASE: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn publish_announces_the_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        let space = Arc::new(InMemorySpace::new());
        let store = LocalArtifactStore::open(dir.path(), space.clone(), LEASE).await.unwrap();
        std::fs::write(dir.path().join("a.o"), b"obj").unwrap();

        store.publish("a.o").await.unwrap();

        let entries = space.read_all(&Template::kind(Kind::File)).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "a.o");
        assert_eq!(Path::new(entries[0].text().unwrap()), store.path_of("a.o"));
    }

    #[tokio::test]
    async fn publishing_twice_keeps_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let space = Arc::new(InMemorySpace::new());
        let store = LocalArtifactStore::open(dir.path(), space.clone(), LEASE).await.unwrap();
        std::fs::write(dir.path().join("a.o"), b"obj").unwrap();

        store.publish("a.o").await.unwrap();
        store.publish("a.o").await.unwrap();

        assert_eq!(space.read_all(&Template::kind(Kind::File)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn republishing_after_the_old_entry_vanished_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let space = Arc::new(InMemorySpace::new());
        let store = LocalArtifactStore::open(dir.path(), space.clone(), LEASE).await.unwrap();
        std::fs::write(dir.path().join("a.o"), b"obj").unwrap();

        store.publish("a.o").await.unwrap();
        space.take(&Template::kind(Kind::File).with_key("a.o"), Wait::NOW).await.unwrap();
        store.publish("a.o").await.unwrap();

        assert_eq!(space.read_all(&Template::kind(Kind::File)).await.unwrap().len(), 1);
    }

    /// Delegates to an in-memory space but fails every cancel.
    struct NoCancel(InMemorySpace);

    #[async_trait]
    impl Space for NoCancel {
        async fn write(&self, entry: Entry, lease: Option<Duration>) -> Result<LeaseId, SpaceError> {
            self.0.write(entry, lease).await
        }

        async fn take(&self, template: &Template, wait: Wait) -> Result<Entry, SpaceError> {
            self.0.take(template, wait).await
        }

        async fn read(&self, template: &Template, wait: Wait) -> Result<Entry, SpaceError> {
            self.0.read(template, wait).await
        }

        async fn read_all(&self, template: &Template) -> Result<Vec<Entry>, SpaceError> {
            self.0.read_all(template).await
        }

        async fn renew(&self, lease: LeaseId, period: Duration) -> Result<(), SpaceError> {
            self.0.renew(lease, period).await
        }

        async fn cancel(&self, _lease: LeaseId) -> Result<Entry, SpaceError> {
            Err(SpaceError::Protocol("cancel refused".into()))
        }
    }

    #[tokio::test]
    async fn failed_cancel_of_previous_entry_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let space = Arc::new(NoCancel(InMemorySpace::new()));
        let store = LocalArtifactStore::open(dir.path(), space, LEASE).await.unwrap();
        std::fs::write(dir.path().join("a.o"), b"obj").unwrap();

        store.publish("a.o").await.unwrap();
        let second = store.publish("a.o").await;
        assert!(matches!(second, Err(ArtifactError::Space(SpaceError::Protocol(_)))), "{second:?}");
    }

    #[tokio::test]
    async fn publish_of_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::open(dir.path(), Arc::new(InMemorySpace::new()), LEASE)
            .await
            .unwrap();

        assert!(matches!(store.publish("nope").await, Err(ArtifactError::Missing(_))));
    }

    #[tokio::test]
    async fn get_copies_from_another_store() {
        let space = Arc::new(InMemorySpace::new());
        let (dir_a, dir_b) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
        let a = LocalArtifactStore::open(dir_a.path(), space.clone(), LEASE).await.unwrap();
        let b = LocalArtifactStore::open(dir_b.path(), space.clone(), LEASE).await.unwrap();
        std::fs::write(dir_a.path().join("lib.a"), b"archive").unwrap();

        assert!(!b.available("lib.a").await);
        a.publish("lib.a").await.unwrap();
        assert!(b.available("lib.a").await);

        b.get("lib.a").await.unwrap();
        assert_eq!(std::fs::read(dir_b.path().join("lib.a")).unwrap(), b"archive");
    }

    #[tokio::test]
    async fn get_waits_for_publication() {
        let space = Arc::new(InMemorySpace::new());
        let (dir_a, dir_b) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
        let a = LocalArtifactStore::open(dir_a.path(), space.clone(), LEASE).await.unwrap();
        let b = Arc::new(LocalArtifactStore::open(dir_b.path(), space.clone(), LEASE).await.unwrap());

        let fetch = tokio::spawn({
            let b = Arc::clone(&b);
            async move { b.get("late.o").await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        std::fs::write(dir_a.path().join("late.o"), b"late").unwrap();
        a.publish("late.o").await.unwrap();

        fetch.await.unwrap().unwrap();
        assert_eq!(std::fs::read(dir_b.path().join("late.o")).unwrap(), b"late");
    }

    #[tokio::test]
    async fn publish_all_covers_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.c"), b"int main;").unwrap();
        std::fs::write(dir.path().join("util.c"), b"int util;").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let space = Arc::new(InMemorySpace::new());
        let store = LocalArtifactStore::open(dir.path(), space.clone(), LEASE).await.unwrap();

        assert_eq!(store.publish_all().await.unwrap(), 2);
        assert_eq!(space.read_all(&Template::kind(Kind::File)).await.unwrap().len(), 2);
    }
}
