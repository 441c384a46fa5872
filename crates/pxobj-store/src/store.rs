//! The per-node store implementation.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use pxobj_common::error::{Error, Result};
use pxobj_common::types::{random_hex, validate_bucket_name, AccessKey, Bucket, ObjectMeta};

const META_FILE: &str = "metadata.json";
const OBJECTS_DIR: &str = "objects";

/// One page of a `ListObjectsV2` result.
#[derive(Clone, Debug, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectMeta>,
    pub next_token: Option<String>,
    pub truncated: bool,
}

/// Persistent metadata document, one per node.
#[derive(Debug, Default, Serialize, Deserialize)]
struct MetaState {
    buckets: BTreeMap<String, BucketState>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketState {
    created_at: DateTime<Utc>,
    objects: BTreeMap<String, ObjectRecord>,
    access: BTreeMap<String, AccessRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectRecord {
    size: u64,
    etag: String,
    mod_time: DateTime<Utc>,
    path: PathBuf,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessRecord {
    secret_key: String,
    read_only: bool,
}

/// Local object and metadata store.
///
/// All operations serialize through one readers-writer lock; writers
/// persist the full metadata document via write-temp-then-rename before
/// returning.
pub struct Store {
    data_dir: PathBuf,
    meta_path: PathBuf,
    state: RwLock<MetaState>,
}

impl Store {
    /// Open the store on `data_dir`, creating the layout if absent.
    ///
    /// Loading tolerates a missing or zero-length metadata file.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        make_dir(&data_dir.join(OBJECTS_DIR))?;
        let meta_path = data_dir.join(META_FILE);
        let state = load_meta(&meta_path)?;
        debug!(dir = %data_dir.display(), buckets = state.buckets.len(), "store opened");
        Ok(Self {
            data_dir,
            meta_path,
            state: RwLock::new(state),
        })
    }

    /// Create `name`; creating an existing bucket is a no-op.
    pub fn create_bucket(&self, name: &str) -> Result<()> {
        validate_bucket_name(name)?;
        let mut state = self.state.write();
        if state.buckets.contains_key(name) {
            return Ok(());
        }
        state.buckets.insert(
            name.to_string(),
            BucketState {
                created_at: Utc::now(),
                objects: BTreeMap::new(),
                access: BTreeMap::new(),
            },
        );
        make_dir(&self.bucket_dir(name))?;
        self.persist(&state)
    }

    /// Delete `name`; fails while objects remain.
    pub fn delete_bucket(&self, name: &str) -> Result<()> {
        let mut state = self.state.write();
        let bucket = state
            .buckets
            .get(name)
            .ok_or_else(|| Error::BucketNotFound(name.to_string()))?;
        if !bucket.objects.is_empty() {
            return Err(Error::BucketNotEmpty(name.to_string()));
        }
        state.buckets.remove(name);
        self.persist(&state)?;
        if let Err(err) = fs::remove_dir_all(self.bucket_dir(name)) {
            if err.kind() != std::io::ErrorKind::NotFound {
                return Err(err.into());
            }
        }
        Ok(())
    }

    /// All buckets, sorted by name ascending.
    pub fn list_buckets(&self) -> Vec<Bucket> {
        let state = self.state.read();
        state
            .buckets
            .iter()
            .map(|(name, b)| Bucket {
                name: name.clone(),
                created_at: b.created_at,
            })
            .collect()
    }

    /// Stream `body` into a fresh content file, then swap the object
    /// record under the write lock.
    ///
    /// Content is hashed and written without the lock; the superseded
    /// content file is unlinked only after the metadata rename succeeds,
    /// and its removal never fails the put.
    pub fn put_object<R: Read>(&self, bucket: &str, key: &str, mut body: R) -> Result<ObjectMeta> {
        if key.is_empty() {
            return Err(Error::EmptyObjectKey);
        }
        if !self.state.read().buckets.contains_key(bucket) {
            return Err(Error::BucketNotFound(bucket.to_string()));
        }

        let dir = self.bucket_dir(bucket);
        make_dir(&dir)?;
        let path = dir.join(random_hex(12));
        let (size, etag) = match write_content(&path, &mut body) {
            Ok(v) => v,
            Err(err) => {
                let _ = fs::remove_file(&path);
                return Err(err);
            }
        };
        let now = Utc::now();

        let mut state = self.state.write();
        let Some(b) = state.buckets.get_mut(bucket) else {
            // Bucket deleted while streaming; reclaim the content file.
            let _ = fs::remove_file(&path);
            return Err(Error::BucketNotFound(bucket.to_string()));
        };
        let prev = b.objects.insert(
            key.to_string(),
            ObjectRecord {
                size,
                etag: etag.clone(),
                mod_time: now,
                path: path.clone(),
            },
        );
        self.persist(&state)?;
        if let Some(prev) = prev {
            if prev.path != path {
                if let Err(err) = fs::remove_file(&prev.path) {
                    warn!(path = %prev.path.display(), %err, "failed to remove superseded content file");
                }
            }
        }

        Ok(ObjectMeta {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size,
            etag,
            mod_time: now,
            path,
        })
    }

    /// Metadata for `bucket/key`.
    pub fn get_object_meta(&self, bucket: &str, key: &str) -> Result<ObjectMeta> {
        let state = self.state.read();
        let b = state
            .buckets
            .get(bucket)
            .ok_or_else(|| Error::BucketNotFound(bucket.to_string()))?;
        let rec = b.objects.get(key).ok_or_else(|| Error::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })?;
        Ok(ObjectMeta {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: rec.size,
            etag: rec.etag.clone(),
            mod_time: rec.mod_time,
            path: rec.path.clone(),
        })
    }

    /// Metadata plus a readable handle on the content file.
    pub fn open_object(&self, bucket: &str, key: &str) -> Result<(ObjectMeta, File)> {
        let meta = self.get_object_meta(bucket, key)?;
        let file = File::open(&meta.path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                Error::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                err.into()
            }
        })?;
        Ok((meta, file))
    }

    /// Delete `bucket/key`; deleting an absent key succeeds.
    pub fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let mut state = self.state.write();
        let b = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| Error::BucketNotFound(bucket.to_string()))?;
        let Some(rec) = b.objects.remove(key) else {
            return Ok(());
        };
        self.persist(&state)?;
        if let Err(err) = fs::remove_file(&rec.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %rec.path.display(), %err, "failed to remove content file");
            }
        }
        Ok(())
    }

    /// One page of keys under `prefix`, lexicographically ascending.
    ///
    /// A non-empty `token` skips every key `<= token`. `max_keys` is
    /// clamped to `[1, 1000]` with 1000 as the default.
    pub fn list_objects_v2(
        &self,
        bucket: &str,
        prefix: &str,
        token: &str,
        max_keys: i64,
    ) -> Result<ListPage> {
        let state = self.state.read();
        let b = state
            .buckets
            .get(bucket)
            .ok_or_else(|| Error::BucketNotFound(bucket.to_string()))?;

        let max_keys = if (1..=1000).contains(&max_keys) {
            max_keys as usize
        } else {
            1000
        };

        let mut keys: Vec<&String> = b
            .objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .filter(|k| token.is_empty() || k.as_str() > token)
            .collect();
        keys.sort();

        let truncated = keys.len() > max_keys;
        keys.truncate(max_keys);
        let next_token = if truncated {
            keys.last().map(|k| k.to_string())
        } else {
            None
        };

        let objects = keys
            .into_iter()
            .map(|k| {
                let rec = &b.objects[k];
                ObjectMeta {
                    bucket: bucket.to_string(),
                    key: k.clone(),
                    size: rec.size,
                    etag: rec.etag.clone(),
                    mod_time: rec.mod_time,
                    path: rec.path.clone(),
                }
            })
            .collect();

        Ok(ListPage {
            objects,
            next_token,
            truncated,
        })
    }

    /// Generate and persist a new credential bound to `bucket`.
    pub fn create_access(&self, bucket: &str, read_only: bool) -> Result<AccessKey> {
        let access = AccessKey::generate(bucket, read_only);
        self.put_access(access.clone())?;
        Ok(access)
    }

    /// Install a credential (replication path: the key material was
    /// generated on the leader).
    pub fn put_access(&self, access: AccessKey) -> Result<()> {
        let mut state = self.state.write();
        let b = state
            .buckets
            .get_mut(&access.bucket)
            .ok_or_else(|| Error::BucketNotFound(access.bucket.clone()))?;
        b.access.insert(
            access.access_key,
            AccessRecord {
                secret_key: access.secret_key,
                read_only: access.read_only,
            },
        );
        self.persist(&state)
    }

    /// Delete a credential by access-key string; unknown keys succeed.
    pub fn delete_access(&self, access_key: &str) -> Result<()> {
        let mut state = self.state.write();
        let mut found = false;
        for b in state.buckets.values_mut() {
            if b.access.remove(access_key).is_some() {
                found = true;
                break;
            }
        }
        if found {
            self.persist(&state)?;
        }
        Ok(())
    }

    /// Resolve an access-key string to the full credential.
    pub fn lookup_access_key(&self, access_key: &str) -> Result<AccessKey> {
        let state = self.state.read();
        for (bucket, b) in &state.buckets {
            if let Some(rec) = b.access.get(access_key) {
                return Ok(AccessKey {
                    access_key: access_key.to_string(),
                    secret_key: rec.secret_key.clone(),
                    bucket: bucket.clone(),
                    read_only: rec.read_only,
                });
            }
        }
        Err(Error::AccessKeyNotFound)
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.data_dir.join(OBJECTS_DIR).join(bucket)
    }

    /// Serialize the full document to `metadata.json.tmp`, then rename
    /// over `metadata.json`. Callers hold the write lock.
    fn persist(&self, state: &MetaState) -> Result<()> {
        let doc = serde_json::to_vec_pretty(state).map_err(|e| Error::Serialization(e.to_string()))?;
        let tmp = self.meta_path.with_extension("json.tmp");
        let mut f = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&tmp)?;
        f.write_all(&doc)?;
        drop(f);
        fs::rename(&tmp, &self.meta_path)?;
        Ok(())
    }
}

/// Stream `body` into `path` through a SHA-256 hasher.
fn write_content<R: Read>(path: &Path, body: &mut R) -> Result<(u64, String)> {
    let mut file = File::create(path)?;
    let mut hasher = Sha256::new();
    let mut size = 0u64;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = body.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        file.write_all(&buf[..n])?;
        size += n as u64;
    }
    file.sync_all()?;
    Ok((size, hex::encode(hasher.finalize())))
}

fn make_dir(path: &Path) -> Result<()> {
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o750)
        .create(path)?;
    Ok(())
}

fn load_meta(meta_path: &Path) -> Result<MetaState> {
    let doc = match fs::read(meta_path) {
        Ok(doc) => doc,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(MetaState::default()),
        Err(err) => return Err(err.into()),
    };
    if doc.is_empty() {
        return Ok(MetaState::default());
    }
    serde_json::from_slice(&doc).map_err(|e| Error::Serialization(e.to_string()))
}
