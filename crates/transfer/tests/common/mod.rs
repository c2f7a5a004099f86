//! In-memory storage node shared by the end-to-end tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use cipherpart_crypto::{AccountKeys, LocalCrypto};
use cipherpart_network::{
    FormData, NetworkError, NetworkFuture, NetworkMiddleware, NetworkResponse, StorageClient,
    verify_envelope,
};
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

pub const NODE: &str = "http://node.test";
pub const CDN: &str = "http://cdn.test/objects";

#[derive(Debug, Clone, Default)]
pub struct StoredObject {
    pub size_on_disk: u64,
    pub end_index: u64,
    pub metadata: Bytes,
    /// Keyed by 1-based part index.
    pub parts: BTreeMap<u64, Bytes>,
    pub finalized: bool,
}

impl StoredObject {
    pub fn bytes(&self) -> Vec<u8> {
        self.parts.values().flat_map(|p| p.iter().copied()).collect()
    }
}

/// Storage node living in memory, with switches for injected failures.
#[derive(Default)]
pub struct MemoryNode {
    objects: Mutex<HashMap<String, StoredObject>>,
    calls: Mutex<Vec<String>>,
    /// 1-based part indices in the order the node stored them.
    stored_parts: Mutex<Vec<u64>>,
    pub offline: AtomicBool,
    /// Upload POSTs still to answer with 503.
    pub failing_uploads: AtomicU32,
    /// Answer every upload POST with 400.
    pub reject_uploads: AtomicBool,
    /// Ranged GETs still to answer with 503.
    pub failing_fetches: AtomicU32,
    pub upload_delay_ms: AtomicU64,
}

impl MemoryNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls recorded exactly as `call`, e.g. `"POST /api/v1/upload"`.
    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    pub fn stored_parts(&self) -> Vec<u64> {
        self.stored_parts.lock().unwrap().clone()
    }

    pub fn object(&self, location: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(location).cloned()
    }

    /// Flips one stored ciphertext byte.
    pub fn corrupt(&self, location: &str, offset: usize) {
        let mut objects = self.objects.lock().unwrap();
        let object = objects.get_mut(location).unwrap();
        let mut data = object.bytes();
        data[offset] ^= 0x01;
        // Keep the one-part-per-entry shape of the flattened object.
        let mut parts = BTreeMap::new();
        let mut start = 0;
        for (index, part) in &object.parts {
            parts.insert(*index, Bytes::copy_from_slice(&data[start..start + part.len()]));
            start += part.len();
        }
        object.parts = parts;
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn handle_get(&self, url: &str, headers: &[(String, String)]) -> NetworkResponse {
        if url == format!("{NODE}/") {
            return NetworkResponse::new(200, "ok");
        }
        let Some(rest) = url.strip_prefix(CDN) else {
            return NetworkResponse::new(404, "not found");
        };
        let mut segments = rest.trim_start_matches('/').split('/');
        let (Some(location), Some(kind)) = (segments.next(), segments.next()) else {
            return NetworkResponse::new(404, "not found");
        };
        let Some(object) = self.object(location) else {
            return NetworkResponse::new(404, "no such object");
        };
        match kind {
            "metadata" => NetworkResponse::new(200, object.metadata.clone()),
            "file" => {
                if self
                    .failing_fetches
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
                {
                    return NetworkResponse::new(503, "busy");
                }
                let Some((start, end)) = headers
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case("range"))
                    .and_then(|(_, value)| parse_range(value))
                else {
                    return NetworkResponse::new(400, "missing range");
                };
                let data = object.bytes();
                if end >= data.len() {
                    return NetworkResponse::new(416, "range not satisfiable");
                }
                NetworkResponse::new(206, data[start..=end].to_vec())
            }
            _ => NetworkResponse::new(404, "not found"),
        }
    }

    fn handle_post(&self, path: &str, form: &FormData) -> NetworkResponse {
        let fields = match verify_envelope(form) {
            Ok(fields) => fields,
            Err(e) => return NetworkResponse::new(401, e.to_string()),
        };
        let location = fields["fileHandle"].as_str().unwrap_or_default().to_string();
        let mut objects = self.objects.lock().unwrap();
        match path {
            "/api/v1/init-upload" => {
                let object = StoredObject {
                    size_on_disk: fields["fileSizeInByte"].as_u64().unwrap(),
                    end_index: fields["endIndex"].as_u64().unwrap(),
                    metadata: form.get_file("metadata").cloned().unwrap_or_default(),
                    ..StoredObject::default()
                };
                objects.insert(location, object);
                NetworkResponse::new(200, "{}")
            }
            "/api/v1/upload" => {
                if self.reject_uploads.load(Ordering::SeqCst) {
                    return NetworkResponse::new(400, "rejected");
                }
                if self
                    .failing_uploads
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
                {
                    return NetworkResponse::new(503, "busy");
                }
                let Some(object) = objects.get_mut(&location) else {
                    return NetworkResponse::new(404, "no such object");
                };
                let index = fields["partIndex"].as_u64().unwrap();
                assert_eq!(fields["endIndex"].as_u64().unwrap(), object.end_index);
                if index == 0 || index > object.end_index {
                    return NetworkResponse::new(400, "part index out of range");
                }
                let data = form.get_file("chunkData").cloned().unwrap_or_default();
                object.parts.insert(index, data);
                self.stored_parts.lock().unwrap().push(index);
                NetworkResponse::new(200, "{}")
            }
            "/api/v1/upload-status" => {
                let Some(object) = objects.get_mut(&location) else {
                    return NetworkResponse::new(404, "no such object");
                };
                let missing: Vec<u64> = (1..=object.end_index)
                    .filter(|i| !object.parts.contains_key(i))
                    .collect();
                let status = if missing.is_empty() {
                    object.finalized = true;
                    "File is uploaded"
                } else {
                    "File is incomplete"
                };
                let body = serde_json::json!({
                    "status": status,
                    "missingIndexes": missing,
                    "endIndex": object.end_index,
                });
                NetworkResponse::new(200, body.to_string())
            }
            "/api/v1/download" => {
                let id = fields["fileID"].as_str().unwrap_or_default();
                if !objects.contains_key(id) {
                    return NetworkResponse::new(404, "no such object");
                }
                let body = serde_json::json!({ "fileDownloadUrl": format!("{CDN}/{id}") });
                NetworkResponse::new(200, body.to_string())
            }
            _ => NetworkResponse::new(404, "not found"),
        }
    }
}

fn parse_range(value: &str) -> Option<(usize, usize)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

impl NetworkMiddleware for MemoryNode {
    fn get(
        &self,
        url: String,
        headers: Vec<(String, String)>,
    ) -> NetworkFuture<'_, NetworkResponse> {
        Box::pin(async move {
            let path = url
                .strip_prefix(NODE)
                .or_else(|| url.strip_prefix(CDN).and_then(|r| r.rfind('/').map(|i| &r[i..])))
                .unwrap_or(&url)
                .to_string();
            self.record(format!("GET {path}"));
            if self.offline.load(Ordering::SeqCst) {
                return Err(NetworkError::Http("connection refused".into()));
            }
            Ok(self.handle_get(&url, &headers))
        })
    }

    fn post(&self, url: String, form: FormData) -> NetworkFuture<'_, NetworkResponse> {
        Box::pin(async move {
            let path = url.strip_prefix(NODE).unwrap_or(&url).to_string();
            self.record(format!("POST {path}"));
            if self.offline.load(Ordering::SeqCst) {
                return Err(NetworkError::Http("connection refused".into()));
            }
            let delay = self.upload_delay_ms.load(Ordering::SeqCst);
            if path == "/api/v1/upload" && delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            Ok(self.handle_post(&path, &form))
        })
    }
}

pub fn client(node: &Arc<MemoryNode>) -> StorageClient {
    let crypto = Arc::new(LocalCrypto::new(AccountKeys::generate()));
    StorageClient::new(NODE, Arc::clone(node) as Arc<dyn NetworkMiddleware>, crypto)
}

/// Deterministic pseudo-random payload.
pub fn payload(len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(len as u64);
    let mut data = vec![0u8; len];
    rng.fill(data.as_mut_slice());
    data
}
