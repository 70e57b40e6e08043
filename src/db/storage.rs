// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Object storage for waypoint photos and uploaded GPX files.

use crate::error::AppError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{Arc, RwLock};

/// Blob storage with public URLs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload `bytes` and return the object's public URL.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, AppError>;

    async fn remove(&self, bucket: &str, path: &str) -> Result<(), AppError>;

    /// Set the rider's access token used for storage policies.
    fn set_access_token(&self, _token: Option<String>) {}
}

/// Client for the hosted backend's storage API.
#[derive(Clone)]
pub struct RestBlobStore {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    access_token: Arc<RwLock<Option<String>>>,
}

impl RestBlobStore {
    pub fn new(base_url: &str, anon_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("{}/storage/v1", base_url.trim_end_matches('/')),
            anon_key: anon_key.to_string(),
            access_token: Arc::new(RwLock::new(None)),
        }
    }

    fn bearer(&self) -> String {
        self.access_token
            .read()
            .ok()
            .and_then(|t| t.clone())
            .unwrap_or_else(|| self.anon_key.clone())
    }

    fn object_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/object/{}/{}",
            self.base_url,
            bucket,
            encode_path(path)
        )
    }

    /// Public URL of an object in a public bucket.
    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/object/public/{}/{}",
            self.base_url,
            bucket,
            encode_path(path)
        )
    }
}

/// Percent-encode each path segment, keeping the separators.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

async fn check_response(response: reqwest::Response) -> Result<(), AppError> {
    if response.status().is_success() {
        return Ok(());
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(AppError::Storage(format!("HTTP {}: {}", status, body)))
}

#[async_trait]
impl BlobStore for RestBlobStore {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, AppError> {
        let response = self
            .http
            .post(self.object_url(bucket, path))
            .header("apikey", &self.anon_key)
            .bearer_auth(self.bearer())
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;
        check_response(response).await?;

        tracing::info!(bucket, path, "Object uploaded");
        Ok(self.public_url(bucket, path))
    }

    async fn remove(&self, bucket: &str, path: &str) -> Result<(), AppError> {
        let response = self
            .http
            .delete(self.object_url(bucket, path))
            .header("apikey", &self.anon_key)
            .bearer_auth(self.bearer())
            .send()
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;
        check_response(response).await
    }

    fn set_access_token(&self, token: Option<String>) {
        if let Ok(mut t) = self.access_token.write() {
            *t = token;
        }
    }
}

/// In-process blob store. URLs use the `memory://` scheme.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<DashMap<String, (String, Vec<u8>)>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(bucket: &str, path: &str) -> String {
        format!("{}/{}", bucket, path)
    }

    /// Stored bytes and content type of an object.
    pub fn get(&self, bucket: &str, path: &str) -> Option<(String, Vec<u8>)> {
        self.objects
            .get(&Self::key(bucket, path))
            .map(|o| o.value().clone())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, AppError> {
        let key = Self::key(bucket, path);
        if self.objects.contains_key(&key) {
            return Err(AppError::Storage(format!("Object already exists: {}", key)));
        }
        self.objects
            .insert(key.clone(), (content_type.to_string(), bytes));
        Ok(format!("memory://{}", key))
    }

    async fn remove(&self, bucket: &str, path: &str) -> Result<(), AppError> {
        self.objects.remove(&Self::key(bucket, path));
        Ok(())
    }
}
