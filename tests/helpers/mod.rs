//! In-memory collaborators for driving classification passes in tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use image_description::config::{CostModel, RetryPolicy};
use image_description::models::image::ImageRecord;
use image_description::models::label::Label;
use image_description::services::batch::BatchClassifier;
use image_description::services::classifier::{Classification, Classifier, ClassifyError};
use image_description::services::storage::{ReadUrlSigner, StorageError};
use image_description::services::store::{RecordStore, StoreError};

/// Record store keeping rows in insertion order.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<ImageRecord>>,
    /// Number of upcoming `query_unclassified` calls that fail.
    failing_queries: AtomicU32,
    /// Zero-based index of the `write_chunk` call that fails, if any.
    failing_chunk: Mutex<Option<usize>>,
    chunk_calls: AtomicU32,
}

impl MemoryStore {
    pub fn with_records(records: Vec<ImageRecord>) -> Arc<Self> {
        let store = Self::default();
        *store.rows.lock().unwrap() = records;
        Arc::new(store)
    }

    pub fn fail_next_queries(&self, n: u32) {
        self.failing_queries.store(n, Ordering::SeqCst);
    }

    pub fn fail_chunk(&self, index: usize) {
        *self.failing_chunk.lock().unwrap() = Some(index);
    }

    pub fn chunk_calls(&self) -> u32 {
        self.chunk_calls.load(Ordering::SeqCst)
    }

    pub fn get(&self, request_id: &str, image_id: &str) -> Option<ImageRecord> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.request_id == request_id && r.image_id == image_id)
            .cloned()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn query_unclassified(&self, request_id: &str) -> Result<Vec<ImageRecord>, StoreError> {
        let failing = self.failing_queries.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_queries.store(failing - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("table unreachable".to_string()));
        }
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.request_id == request_id && !r.is_classified())
            .cloned()
            .collect())
    }

    async fn write_chunk(&self, _request_id: &str, chunk: &[ImageRecord]) -> Result<(), StoreError> {
        let call = self.chunk_calls.fetch_add(1, Ordering::SeqCst) as usize;
        if *self.failing_chunk.lock().unwrap() == Some(call) {
            return Err(StoreError::Unavailable("throughput exceeded".to_string()));
        }
        let mut rows = self.rows.lock().unwrap();
        for record in chunk {
            match rows
                .iter_mut()
                .find(|r| r.request_id == record.request_id && r.image_id == record.image_id)
            {
                Some(existing) => *existing = record.clone(),
                None => rows.push(record.clone()),
            }
        }
        Ok(())
    }
}

/// Canned answer of the scripted classifier.
#[derive(Debug, Clone)]
pub enum Reply {
    Label(Option<Label>, u64),
    RateLimited(u32),
    ServerError,
    Rejected,
}

/// Classifier answering from a script, in call order.
pub struct ScriptedClassifier {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    calls: Mutex<Vec<String>>,
}

impl ScriptedClassifier {
    pub fn new(script: Vec<Reply>) -> Arc<Self> {
        Self::with_fallback(script, Reply::Label(Some(Label::Animal), 100))
    }

    pub fn with_fallback(script: Vec<Reply>, fallback: Reply) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// URLs classified so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, image_url: &str, _prompt: &str) -> Result<Classification, ClassifyError> {
        self.calls.lock().unwrap().push(image_url.to_string());
        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match reply {
            Reply::Label(label, total_tokens) => Ok(Classification { label, total_tokens }),
            Reply::RateLimited(remaining) => Err(ClassifyError::RateLimited { remaining }),
            Reply::ServerError => Err(ClassifyError::Server { status: 503 }),
            Reply::Rejected => Err(ClassifyError::Rejected {
                status: 401,
                message: "invalid api key".to_string(),
            }),
        }
    }
}

/// Signs keys as `https://signed.test/<key>`.
pub struct StaticSigner;

#[async_trait]
impl ReadUrlSigner for StaticSigner {
    async fn read_url(&self, key: &str) -> Result<String, StorageError> {
        Ok(format!("https://signed.test/{}", key))
    }
}

pub fn signed_url(record: &ImageRecord) -> String {
    format!("https://signed.test/{}", record.source_ref)
}

pub fn batch_classifier(
    store: Arc<MemoryStore>,
    classifier: Arc<ScriptedClassifier>,
    policy: RetryPolicy,
) -> BatchClassifier {
    BatchClassifier::new(
        store,
        Arc::new(StaticSigner),
        classifier,
        policy,
        CostModel {
            price_per_token: 0.00001,
            fixed_per_image_cost: 0.001,
        },
    )
}

pub fn ids(records: &[ImageRecord]) -> Vec<String> {
    records.iter().map(|r| r.image_id.clone()).collect()
}
