#![allow(dead_code)]

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use async_trait::async_trait;
use herald_delivery::{
    DeliveryError, EmailMessage, EmailTransport, PipelineConfig, RateLimitConfig, SmsMessage,
    SmsTransport, TransientError, Transports,
};

/// Transport that records what it sends, and fails transiently while `failing` is set
pub struct MockTransport<M> {
    pub sent: parking_lot::Mutex<Vec<M>>,
    pub calls: AtomicU32,
    pub failing: AtomicBool,
}

impl<M> Default for MockTransport<M> {
    fn default() -> Self {
        Self {
            sent: parking_lot::Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
            failing: AtomicBool::new(false),
        }
    }
}

impl<M: Clone> MockTransport<M> {
    pub fn failing() -> Arc<Self> {
        let transport = Self::default();
        transport.failing.store(true, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<M> {
        self.sent.lock().clone()
    }

    fn record(&self, message: &M) -> Result<(), DeliveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.failing.load(Ordering::SeqCst) {
            return Err(TransientError::Unavailable("gateway down".to_string()).into());
        }

        self.sent.lock().push(message.clone());
        Ok(())
    }
}

pub type MockEmail = MockTransport<EmailMessage>;
pub type MockSms = MockTransport<SmsMessage>;

#[async_trait]
impl EmailTransport for MockEmail {
    async fn send(&self, message: &EmailMessage) -> Result<(), DeliveryError> {
        self.record(message)
    }
}

#[async_trait]
impl SmsTransport for MockSms {
    async fn send(&self, message: &SmsMessage) -> Result<(), DeliveryError> {
        self.record(message)
    }
}

pub fn transports(email: &Arc<MockEmail>, sms: &Arc<MockSms>) -> Transports {
    Transports {
        email: Some(Arc::clone(email) as Arc<dyn EmailTransport>),
        sms: Some(Arc::clone(sms) as Arc<dyn SmsTransport>),
    }
}

/// Limits high enough that throttling never shows up in timing assertions
pub fn unthrottled() -> PipelineConfig {
    PipelineConfig {
        rate_limit: RateLimitConfig {
            rate_per_second: 10_000.0,
            burst_size: 10_000,
            service_limits: ahash::AHashMap::default(),
        },
        ..PipelineConfig::default()
    }
}
