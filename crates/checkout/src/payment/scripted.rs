//! Payment provider with scripted answers, for tests and local runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Capture, CreatedPayment, PaymentError, PaymentProvider, PaymentRequest};

/// How the next provider call answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScriptedOutcome {
    #[default]
    Succeed,
    /// Capture answers `success == false`; create answers `Declined`.
    Decline,
    /// HTTP 503.
    Error,
    /// Never answers.
    Hang,
}

/// In-process [`PaymentProvider`] whose behaviour is set by the caller.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    create: RwLock<ScriptedOutcome>,
    capture: RwLock<ScriptedOutcome>,
    capture_delay: RwLock<Duration>,
    create_calls: AtomicUsize,
    capture_calls: AtomicUsize,
    last_request: RwLock<Option<PaymentRequest>>,
}

impl ScriptedProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_create(&self, outcome: ScriptedOutcome) {
        *self.create.write().await = outcome;
    }

    pub async fn set_capture(&self, outcome: ScriptedOutcome) {
        *self.capture.write().await = outcome;
    }

    /// Delay every capture answer, so concurrent confirmations overlap.
    pub async fn set_capture_delay(&self, delay: Duration) {
        *self.capture_delay.write().await = delay;
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn capture_calls(&self) -> usize {
        self.capture_calls.load(Ordering::SeqCst)
    }

    /// The most recent `create_payment` request.
    pub async fn last_request(&self) -> Option<PaymentRequest> {
        self.last_request.read().await.clone()
    }
}

fn unavailable() -> PaymentError {
    PaymentError::Api {
        status: 503,
        message: "SERVICE_UNAVAILABLE".to_string(),
    }
}

async fn hang() {
    tokio::time::sleep(Duration::from_secs(3_600)).await;
}

#[async_trait]
impl PaymentProvider for ScriptedProvider {
    async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<CreatedPayment, PaymentError> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_request.write().await = Some(request.clone());

        match *self.create.read().await {
            ScriptedOutcome::Succeed => {
                let reference = format!("PAY-{n:04}");
                Ok(CreatedPayment {
                    approval_url: format!("https://provider.test/approve?token={reference}"),
                    reference,
                })
            }
            ScriptedOutcome::Decline => Err(PaymentError::Declined(
                "PAYEE_ACCOUNT_RESTRICTED".to_string(),
            )),
            ScriptedOutcome::Error => Err(unavailable()),
            ScriptedOutcome::Hang => {
                hang().await;
                Err(PaymentError::Timeout)
            }
        }
    }

    async fn capture(&self, reference: &str) -> Result<Capture, PaymentError> {
        self.capture_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.capture_delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match *self.capture.read().await {
            ScriptedOutcome::Succeed => Ok(Capture {
                success: true,
                provider_order_id: Some(format!("CAP-{reference}")),
                status: "COMPLETED".to_string(),
            }),
            ScriptedOutcome::Decline => Ok(Capture {
                success: false,
                provider_order_id: None,
                status: "INSTRUMENT_DECLINED".to_string(),
            }),
            ScriptedOutcome::Error => Err(unavailable()),
            ScriptedOutcome::Hang => {
                hang().await;
                Err(PaymentError::Timeout)
            }
        }
    }
}
