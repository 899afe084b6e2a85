//! Phone verification store with one active one-time code per phone.

use crate::clock::Clock;
use crate::delivery::CodeDelivery;
use crate::error::{RelayError, RelayResult};
use crate::phone::{normalize_phone, redact_phone};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

/// Default lifetime of an issued code.
pub const DEFAULT_CODE_TTL: std::time::Duration = std::time::Duration::from_secs(10 * 60);

/// Number of digits in a one-time code.
pub const CODE_LENGTH: usize = 6;

/// Verification state for one phone number.
#[derive(Debug, Clone)]
pub struct VerificationRecord {
    code: SecretString,
    pub expires_at: DateTime<Utc>,
    pub verified: bool,
    pub bound_username: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    consumed: bool,
}

impl VerificationRecord {
    fn new(code: SecretString, expires_at: DateTime<Utc>) -> Self {
        Self {
            code,
            expires_at,
            verified: false,
            bound_username: None,
            verified_at: None,
            consumed: false,
        }
    }

    fn matches(&self, candidate: &str) -> bool {
        !self.consumed && constant_time_eq(self.code.expose_secret(), candidate)
    }
}

/// A code that was stored and handed to the delivery channel.
#[derive(Debug)]
pub struct IssuedCode {
    /// Normalized phone number the code was issued for.
    pub phone: String,
    pub code: SecretString,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of a successful code check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPhone {
    pub phone: String,
    pub username: String,
    pub verified_at: DateTime<Utc>,
}

/// In-memory verification records keyed by normalized phone number.
pub struct VerificationStore {
    records: RwLock<HashMap<String, VerificationRecord>>,
    delivery: Arc<dyn CodeDelivery>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl VerificationStore {
    pub fn new(
        delivery: Arc<dyn CodeDelivery>,
        clock: Arc<dyn Clock>,
        ttl: std::time::Duration,
    ) -> Self {
        let ttl = Duration::from_std(ttl).unwrap_or_else(|_| Duration::minutes(10));
        Self {
            records: RwLock::new(HashMap::new()),
            delivery,
            clock,
            ttl,
        }
    }

    /// Issue a fresh code for `phone`, replacing any earlier one, and hand it
    /// to the delivery channel.
    #[instrument(skip(self, phone), fields(phone = %redact_phone(phone)))]
    pub async fn request_code(&self, phone: &str) -> RelayResult<IssuedCode> {
        let phone = normalize_phone(phone)?;
        let code = generate_code();
        let expires_at = self.clock.now() + self.ttl;

        let previous = {
            let mut records = self.records.write().await;
            records.insert(
                phone.clone(),
                VerificationRecord::new(code.clone(), expires_at),
            )
        };

        if let Err(e) = self.delivery.deliver(&phone, &code).await {
            warn!(error = %e, "Code delivery failed");
            self.roll_back(&phone, &code, previous).await;
            return Err(e);
        }

        info!(%expires_at, "Verification code issued");

        Ok(IssuedCode {
            phone,
            code,
            expires_at,
        })
    }

    /// Undo an insert whose code never reached the user. A record replaced
    /// by a newer request in the meantime is left alone.
    async fn roll_back(
        &self,
        phone: &str,
        undelivered: &SecretString,
        previous: Option<VerificationRecord>,
    ) {
        let mut records = self.records.write().await;
        let ours = records.get(phone).is_some_and(|r| {
            !r.consumed && r.code.expose_secret() == undelivered.expose_secret()
        });
        if !ours {
            return;
        }

        match previous {
            Some(record) => {
                records.insert(phone.to_string(), record);
                debug!("Restored previous verification record");
            }
            None => {
                records.remove(phone);
            }
        }
    }

    /// Check `code` for `phone` and bind the phone to `username` on success.
    #[instrument(skip(self, phone, code), fields(phone = %redact_phone(phone)))]
    pub async fn verify_code(
        &self,
        phone: &str,
        code: &str,
        username: &str,
    ) -> RelayResult<VerifiedPhone> {
        if phone.is_empty() || code.is_empty() || username.is_empty() {
            return Err(RelayError::MissingFields(
                "Phone, code, and username required",
            ));
        }

        let phone = normalize_phone(phone).map_err(|_| RelayError::PhoneNotFound)?;
        let now = self.clock.now();

        let mut records = self.records.write().await;
        let record = records.get_mut(&phone).ok_or(RelayError::PhoneNotFound)?;

        if now > record.expires_at {
            records.remove(&phone);
            debug!("Expired verification record discarded");
            return Err(RelayError::Expired);
        }

        if !record.matches(code) {
            debug!("Verification code mismatch");
            return Err(RelayError::CodeMismatch);
        }

        record.verified = true;
        record.consumed = true;
        record.bound_username = Some(username.to_string());
        record.verified_at = Some(now);

        info!(%username, "Phone verified");

        Ok(VerifiedPhone {
            phone,
            username: username.to_string(),
            verified_at: now,
        })
    }

    /// Join-time authorization: is `phone` verified and bound to `username`?
    pub async fn check_bound(&self, phone: &str, username: &str) -> RelayResult<()> {
        let phone = normalize_phone(phone).map_err(|_| RelayError::PhoneNotVerified)?;

        let records = self.records.read().await;
        let record = records
            .get(&phone)
            .filter(|r| r.verified)
            .ok_or(RelayError::PhoneNotVerified)?;

        if record.bound_username.as_deref() != Some(username) {
            return Err(RelayError::UsernameMismatch);
        }

        Ok(())
    }

    /// Snapshot of the record for `phone`.
    pub async fn get(&self, phone: &str) -> Option<VerificationRecord> {
        let phone = normalize_phone(phone).ok()?;
        self.records.read().await.get(&phone).cloned()
    }

    /// Number of stored records (pending and verified).
    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }
}

fn generate_code() -> SecretString {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    SecretString::new(format!("{:0width$}", n, width = CODE_LENGTH))
}

fn constant_time_eq(expected: &str, provided: &str) -> bool {
    expected.len() == provided.len()
        && expected
            .as_bytes()
            .iter()
            .zip(provided.as_bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::delivery::MemoryDelivery;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio_test::assert_ok;

    const PHONE: &str = "+15551234567";

    fn store() -> (VerificationStore, Arc<MemoryDelivery>, Arc<ManualClock>) {
        let delivery = Arc::new(MemoryDelivery::new());
        let clock = Arc::new(ManualClock::default());
        let store = VerificationStore::new(delivery.clone(), clock.clone(), DEFAULT_CODE_TTL);
        (store, delivery, clock)
    }

    /// Delivers into memory until told to fail.
    #[derive(Default)]
    struct SwitchableDelivery {
        inner: MemoryDelivery,
        failing: AtomicBool,
    }

    impl SwitchableDelivery {
        fn fail(&self) {
            self.failing.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl CodeDelivery for SwitchableDelivery {
        async fn deliver(&self, phone: &str, code: &SecretString) -> RelayResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(RelayError::DeliveryFailed("gateway down".into()));
            }
            self.inner.deliver(phone, code).await
        }
    }

    fn switchable_store() -> (VerificationStore, Arc<SwitchableDelivery>) {
        let delivery = Arc::new(SwitchableDelivery::default());
        let clock = Arc::new(ManualClock::default());
        let store = VerificationStore::new(delivery.clone(), clock, DEFAULT_CODE_TTL);
        (store, delivery)
    }

    fn wrong_code(code: &str) -> String {
        let first = if code.starts_with('0') { '1' } else { '0' };
        format!("{}{}", first, &code[1..])
    }

    #[test]
    fn test_generated_codes_are_six_digits() {
        for _ in 0..200 {
            let code = generate_code();
            let code = code.expose_secret();
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("123456", "123456"));
        assert!(!constant_time_eq("123456", "123457"));
        assert!(!constant_time_eq("123456", "12345"));
    }

    #[tokio::test]
    async fn test_request_code_delivers_and_stores() {
        let (store, delivery, clock) = store();

        let issued = store.request_code("+1 555 123-4567").await.unwrap();

        assert_eq!(issued.phone, PHONE);
        assert_eq!(
            delivery.last_code(PHONE).as_deref(),
            Some(issued.code.expose_secret().as_str())
        );
        assert_eq!(issued.expires_at, clock.now() + Duration::minutes(10));

        let record = store.get(PHONE).await.unwrap();
        assert!(!record.verified);
        assert!(record.bound_username.is_none());
    }

    #[tokio::test]
    async fn test_request_code_rejects_invalid_phone() {
        let (store, _, _) = store();
        assert_eq!(
            store.request_code("12345").await.unwrap_err(),
            RelayError::InvalidPhone
        );
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn test_verify_code_succeeds_exactly_once() {
        let (store, _, _) = store();
        let issued = store.request_code(PHONE).await.unwrap();
        let code = issued.code.expose_secret().clone();

        let verified = assert_ok!(store.verify_code(PHONE, &code, "alice").await);
        assert_eq!(verified.username, "alice");

        let record = store.get(PHONE).await.unwrap();
        assert!(record.verified);
        assert_eq!(record.bound_username.as_deref(), Some("alice"));
        assert!(record.verified_at.is_some());

        assert_eq!(
            store.verify_code(PHONE, &code, "mallory").await.unwrap_err(),
            RelayError::CodeMismatch
        );
        let record = store.get(PHONE).await.unwrap();
        assert_eq!(record.bound_username.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_verify_code_mismatch() {
        let (store, _, _) = store();
        let issued = store.request_code(PHONE).await.unwrap();

        let err = store
            .verify_code(PHONE, &wrong_code(issued.code.expose_secret()), "alice")
            .await
            .unwrap_err();

        assert_eq!(err, RelayError::CodeMismatch);
        assert!(!store.get(PHONE).await.unwrap().verified);
    }

    #[tokio::test]
    async fn test_verify_code_unknown_phone() {
        let (store, _, _) = store();
        assert_eq!(
            store.verify_code(PHONE, "123456", "alice").await.unwrap_err(),
            RelayError::PhoneNotFound
        );
        assert_eq!(
            store.verify_code("nonsense", "123456", "alice").await.unwrap_err(),
            RelayError::PhoneNotFound
        );
    }

    #[tokio::test]
    async fn test_verify_code_missing_fields() {
        let (store, _, _) = store();
        assert!(matches!(
            store.verify_code(PHONE, "", "alice").await,
            Err(RelayError::MissingFields(_))
        ));
        assert!(matches!(
            store.verify_code(PHONE, "123456", "").await,
            Err(RelayError::MissingFields(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_code_is_rejected_and_discarded() {
        let (store, _, clock) = store();
        let issued = store.request_code(PHONE).await.unwrap();
        let code = issued.code.expose_secret().clone();

        clock.advance(Duration::minutes(11));

        assert_eq!(
            store.verify_code(PHONE, &code, "alice").await.unwrap_err(),
            RelayError::Expired
        );
        assert!(store.get(PHONE).await.is_none());
        assert_eq!(
            store.verify_code(PHONE, &code, "alice").await.unwrap_err(),
            RelayError::PhoneNotFound
        );
    }

    #[tokio::test]
    async fn test_code_valid_until_exact_expiry() {
        let (store, _, clock) = store();
        let issued = store.request_code(PHONE).await.unwrap();

        clock.advance(Duration::minutes(10));

        assert_ok!(
            store
                .verify_code(PHONE, issued.code.expose_secret(), "alice")
                .await
        );
    }

    #[tokio::test]
    async fn test_consumed_code_expires_after_window() {
        let (store, _, clock) = store();
        let issued = store.request_code(PHONE).await.unwrap();
        let code = issued.code.expose_secret().clone();

        assert_ok!(store.verify_code(PHONE, &code, "alice").await);

        clock.advance(Duration::minutes(11));

        let err = store.verify_code(PHONE, &code, "alice").await.unwrap_err();
        assert_eq!(err, RelayError::Expired);
        assert!(err.to_string().starts_with("OTP expired"));
    }

    #[tokio::test]
    async fn test_new_request_supersedes_old_code() {
        let (store, _, _) = store();
        let first = store.request_code(PHONE).await.unwrap();
        let second = store.request_code(PHONE).await.unwrap();

        if first.code.expose_secret() != second.code.expose_secret() {
            assert_eq!(
                store
                    .verify_code(PHONE, first.code.expose_secret(), "alice")
                    .await
                    .unwrap_err(),
                RelayError::CodeMismatch
            );
        }
        assert_ok!(
            store
                .verify_code(PHONE, second.code.expose_secret(), "alice")
                .await
        );
    }

    #[tokio::test]
    async fn test_new_request_resets_verified_state() {
        let (store, _, _) = store();
        let issued = store.request_code(PHONE).await.unwrap();
        store
            .verify_code(PHONE, issued.code.expose_secret(), "alice")
            .await
            .unwrap();

        store.request_code(PHONE).await.unwrap();

        assert_eq!(
            store.check_bound(PHONE, "alice").await.unwrap_err(),
            RelayError::PhoneNotVerified
        );
    }

    #[tokio::test]
    async fn test_check_bound() {
        let (store, _, _) = store();
        assert_eq!(
            store.check_bound(PHONE, "alice").await.unwrap_err(),
            RelayError::PhoneNotVerified
        );

        let issued = store.request_code(PHONE).await.unwrap();
        assert_eq!(
            store.check_bound(PHONE, "alice").await.unwrap_err(),
            RelayError::PhoneNotVerified
        );

        store
            .verify_code(PHONE, issued.code.expose_secret(), "alice")
            .await
            .unwrap();

        assert_ok!(store.check_bound("+1 555 123 4567", "alice").await);
        assert_eq!(
            store.check_bound(PHONE, "bob").await.unwrap_err(),
            RelayError::UsernameMismatch
        );
    }

    #[tokio::test]
    async fn test_concurrent_verifies_succeed_once() {
        let (store, _, _) = store();
        let store = Arc::new(store);
        let issued = store.request_code(PHONE).await.unwrap();
        let code = issued.code.expose_secret().clone();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            let code = code.clone();
            handles.push(tokio::spawn(async move {
                store.verify_code(PHONE, &code, &format!("user{}", i)).await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn test_failed_delivery_keeps_verified_binding() {
        let (store, delivery) = switchable_store();
        let issued = store.request_code(PHONE).await.unwrap();
        store
            .verify_code(PHONE, issued.code.expose_secret(), "alice")
            .await
            .unwrap();

        delivery.fail();
        let err = store.request_code(PHONE).await.unwrap_err();
        assert!(matches!(err, RelayError::DeliveryFailed(_)));

        assert_ok!(store.check_bound(PHONE, "alice").await);
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn test_failed_delivery_keeps_pending_code() {
        let (store, delivery) = switchable_store();
        let issued = store.request_code(PHONE).await.unwrap();

        delivery.fail();
        assert!(store.request_code(PHONE).await.is_err());

        assert_ok!(
            store
                .verify_code(PHONE, issued.code.expose_secret(), "alice")
                .await
        );
    }

    #[tokio::test]
    async fn test_failed_first_delivery_leaves_no_record() {
        let (store, delivery) = switchable_store();
        delivery.fail();

        assert!(store.request_code(PHONE).await.is_err());

        assert_eq!(store.count().await, 0);
        assert!(store.get(PHONE).await.is_none());
    }
}
