//! Virtual user identities and sessions
//!
//! Each virtual user maps to a slot, and each slot to one deterministic test
//! account. Acquiring a session is a two-step strategy: log in with the
//! slot's credentials, and register the account when login fails. The result
//! is an [`AuthOutcome`] the cycle branches on.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::client::{ApiClient, HttpOutcome};
use crate::config::IdentitySettings;
use crate::metrics::{names, MetricsSink};

/// Account type sent on signup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    Player,
    Voter,
    Fan,
}

/// Test account credentials. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub email: String,
    pub password: String,
    pub kind: IdentityKind,
    pub first_name: String,
    pub last_name: String,
}

impl Identity {
    /// Signup payload for this identity
    pub fn signup_request(&self, settings: &IdentitySettings) -> SignupRequest {
        SignupRequest {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: self.email.clone(),
            password1: self.password.clone(),
            password2: self.password.clone(),
            city: settings.city.clone(),
            country: settings.country.clone(),
            kind: self.kind,
        }
    }

    /// A never-before-used identity, `{registrant_prefix}-{suffix}@{domain}`.
    ///
    /// Pooled emails are the pool prefix followed by digits only, so the
    /// dash keeps one-off emails out of the pool's namespace as long as
    /// neither prefix starts with the other (checked by config validation).
    pub fn one_off(settings: &IdentitySettings, suffix: &str) -> Self {
        Self {
            email: format!(
                "{}-{}@{}",
                settings.registrant_prefix, suffix, settings.email_domain
            ),
            password: settings.password.clone(),
            kind: settings.registrant_kind,
            first_name: "New".to_string(),
            last_name: format!("User{}", suffix),
        }
    }
}

/// Body of `POST /api/auth/signup`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password1: String,
    pub password2: String,
    pub city: String,
    pub country: String,
    #[serde(rename = "type")]
    pub kind: IdentityKind,
}

/// How a session was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    Login,
    Signup,
}

/// Bearer session, owned by the cycle that fetched it
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub obtained_at: DateTime<Utc>,
    pub expires_in: Option<u64>,
    pub origin: SessionOrigin,
}

impl Session {
    /// Session from an auth response carrying a non-empty token
    pub fn from_outcome(outcome: &HttpOutcome, origin: SessionOrigin) -> Option<Self> {
        outcome.token().map(|token| Self {
            token,
            obtained_at: Utc::now(),
            expires_in: outcome.field("/expires_in").and_then(|v| v.as_u64()),
            origin,
        })
    }
}

/// Result of identity acquisition
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    Authenticated(Session),
    /// Both login and signup failed; authenticated steps are skipped this cycle
    Unauthenticated,
}

impl AuthOutcome {
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::Authenticated(session) => Some(session),
            Self::Unauthenticated => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }
}

/// Mapping from VU index to identity slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotSpace {
    /// `slot = vu % n`
    Bounded(u64),
    /// `slot = vu`
    Unbounded,
}

impl SlotSpace {
    pub fn from_slots(slots: u64) -> Self {
        if slots == 0 {
            Self::Unbounded
        } else {
            Self::Bounded(slots)
        }
    }

    pub fn slot_for(&self, vu: u64) -> u64 {
        match self {
            Self::Bounded(n) => vu % n,
            Self::Unbounded => vu,
        }
    }
}

/// Lazily populated pool of slot identities
pub struct IdentityPool {
    settings: IdentitySettings,
    space: SlotSpace,
    identities: DashMap<u64, Arc<Identity>>,
}

impl IdentityPool {
    pub fn new(settings: IdentitySettings) -> Self {
        let space = SlotSpace::from_slots(settings.slots);
        Self {
            settings,
            space,
            identities: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &IdentitySettings {
        &self.settings
    }

    pub fn slot_for(&self, vu: u64) -> u64 {
        self.space.slot_for(vu)
    }

    /// Identity of `slot`, created on first use
    pub fn identity(&self, slot: u64) -> Arc<Identity> {
        self.identities
            .entry(slot)
            .or_insert_with(|| {
                Arc::new(Identity {
                    email: format!(
                        "{}{}@{}",
                        self.settings.email_prefix, slot, self.settings.email_domain
                    ),
                    password: self.settings.password.clone(),
                    kind: self.settings.kind,
                    first_name: self.settings.first_name.clone(),
                    last_name: format!("User{}", slot),
                })
            })
            .clone()
    }

    /// Identities materialized so far
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Log in as the slot's identity, registering it when login fails.
    ///
    /// Never fails: exhausting both steps yields [`AuthOutcome::Unauthenticated`].
    pub async fn acquire(&self, slot: u64, client: &ApiClient, metrics: &MetricsSink) -> AuthOutcome {
        let identity = self.identity(slot);

        let login = client.login(&identity.email, &identity.password).await;
        let session = login
            .status_is(200)
            .then(|| Session::from_outcome(&login, SessionOrigin::Login))
            .flatten();
        metrics.record_http(&login, login.is_success(), &[]);
        metrics.rate(names::CHECKS, session.is_some(), &[("check", "login returns token")]);
        if let Some(session) = session {
            return AuthOutcome::Authenticated(session);
        }
        debug!(slot, email = %identity.email, status = %login.describe(), "Login failed, registering identity");

        let signup = client.signup(&identity.signup_request(&self.settings)).await;
        let session = signup
            .is_success()
            .then(|| Session::from_outcome(&signup, SessionOrigin::Signup))
            .flatten();
        metrics.record_http(&signup, session.is_some(), &[]);
        if let Some(session) = session {
            metrics.add(names::USERS_CREATED, 1.0, &[("source", "pool")]);
            return AuthOutcome::Authenticated(session);
        }

        // A concurrent cycle may have registered the same slot first
        if self.settings.log_signup_conflicts {
            warn!(slot, email = %identity.email, status = %signup.describe(), "Signup failed, continuing unauthenticated");
        } else {
            debug!(slot, email = %identity.email, status = %signup.describe(), "Signup failed, continuing unauthenticated");
        }
        metrics.add(names::IDENTITY_UNAUTHENTICATED, 1.0, &[]);
        AuthOutcome::Unauthenticated
    }
}

/// Random alphanumeric suffix used to avoid collisions
pub fn random_suffix<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_bounded_slots_wrap() {
        let space = SlotSpace::from_slots(100);
        assert_eq!(space.slot_for(7), 7);
        assert_eq!(space.slot_for(107), 7);
        assert_eq!(SlotSpace::from_slots(0).slot_for(107), 107);
    }

    #[test]
    fn test_same_slot_same_identity() {
        let pool = IdentityPool::new(IdentitySettings::default());
        let a = pool.identity(pool.slot_for(3));
        let b = pool.identity(pool.slot_for(103));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.email, "loadtest3@example.com");
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_signup_request_shape() {
        let settings = IdentitySettings::default();
        let pool = IdentityPool::new(settings.clone());
        let request = pool.identity(5).signup_request(&settings);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["type"], "player");
        assert_eq!(json["password1"], json["password2"]);
        assert_eq!(json["last_name"], "User5");
        assert_eq!(json["city"], "Cali");
    }

    #[test]
    fn test_one_off_identity_is_outside_pool_namespace() {
        let settings = IdentitySettings::default();
        let mut rng = StdRng::seed_from_u64(1);
        let suffix = random_suffix(&mut rng, 6);
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));

        let identity = Identity::one_off(&settings, &suffix);
        assert_eq!(identity.email, format!("newuser-{}@example.com", suffix));
        assert_eq!(identity.kind, IdentityKind::Voter);
    }

    #[test]
    fn test_one_off_never_matches_a_pool_slot() {
        let mut settings = IdentitySettings::default();
        settings.registrant_prefix = "load".to_string();
        let pool = IdentityPool::new(settings.clone());

        let one_off = Identity::one_off(&settings, "test12");
        assert_eq!(one_off.email, "load-test12@example.com");
        assert_ne!(one_off.email, pool.identity(12).email);
    }
}
