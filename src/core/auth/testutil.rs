//! Shared fixtures for auth tests

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use uuid::Uuid;

use crate::core::auth::api::AuthApiState;
use crate::core::auth::audit::{AuditError, AuditEvent, AuditEventKind, AuditNotifier, AuditSink};
use crate::core::auth::authenticator::RequestAuthenticator;
use crate::core::auth::directory::{AccountDirectory, InMemoryAccountDirectory};
use crate::core::auth::jwt::{JwtConfig, JwtService};
use crate::core::auth::password::{BcryptPasswordVerifier, PasswordVerifier};
use crate::core::auth::session::{AuthResponse, LoginRequest, SessionManager};
use crate::core::config::SessionSettings;
use crate::core::db::models::{Account, Role};
use crate::core::store::{InMemoryStore, KeyValueStore, SessionStore};

pub const TEST_SECRET: &str = "medgate_test_secret_key_that_is_long_enough";
pub const DOCTOR_EMAIL: &str = "doc@hospital.test";
pub const DOCTOR_PASSWORD: &str = "Sunshine!42";

/// Audit sink that remembers every event and can be told to fail
#[derive(Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
    failing: AtomicBool,
}

impl RecordingAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn events_of(&self, kind: AuditEventKind) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.kind == kind)
            .collect()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn notify(&self, event: &AuditEvent) -> Result<(), AuditError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuditError("audit backend down".to_string()));
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub fn account(email: &str, password: &str, role: Role) -> Account {
    Account {
        id: Uuid::new_v4(),
        email: email.to_string(),
        display_name: "Dr. Grey".to_string(),
        role,
        is_active: true,
        password_hash: bcrypt::hash(password, 4).unwrap(),
        last_login_at: None,
    }
}

/// Session manager and authenticator wired over in-memory collaborators
pub struct Harness {
    pub jwt: JwtService,
    pub backend: Arc<InMemoryStore>,
    pub store: SessionStore,
    pub directory: InMemoryAccountDirectory,
    pub audit: Arc<RecordingAuditSink>,
    pub settings: SessionSettings,
    pub sessions: SessionManager,
    pub authenticator: RequestAuthenticator,
    pub doctor: Account,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_settings(SessionSettings::default()).await
    }

    pub async fn with_settings(settings: SessionSettings) -> Self {
        Self::builder().settings(settings).build().await
    }

    /// Manager and authenticator consult `directory`; the doctor is seeded elsewhere
    pub async fn with_directory(
        directory: Arc<dyn AccountDirectory>,
        settings: SessionSettings,
    ) -> Self {
        Self::builder()
            .directory(directory)
            .settings(settings)
            .build()
            .await
    }

    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }
}

/// Overrides for the collaborators a [`Harness`] wires together
#[derive(Default)]
pub struct HarnessBuilder {
    directory: Option<Arc<dyn AccountDirectory>>,
    passwords: Option<Arc<dyn PasswordVerifier>>,
    store: Option<(Arc<InMemoryStore>, Arc<dyn KeyValueStore>)>,
    settings: SessionSettings,
}

impl HarnessBuilder {
    pub fn directory(mut self, directory: Arc<dyn AccountDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn passwords(mut self, passwords: Arc<dyn PasswordVerifier>) -> Self {
        self.passwords = Some(passwords);
        self
    }

    /// Sessions go through `front`, which sits on top of `backend`
    pub fn store(mut self, backend: Arc<InMemoryStore>, front: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some((backend, front));
        self
    }

    pub fn settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub async fn build(self) -> Harness {
        let settings = self.settings;
        let jwt = JwtService::new(JwtConfig::new(TEST_SECRET));
        let (backend, front) = match self.store {
            Some(pair) => pair,
            None => {
                let backend = Arc::new(InMemoryStore::default());
                (backend.clone(), backend as Arc<dyn KeyValueStore>)
            }
        };
        backend.open().await.unwrap();
        let store = SessionStore::new(front);

        let seeded = InMemoryAccountDirectory::new();
        let doctor = account(DOCTOR_EMAIL, DOCTOR_PASSWORD, Role::Doctor);
        seeded.upsert(doctor.clone());
        let directory: Arc<dyn AccountDirectory> = match self.directory {
            Some(directory) => directory,
            None => Arc::new(seeded.clone()),
        };
        let passwords: Arc<dyn PasswordVerifier> = match self.passwords {
            Some(passwords) => passwords,
            None => Arc::new(BcryptPasswordVerifier),
        };

        let audit = Arc::new(RecordingAuditSink::default());
        let notifier = AuditNotifier::new(audit.clone()).inline();

        let sessions = SessionManager::new(
            jwt.clone(),
            store.clone(),
            directory.clone(),
            passwords,
            notifier.clone(),
            settings,
        );
        let authenticator =
            RequestAuthenticator::new(jwt.clone(), store.clone(), directory, notifier, settings);

        Harness {
            jwt,
            backend,
            store,
            directory: seeded,
            audit,
            settings,
            sessions,
            authenticator,
            doctor,
        }
    }
}

impl Harness {
    pub fn api_state(&self) -> AuthApiState {
        AuthApiState {
            sessions: self.sessions.clone(),
            authenticator: self.authenticator.clone(),
        }
    }

    pub async fn login_doctor(&self) -> AuthResponse {
        self.sessions
            .login(
                LoginRequest {
                    email: DOCTOR_EMAIL.to_string(),
                    password: DOCTOR_PASSWORD.to_string(),
                },
                None,
            )
            .await
            .unwrap()
    }

    /// Simulate a session store outage
    pub async fn take_store_down(&self) {
        self.backend.close().await.unwrap();
    }

    pub async fn bring_store_up(&self) {
        self.backend.open().await.unwrap();
    }
}
