//! Accounts and credentials.

use crate::error::AppError;
use crate::model::{Account, AccountRecord, Role, Student, Supervisor, newest_first};
use crate::store::{
    self, Collection, Filter, RecordStore, StoreError, document, fetch_all,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Role-specific attributes supplied at registration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleFields {
    pub department: Option<String>,
    pub matric_number: Option<String>,
    pub specialization: Option<String>,
    pub preference: Option<String>,
}

impl RoleFields {
    /// Blank strings count as absent.
    fn normalized(self) -> Self {
        RoleFields {
            department: present(self.department),
            matric_number: present(self.matric_number),
            specialization: present(self.specialization),
            preference: present(self.preference),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub role: String,
    #[serde(flatten)]
    pub fields: RoleFields,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub role: String,
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

pub(crate) fn required(value: &str, field: &'static str) -> Result<String, AppError> {
    present(Some(value.to_owned())).ok_or(AppError::MissingRequiredField(field))
}

fn require(value: &Option<String>, field: &'static str) -> Result<(), AppError> {
    if value.is_none() {
        return Err(AppError::MissingRequiredField(field));
    }
    Ok(())
}

pub(crate) fn normalize_email(email: &str) -> Result<String, AppError> {
    let email = required(email, "email")?.to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(AppError::InvalidEmail(email)),
    }
}

pub struct Identity {
    store: Arc<dyn RecordStore>,
}

impl Identity {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Create an account, and the matching student or supervisor profile
    /// under the same id.
    pub async fn register(&self, registration: Registration) -> Result<Account, AppError> {
        let name = required(&registration.name, "name")?;
        let email = normalize_email(&registration.email)?;
        if registration.password.is_empty() {
            return Err(AppError::MissingRequiredField("password"));
        }
        let role: Role = required(&registration.role, "role")?.parse()?;
        let fields = registration.fields.normalized();
        match role {
            Role::Supervisor => {
                require(&fields.department, "department")?;
                require(&fields.specialization, "specialization")?;
            }
            Role::Student => {
                require(&fields.department, "department")?;
                require(&fields.matric_number, "matricNumber")?;
            }
            Role::Admin => {}
        }

        let doc = document(json!({
            "name": name,
            "email": email,
            "role": role,
            "department": fields.department,
            "matricNumber": fields.matric_number,
            "specialization": fields.specialization,
            "isActive": true,
            "passwordHash": password::hash(&registration.password),
        }));
        let record: AccountRecord = match store::create_unique(&*self.store, doc, "email").await {
            Ok(record) => record,
            Err(StoreError::Duplicate { .. }) => return Err(AppError::DuplicateEmail(email)),
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = self.create_profile(&record, fields.preference).await {
            warn!(account = %record.id, error = %e, "cannot create profile, removing account");
            if let Err(e) = self.store.delete(Collection::Users, &record.id).await {
                error!(
                    account = %record.id,
                    error = %e,
                    "cannot remove account after failed registration",
                );
            }
            return Err(e);
        }
        info!(account = %record.id, %role, "account registered");
        Ok(record.into())
    }

    async fn create_profile(
        &self,
        record: &AccountRecord,
        preference: Option<String>,
    ) -> Result<(), AppError> {
        match record.role {
            Role::Student => {
                let profile = document(json!({
                    "_id": record.id,
                    "name": record.name,
                    "email": record.email,
                    "matricNumber": record.matric_number,
                    "department": record.department,
                    "preference": preference,
                    "assignedProject": null,
                }));
                store::create_unique::<Student>(&*self.store, profile, "matricNumber")
                    .await
                    .map_err(|e| match e {
                        StoreError::Duplicate { value, .. } => {
                            AppError::DuplicateMatricNumber(value)
                        }
                        e => e.into(),
                    })?;
            }
            Role::Supervisor => {
                store::create::<Supervisor>(
                    &*self.store,
                    document(json!({
                        "_id": record.id,
                        "name": record.name,
                        "email": record.email,
                        "department": record.department,
                        "specialization": record.specialization,
                        "projectsCount": 0,
                    })),
                )
                .await?;
            }
            Role::Admin => {}
        }
        Ok(())
    }

    pub async fn authenticate(&self, credentials: Credentials) -> Result<Account, AppError> {
        let email = required(&credentials.email, "email")?.to_lowercase();
        if credentials.password.is_empty() {
            return Err(AppError::MissingRequiredField("password"));
        }
        let role = match required(&credentials.role, "role")?.parse::<Role>() {
            Ok(role) => role,
            Err(_) => return Err(AppError::InvalidCredentials),
        };
        let record = fetch_all::<AccountRecord>(
            &*self.store,
            &Filter::new().eq("email", email.as_str()).eq("role", role.as_str()),
        )
        .await?
        .into_iter()
        .next()
        .ok_or(AppError::InvalidCredentials)?;
        if !password::verify(&credentials.password, &record.password_hash) {
            debug!(account = %record.id, "password mismatch");
            return Err(AppError::InvalidCredentials);
        }
        if !record.is_active {
            return Err(AppError::AccountDeactivated);
        }
        debug!(account = %record.id, "authenticated");
        Ok(record.into())
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>, AppError> {
        let mut records = fetch_all::<AccountRecord>(&*self.store, &Filter::new()).await?;
        newest_first(&mut records, |r| r.created_at);
        Ok(records.into_iter().map(Account::from).collect())
    }

    pub async fn count_accounts(&self) -> Result<usize, AppError> {
        Ok(self.store.query(Collection::Users, &Filter::new()).await?.len())
    }

    pub async fn set_active(&self, id: &str, active: bool) -> Result<Account, AppError> {
        let record = store::patch::<AccountRecord>(
            &*self.store,
            id,
            document(json!({ "isActive": active })),
        )
        .await?
        .ok_or_else(|| AppError::AccountNotFound(id.to_owned()))?;
        info!(account = %id, active, "account activation changed");
        Ok(record.into())
    }

    /// Delete every account. Profiles are kept.
    pub async fn purge_accounts(&self) -> Result<usize, AppError> {
        let removed = self.store.clear(Collection::Users).await?;
        warn!(removed, "all accounts purged");
        Ok(removed)
    }
}

mod password {
    use sha2::{Digest, Sha256};

    const SCHEME: &str = "sha256";

    fn digest(salt: &[u8], password: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(password.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// `sha256$<salt>$<digest>`, hex encoded.
    pub fn hash(password: &str) -> String {
        let salt: [u8; 16] = rand::random();
        format!("{SCHEME}${}${}", hex::encode(salt), digest(&salt, password))
    }

    pub fn verify(password: &str, stored: &str) -> bool {
        let mut parts = stored.splitn(3, '$');
        let (Some(SCHEME), Some(salt), Some(expected)) = (parts.next(), parts.next(), parts.next())
        else {
            return false;
        };
        let Ok(salt) = hex::decode(salt) else {
            return false;
        };
        let actual = digest(&salt, password);
        actual.len() == expected.len()
            && actual
                .bytes()
                .zip(expected.bytes())
                .fold(0, |acc, (a, b)| acc | (a ^ b))
                == 0
    }

    #[test]
    fn hashes_are_salted() {
        let a = hash("password123");
        let b = hash("password123");
        assert_ne!(a, b);
        assert!(verify("password123", &a));
        assert!(verify("password123", &b));
        assert!(!verify("password124", &a));
        assert!(!verify("password123", "hashed:password123"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FailingStore, MemoryStore, fetch};

    fn identity() -> Identity {
        Identity::new(Arc::new(MemoryStore::new()))
    }

    fn student(email: &str) -> Registration {
        Registration {
            name: "Student S".into(),
            email: email.into(),
            password: "secret".into(),
            role: "student".into(),
            fields: RoleFields {
                department: Some("CS".into()),
                matric_number: Some("CS001".into()),
                ..RoleFields::default()
            },
        }
    }

    #[tokio::test]
    async fn register_then_authenticate() {
        let identity = identity();
        let account = identity.register(student("S@Example.com ")).await.unwrap();
        assert_eq!(account.email, "s@example.com");
        assert_eq!(account.role, Role::Student);
        let json = serde_json::to_value(&account).unwrap();
        assert!(json.get("passwordHash").is_none());

        let logged = identity
            .authenticate(Credentials {
                email: "s@example.com".into(),
                password: "secret".into(),
                role: "student".into(),
            })
            .await
            .unwrap();
        assert_eq!(logged, account);

        let profile = fetch::<Student>(&*identity.store, &account.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(profile.matric_number, "CS001");
        assert!(profile.assigned_project.is_none());
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let identity = identity();
        identity.register(student("s@example.com")).await.unwrap();
        let err = identity
            .register(student("s@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateEmail(_)));
    }

    #[tokio::test]
    async fn role_fields_are_required() {
        let identity = identity();
        let mut supervisor = student("v@example.com");
        supervisor.role = "supervisor".into();
        let err = identity.register(supervisor.clone()).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::MissingRequiredField("specialization")
        ));
        supervisor.fields.specialization = Some("AI".into());
        identity.register(supervisor).await.unwrap();

        let mut blank = student("t@example.com");
        blank.fields.matric_number = Some("  ".into());
        assert!(matches!(
            identity.register(blank).await,
            Err(AppError::MissingRequiredField("matricNumber"))
        ));

        let admin = Registration {
            name: "Admin".into(),
            email: "admin@example.com".into(),
            password: "x".into(),
            role: "admin".into(),
            fields: RoleFields::default(),
        };
        identity.register(admin).await.unwrap();

        let mut wrong = student("u@example.com");
        wrong.role = "janitor".into();
        assert!(matches!(
            identity.register(wrong).await,
            Err(AppError::InvalidRole(_))
        ));
    }

    #[tokio::test]
    async fn bad_credentials_and_deactivation() {
        let identity = identity();
        let account = identity.register(student("s@example.com")).await.unwrap();
        let login = |password: &str, role: &str| Credentials {
            email: "s@example.com".into(),
            password: password.into(),
            role: role.into(),
        };
        assert!(matches!(
            identity.authenticate(login("nope", "student")).await,
            Err(AppError::InvalidCredentials)
        ));
        assert!(matches!(
            identity.authenticate(login("secret", "supervisor")).await,
            Err(AppError::InvalidCredentials)
        ));

        identity.set_active(&account.id, false).await.unwrap();
        assert!(matches!(
            identity.authenticate(login("secret", "student")).await,
            Err(AppError::AccountDeactivated)
        ));
        assert!(matches!(
            identity.set_active("missing", true).await,
            Err(AppError::AccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn purge_frees_emails() {
        let identity = identity();
        identity.register(student("s@example.com")).await.unwrap();
        assert_eq!(identity.list_accounts().await.unwrap().len(), 1);
        assert_eq!(identity.purge_accounts().await.unwrap(), 1);
        assert!(identity.list_accounts().await.unwrap().is_empty());
        // The old profile keeps its matriculation number.
        let mut again = student("s@example.com");
        again.fields.matric_number = Some("CS002".into());
        identity.register(again).await.unwrap();
    }

    #[tokio::test]
    async fn matric_numbers_are_unique() {
        let identity = identity();
        identity.register(student("s@example.com")).await.unwrap();
        assert!(matches!(
            identity.register(student("t@example.com")).await,
            Err(AppError::DuplicateMatricNumber(_))
        ));
        assert_eq!(identity.count_accounts().await.unwrap(), 1);
        let mut other = student("t@example.com");
        other.fields.matric_number = Some("CS002".into());
        identity.register(other).await.unwrap();
    }

    #[tokio::test]
    async fn failed_profile_removes_the_account() {
        let store = Arc::new(FailingStore::new());
        let identity = Identity::new(store.clone());
        store.fail_inserts(Collection::Students);
        assert!(matches!(
            identity.register(student("s@example.com")).await,
            Err(AppError::Store(_))
        ));
        assert_eq!(identity.count_accounts().await.unwrap(), 0);

        store.heal();
        identity.register(student("s@example.com")).await.unwrap();
        assert_eq!(identity.count_accounts().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registrations_share_one_email() {
        let identity = Arc::new(identity());
        let tasks = (0..16)
            .map(|i| {
                let identity = Arc::clone(&identity);
                tokio::spawn(async move {
                    let mut registration = student("same@example.com");
                    registration.fields.matric_number = Some(format!("CS{i:03}"));
                    identity.register(registration).await
                })
            })
            .collect::<Vec<_>>();
        let mut accepted = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(AppError::DuplicateEmail(_)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(identity.count_accounts().await.unwrap(), 1);
        let profiles = fetch_all::<Student>(&*identity.store, &Filter::new())
            .await
            .unwrap();
        assert_eq!(profiles.len(), 1);
    }
}
