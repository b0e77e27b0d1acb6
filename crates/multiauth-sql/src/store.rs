//! Account store

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use multiauth_core::{AttrMap, Criteria, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Columns identities can be searched on
pub const SEARCH_COLUMNS: [&str; 3] = ["name", "email", "affiliation"];

/// Settings of the `sql` provider type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlSettings {
    /// Example: "sqlite://multiauth.db?mode=rwc"
    pub database_url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

/// A row of the `users` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    pub id: i64,
    pub name: Option<String>,
    pub email: Option<String>,
    pub affiliation: Option<String>,
}

impl UserRecord {
    fn from_row(row: (i64, Option<String>, Option<String>, Option<String>)) -> Self {
        Self {
            id: row.0,
            name: row.1,
            email: row.2,
            affiliation: row.3,
        }
    }

    /// Non-empty columns as identity data
    pub fn to_attr_map(&self) -> AttrMap {
        [("name", &self.name), ("email", &self.email), ("affiliation", &self.affiliation)]
            .into_iter()
            .filter_map(|(key, value)| value.clone().map(|v| (key.to_string(), Value::String(v))))
            .collect()
    }
}

/// Account to seed into the store
#[derive(Debug, Clone, Default)]
pub struct NewAccount {
    /// Auth provider the login belongs to
    pub provider: String,
    pub identifier: String,
    pub password: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub affiliation: Option<String>,
}

/// Hash password using Argon2 with a random salt
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Internal(format!("Failed to hash password: {}", e)))
}

/// Verify password against a PHC hash string; malformed hashes never match
pub fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}

fn db_error(e: sqlx::Error) -> Error {
    Error::Database(e.to_string())
}

/// Users and their logins in a sqlite database
pub struct SqlStore {
    pool: SqlitePool,
    schema: OnceCell<()>,
}

impl SqlStore {
    /// Create a store whose connections open on first use.
    ///
    /// In-memory databases are limited to a single long-lived connection.
    pub fn connect_lazy(settings: &SqlSettings) -> Result<Self> {
        let in_memory = settings.database_url.contains(":memory:");
        let mut options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { settings.max_connections });
        if in_memory {
            options = options.idle_timeout(None).max_lifetime(None);
        }

        let pool = options
            .connect_lazy(&settings.database_url)
            .map_err(|e| Error::Config(format!("Invalid database URL '{}': {}", settings.database_url, e)))?;

        Ok(Self {
            pool,
            schema: OnceCell::new(),
        })
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let store = Self::connect_lazy(&SqlSettings {
            database_url: database_url.to_string(),
            max_connections: default_max_connections(),
        })?;
        store.init().await?;
        Ok(store)
    }

    /// Create the schema if missing; runs once per store
    pub async fn init(&self) -> Result<()> {
        self.schema
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS users (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        name TEXT,
                        email TEXT,
                        affiliation TEXT
                    )
                    "#,
                )
                .execute(&self.pool)
                .await
                .map_err(db_error)?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS identities (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        user_id INTEGER NOT NULL REFERENCES users(id),
                        provider TEXT NOT NULL,
                        identifier TEXT NOT NULL,
                        password_hash TEXT,
                        UNIQUE (provider, identifier)
                    )
                    "#,
                )
                .execute(&self.pool)
                .await
                .map_err(db_error)?;

                info!("Account store initialized");
                Ok::<(), Error>(())
            })
            .await?;

        Ok(())
    }

    /// Insert a user and its login; returns the user id
    pub async fn create_account(&self, account: &NewAccount) -> Result<i64> {
        self.init().await?;
        if account.identifier.is_empty() {
            return Err(Error::InvalidData("Identifier cannot be empty".to_string()));
        }

        let password_hash = hash_password(&account.password)?;
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let user_id = sqlx::query(r#"INSERT INTO users (name, email, affiliation) VALUES (?, ?, ?)"#)
            .bind(&account.name)
            .bind(&account.email)
            .bind(&account.affiliation)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?
            .last_insert_rowid();

        sqlx::query(
            r#"
            INSERT INTO identities (user_id, provider, identifier, password_hash)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(&account.provider)
        .bind(&account.identifier)
        .bind(&password_hash)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;

        debug!(provider = %account.provider, identifier = %account.identifier, "Created account");
        Ok(user_id)
    }

    /// User id and password hash for a login
    pub async fn find_login(&self, provider: &str, identifier: &str) -> Result<Option<(i64, Option<String>)>> {
        self.init().await?;
        sqlx::query_as(r#"SELECT user_id, password_hash FROM identities WHERE provider = ? AND identifier = ?"#)
            .bind(provider)
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)
    }

    pub async fn get_user(&self, id: i64) -> Result<Option<UserRecord>> {
        self.init().await?;
        let row = sqlx::query_as(r#"SELECT id, name, email, affiliation FROM users WHERE id = ?"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(row.map(UserRecord::from_row))
    }

    pub async fn find_user_by_login(&self, provider: &str, identifier: &str) -> Result<Option<UserRecord>> {
        match self.find_login(provider, identifier).await? {
            Some((user_id, _)) => self.get_user(user_id).await,
            None => Ok(None),
        }
    }

    /// Users matching every criterion, exactly or as a substring.
    ///
    /// Criteria keys must be one of [`SEARCH_COLUMNS`].
    pub async fn search_users(&self, criteria: &Criteria, exact: bool) -> Result<Vec<UserRecord>> {
        let criteria: Vec<(&String, &String)> = criteria.iter().filter(|(_, value)| !value.is_empty()).collect();
        if criteria.is_empty() {
            return Ok(Vec::new());
        }

        let mut clauses = Vec::with_capacity(criteria.len());
        for (column, _) in &criteria {
            if !SEARCH_COLUMNS.contains(&column.as_str()) {
                return Err(Error::InvalidData(format!("Cannot search on '{}'", column)));
            }
            clauses.push(if exact {
                format!("{} = ?", column)
            } else {
                format!("{} LIKE ? ESCAPE '\\'", column)
            });
        }

        self.init().await?;
        let sql = format!(
            "SELECT id, name, email, affiliation FROM users WHERE {} ORDER BY id",
            clauses.join(" AND ")
        );

        let mut query = sqlx::query_as::<_, (i64, Option<String>, Option<String>, Option<String>)>(&sql);
        for (_, value) in &criteria {
            query = query.bind(if exact {
                value.to_string()
            } else {
                format!("%{}%", escape_like(value))
            });
        }

        let rows = query.fetch_all(&self.pool).await.map_err(db_error)?;
        Ok(rows.into_iter().map(UserRecord::from_row).collect())
    }
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
