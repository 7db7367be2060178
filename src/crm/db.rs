use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Datelike, Duration, NaiveDate};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::models::*;
use super::validation::StageInput;
use crate::errors::{CrmError, Entity};

/// Colour used for a stage that somehow has none.
pub const DEFAULT_STAGE_COLOR: &str = "#4F46E5";

/// Stages every new profile starts with, in board order.
pub const DEFAULT_STAGES: [(&str, StageRole); 6] = [
    ("Lead", StageRole::Lead),
    ("Qualified", StageRole::Qualified),
    ("Proposal", StageRole::Proposal),
    ("Negotiation", StageRole::Negotiation),
    ("Closed Won", StageRole::Won),
    ("Closed Lost", StageRole::Lost),
];

/// Async-safe handle to the CRM database.
///
/// Wraps `CrmDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O
/// never ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<CrmDb>>,
}

impl DbHandle {
    pub fn new(db: CrmDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&CrmDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| CrmError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. For CLI commands, startup
    /// and tests; never from a hot async path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, CrmDb>> {
        self.inner
            .lock()
            .map_err(|_| CrmError::LockPoisoned.into())
    }
}

pub struct CrmDb {
    conn: Connection,
}

const PROFILE_COLUMNS: &str = "id, full_name, email, avatar_url, created_at, updated_at";
const COMPANY_COLUMNS: &str =
    "id, user_id, name, domain, industry, size, address, phone, website, logo_url, created_at, updated_at";
const CONTACT_COLUMNS: &str = "id, user_id, first_name, last_name, email, phone, company_id, position, address, social_links, notes, avatar_url, status, created_at, updated_at";
const STAGE_COLUMNS: &str = "id, user_id, name, color, position, role, is_won, is_lost, created_at";
const DEAL_COLUMNS: &str = "id, user_id, title, value, stage_id, contact_id, company_id, probability, expected_close_date, closed_at, close_reason, description, created_at, updated_at";
const ACTIVITY_COLUMNS: &str = "id, user_id, type, title, description, contact_id, company_id, deal_id, due_date, completed_at, is_completed, created_at, updated_at";
const NOTE_COLUMNS: &str =
    "id, user_id, content, contact_id, company_id, deal_id, created_at, updated_at";

impl CrmDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS profiles (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    full_name TEXT NOT NULL,
                    email TEXT NOT NULL UNIQUE,
                    avatar_url TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS api_tokens (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
                    token_hash TEXT NOT NULL UNIQUE,
                    label TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    last_used_at TEXT
                );

                CREATE TABLE IF NOT EXISTS companies (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    domain TEXT,
                    industry TEXT,
                    size TEXT,
                    address TEXT,
                    phone TEXT,
                    website TEXT,
                    logo_url TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS contacts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
                    first_name TEXT NOT NULL,
                    last_name TEXT NOT NULL,
                    email TEXT,
                    phone TEXT,
                    company_id INTEGER REFERENCES companies(id) ON DELETE SET NULL,
                    position TEXT,
                    address TEXT,
                    social_links TEXT,
                    notes TEXT,
                    avatar_url TEXT,
                    status TEXT NOT NULL DEFAULT 'active',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS deal_stages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    color TEXT NOT NULL,
                    position INTEGER NOT NULL,
                    role TEXT NOT NULL,
                    is_won INTEGER NOT NULL DEFAULT 0,
                    is_lost INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS deals (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    value REAL,
                    stage_id INTEGER NOT NULL REFERENCES deal_stages(id) ON DELETE RESTRICT,
                    contact_id INTEGER REFERENCES contacts(id) ON DELETE SET NULL,
                    company_id INTEGER REFERENCES companies(id) ON DELETE SET NULL,
                    probability INTEGER,
                    expected_close_date TEXT,
                    closed_at TEXT,
                    close_reason TEXT,
                    description TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS activities (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
                    type TEXT NOT NULL,
                    title TEXT NOT NULL,
                    description TEXT,
                    contact_id INTEGER REFERENCES contacts(id) ON DELETE SET NULL,
                    company_id INTEGER REFERENCES companies(id) ON DELETE SET NULL,
                    deal_id INTEGER REFERENCES deals(id) ON DELETE SET NULL,
                    due_date TEXT,
                    completed_at TEXT,
                    is_completed INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS notes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
                    content TEXT NOT NULL,
                    contact_id INTEGER REFERENCES contacts(id) ON DELETE CASCADE,
                    company_id INTEGER REFERENCES companies(id) ON DELETE CASCADE,
                    deal_id INTEGER REFERENCES deals(id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_api_tokens_user ON api_tokens(user_id);
                CREATE INDEX IF NOT EXISTS idx_companies_user ON companies(user_id);
                CREATE INDEX IF NOT EXISTS idx_contacts_user ON contacts(user_id);
                CREATE INDEX IF NOT EXISTS idx_contacts_company ON contacts(company_id);
                CREATE INDEX IF NOT EXISTS idx_stages_user ON deal_stages(user_id, position);
                CREATE INDEX IF NOT EXISTS idx_deals_user ON deals(user_id);
                CREATE INDEX IF NOT EXISTS idx_deals_stage ON deals(stage_id);
                CREATE INDEX IF NOT EXISTS idx_activities_user ON activities(user_id);
                CREATE INDEX IF NOT EXISTS idx_notes_user ON notes(user_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    /// Run `sql` and collect every mapped row.
    fn query_all<T, P, F>(&self, sql: &str, params: P, map: F) -> Result<Vec<T>>
    where
        P: rusqlite::Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = self
            .conn
            .prepare(sql)
            .with_context(|| format!("Failed to prepare: {sql}"))?;
        let rows = stmt.query_map(params, map).context("Failed to run query")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("Failed to read row")?);
        }
        Ok(out)
    }

    /// Fail with `NotFound` unless `id` is a row of `table` owned by `user_id`.
    fn ensure_owned(&self, table: &str, entity: Entity, user_id: i64, id: i64) -> Result<()> {
        let exists: bool = self
            .conn
            .query_row(
                &format!("SELECT COUNT(*) > 0 FROM {table} WHERE id = ?1 AND user_id = ?2"),
                params![id, user_id],
                |row| row.get(0),
            )
            .with_context(|| format!("Failed to look up {entity} {id}"))?;
        if exists {
            Ok(())
        } else {
            Err(CrmError::not_found(entity, id).into())
        }
    }

    fn ensure_refs(
        &self,
        user_id: i64,
        contact_id: Option<i64>,
        company_id: Option<i64>,
        deal_id: Option<i64>,
    ) -> Result<()> {
        if let Some(id) = contact_id {
            self.ensure_owned("contacts", Entity::Contact, user_id, id)?;
        }
        if let Some(id) = company_id {
            self.ensure_owned("companies", Entity::Company, user_id, id)?;
        }
        if let Some(id) = deal_id {
            self.ensure_owned("deals", Entity::Deal, user_id, id)?;
        }
        Ok(())
    }

    // ── Profiles & tokens ─────────────────────────────────────────────

    /// Create a profile together with its default pipeline stages.
    pub fn create_profile(&self, full_name: &str, email: &str) -> Result<Profile> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "INSERT INTO profiles (full_name, email) VALUES (?1, ?2)",
            params![full_name, email],
        )
        .with_context(|| format!("Failed to insert profile for {email}"))?;
        let id = tx.last_insert_rowid();
        self.seed_default_stages(id)?;
        tx.commit().context("Failed to commit profile")?;
        self.get_profile(id)
    }

    pub fn get_profile(&self, user_id: i64) -> Result<Profile> {
        self.conn
            .query_row(
                &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1"),
                params![user_id],
                read_profile,
            )
            .optional()
            .context("Failed to query profile")?
            .ok_or_else(|| CrmError::not_found(Entity::Profile, user_id).into())
    }

    pub fn find_profile_by_email(&self, email: &str) -> Result<Option<Profile>> {
        self.conn
            .query_row(
                &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE email = ?1"),
                params![email],
                read_profile,
            )
            .optional()
            .context("Failed to query profile by email")
    }

    pub fn list_profiles(&self) -> Result<Vec<Profile>> {
        self.query_all(
            &format!("SELECT {PROFILE_COLUMNS} FROM profiles ORDER BY id"),
            [],
            read_profile,
        )
    }

    pub fn update_profile(
        &self,
        user_id: i64,
        full_name: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<Profile> {
        self.get_profile(user_id)?;
        self.conn
            .execute(
                "UPDATE profiles SET full_name = COALESCE(?1, full_name),
                        avatar_url = COALESCE(?2, avatar_url),
                        updated_at = datetime('now')
                 WHERE id = ?3",
                params![full_name, avatar_url, user_id],
            )
            .context("Failed to update profile")?;
        self.get_profile(user_id)
    }

    pub fn store_token(&self, user_id: i64, token_hash: &str, label: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO api_tokens (user_id, token_hash, label) VALUES (?1, ?2, ?3)",
                params![user_id, token_hash, label],
            )
            .context("Failed to store API token")?;
        Ok(())
    }

    /// Resolve a token digest to its owner, stamping `last_used_at`.
    pub fn user_for_token(&self, token_hash: &str) -> Result<Option<i64>> {
        let user_id: Option<i64> = self
            .conn
            .query_row(
                "SELECT user_id FROM api_tokens WHERE token_hash = ?1",
                params![token_hash],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to look up API token")?;
        if user_id.is_some() {
            self.conn
                .execute(
                    "UPDATE api_tokens SET last_used_at = datetime('now') WHERE token_hash = ?1",
                    params![token_hash],
                )
                .context("Failed to stamp API token")?;
        }
        Ok(user_id)
    }

    // ── Companies ─────────────────────────────────────────────────────

    pub fn create_company(&self, user_id: i64, input: &CompanyInput) -> Result<Company> {
        self.conn
            .execute(
                "INSERT INTO companies (user_id, name, domain, industry, size, address, phone, website)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    user_id,
                    input.name,
                    input.domain,
                    input.industry,
                    input.size.map(|s| s.as_str()),
                    to_json(&input.address)?,
                    input.phone,
                    input.website,
                ],
            )
            .context("Failed to insert company")?;
        self.get_company(user_id, self.conn.last_insert_rowid())
    }

    pub fn get_company(&self, user_id: i64, id: i64) -> Result<Company> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {COMPANY_COLUMNS} FROM companies WHERE id = ?1 AND user_id = ?2"),
                params![id, user_id],
                CompanyRow::read,
            )
            .optional()
            .context("Failed to query company")?;
        match row {
            Some(r) => r.into_company(),
            None => Err(CrmError::not_found(Entity::Company, id).into()),
        }
    }

    /// Companies by name, optionally filtered on name or industry.
    pub fn list_companies(&self, user_id: i64, search: Option<&str>) -> Result<Vec<Company>> {
        let pattern = like_pattern(search);
        let rows = self.query_all(
            &format!(
                "SELECT {COMPANY_COLUMNS} FROM companies
                 WHERE user_id = ?1
                   AND (?2 IS NULL OR name LIKE ?2 ESCAPE '\\' OR industry LIKE ?2 ESCAPE '\\')
                 ORDER BY name COLLATE NOCASE, id"
            ),
            params![user_id, pattern],
            CompanyRow::read,
        )?;
        rows.into_iter().map(CompanyRow::into_company).collect()
    }

    pub fn update_company(&self, user_id: i64, id: i64, input: &CompanyInput) -> Result<Company> {
        self.ensure_owned("companies", Entity::Company, user_id, id)?;
        self.conn
            .execute(
                "UPDATE companies SET name = ?1, domain = ?2, industry = ?3, size = ?4, address = ?5,
                        phone = ?6, website = ?7, updated_at = datetime('now')
                 WHERE id = ?8 AND user_id = ?9",
                params![
                    input.name,
                    input.domain,
                    input.industry,
                    input.size.map(|s| s.as_str()),
                    to_json(&input.address)?,
                    input.phone,
                    input.website,
                    id,
                    user_id,
                ],
            )
            .context("Failed to update company")?;
        self.get_company(user_id, id)
    }

    pub fn delete_company(&self, user_id: i64, id: i64) -> Result<()> {
        let count = self
            .conn
            .execute(
                "DELETE FROM companies WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .context("Failed to delete company")?;
        if count == 0 {
            return Err(CrmError::not_found(Entity::Company, id).into());
        }
        Ok(())
    }

    pub fn company_detail(&self, user_id: i64, id: i64) -> Result<CompanyDetail> {
        let company = self.get_company(user_id, id)?;
        let contacts = self
            .query_all(
                &format!(
                    "SELECT {CONTACT_COLUMNS} FROM contacts WHERE user_id = ?1 AND company_id = ?2
                     ORDER BY last_name COLLATE NOCASE, first_name COLLATE NOCASE"
                ),
                params![user_id, id],
                ContactRow::read,
            )?
            .into_iter()
            .map(ContactRow::into_contact)
            .collect::<Result<Vec<_>>>()?;
        let related = RelatedTo::Company(id);
        Ok(CompanyDetail {
            company,
            contacts,
            deals: self.deals_related(user_id, related)?,
            activities: self.list_activities(user_id, &ActivityFilter::related(related))?,
            notes: self.list_notes(user_id, Some(related))?,
        })
    }

    // ── Contacts ──────────────────────────────────────────────────────

    pub fn create_contact(&self, user_id: i64, input: &ContactInput) -> Result<Contact> {
        self.ensure_refs(user_id, None, input.company_id, None)?;
        self.conn
            .execute(
                "INSERT INTO contacts (user_id, first_name, last_name, email, phone, company_id,
                        position, address, social_links, notes, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    user_id,
                    input.first_name,
                    input.last_name,
                    input.email,
                    input.phone,
                    input.company_id,
                    input.position,
                    to_json(&input.address)?,
                    to_json(&input.social_links)?,
                    input.notes,
                    input.status.as_str(),
                ],
            )
            .context("Failed to insert contact")?;
        self.get_contact(user_id, self.conn.last_insert_rowid())
    }

    pub fn get_contact(&self, user_id: i64, id: i64) -> Result<Contact> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?1 AND user_id = ?2"),
                params![id, user_id],
                ContactRow::read,
            )
            .optional()
            .context("Failed to query contact")?;
        match row {
            Some(r) => r.into_contact(),
            None => Err(CrmError::not_found(Entity::Contact, id).into()),
        }
    }

    /// Contacts by last name, optionally filtered on first/last name or email.
    pub fn list_contacts(&self, user_id: i64, search: Option<&str>) -> Result<Vec<Contact>> {
        let pattern = like_pattern(search);
        let rows = self.query_all(
            &format!(
                "SELECT {CONTACT_COLUMNS} FROM contacts
                 WHERE user_id = ?1
                   AND (?2 IS NULL
                        OR first_name LIKE ?2 ESCAPE '\\'
                        OR last_name LIKE ?2 ESCAPE '\\'
                        OR email LIKE ?2 ESCAPE '\\')
                 ORDER BY last_name COLLATE NOCASE, first_name COLLATE NOCASE, id"
            ),
            params![user_id, pattern],
            ContactRow::read,
        )?;
        rows.into_iter().map(ContactRow::into_contact).collect()
    }

    pub fn update_contact(&self, user_id: i64, id: i64, input: &ContactInput) -> Result<Contact> {
        self.ensure_owned("contacts", Entity::Contact, user_id, id)?;
        self.ensure_refs(user_id, None, input.company_id, None)?;
        self.conn
            .execute(
                "UPDATE contacts SET first_name = ?1, last_name = ?2, email = ?3, phone = ?4,
                        company_id = ?5, position = ?6, address = ?7, social_links = ?8,
                        notes = ?9, status = ?10, updated_at = datetime('now')
                 WHERE id = ?11 AND user_id = ?12",
                params![
                    input.first_name,
                    input.last_name,
                    input.email,
                    input.phone,
                    input.company_id,
                    input.position,
                    to_json(&input.address)?,
                    to_json(&input.social_links)?,
                    input.notes,
                    input.status.as_str(),
                    id,
                    user_id,
                ],
            )
            .context("Failed to update contact")?;
        self.get_contact(user_id, id)
    }

    pub fn delete_contact(&self, user_id: i64, id: i64) -> Result<()> {
        let count = self
            .conn
            .execute(
                "DELETE FROM contacts WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .context("Failed to delete contact")?;
        if count == 0 {
            return Err(CrmError::not_found(Entity::Contact, id).into());
        }
        Ok(())
    }

    pub fn contact_detail(&self, user_id: i64, id: i64) -> Result<ContactDetail> {
        let contact = self.get_contact(user_id, id)?;
        let company = match contact.company_id {
            Some(cid) => Some(self.get_company(user_id, cid)?),
            None => None,
        };
        let related = RelatedTo::Contact(id);
        Ok(ContactDetail {
            contact,
            company,
            deals: self.deals_related(user_id, related)?,
            activities: self.list_activities(user_id, &ActivityFilter::related(related))?,
            notes: self.list_notes(user_id, Some(related))?,
        })
    }

    // ── Stages ────────────────────────────────────────────────────────

    pub fn seed_default_stages(&self, user_id: i64) -> Result<Vec<DealStage>> {
        for (name, role) in DEFAULT_STAGES {
            self.create_stage(
                user_id,
                &StageInput {
                    name: name.to_string(),
                    color: role.accent().to_string(),
                    role,
                },
            )?;
        }
        self.list_stages(user_id)
    }

    /// Stages in board order.
    pub fn list_stages(&self, user_id: i64) -> Result<Vec<DealStage>> {
        let rows = self.query_all(
            &format!(
                "SELECT {STAGE_COLUMNS} FROM deal_stages WHERE user_id = ?1 ORDER BY position, id"
            ),
            params![user_id],
            StageRow::read,
        )?;
        rows.into_iter().map(StageRow::into_stage).collect()
    }

    pub fn get_stage(&self, user_id: i64, id: i64) -> Result<DealStage> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {STAGE_COLUMNS} FROM deal_stages WHERE id = ?1 AND user_id = ?2"),
                params![id, user_id],
                StageRow::read,
            )
            .optional()
            .context("Failed to query stage")?;
        match row {
            Some(r) => r.into_stage(),
            None => Err(CrmError::not_found(Entity::Stage, id).into()),
        }
    }

    /// Append a stage after the current last one.
    pub fn create_stage(&self, user_id: i64, input: &StageInput) -> Result<DealStage> {
        let max_pos: i32 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(position), -1) FROM deal_stages WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .context("Failed to get max stage position")?;
        self.conn
            .execute(
                "INSERT INTO deal_stages (user_id, name, color, position, role, is_won, is_lost)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    user_id,
                    input.name,
                    input.color,
                    max_pos + 1,
                    input.role.as_str(),
                    input.role == StageRole::Won,
                    input.role == StageRole::Lost,
                ],
            )
            .context("Failed to insert stage")?;
        self.get_stage(user_id, self.conn.last_insert_rowid())
    }

    pub fn update_stage(
        &self,
        user_id: i64,
        id: i64,
        name: Option<&str>,
        color: Option<&str>,
    ) -> Result<DealStage> {
        self.ensure_owned("deal_stages", Entity::Stage, user_id, id)?;
        self.conn
            .execute(
                "UPDATE deal_stages SET name = COALESCE(?1, name), color = COALESCE(?2, color)
                 WHERE id = ?3 AND user_id = ?4",
                params![name, color, id, user_id],
            )
            .context("Failed to update stage")?;
        self.get_stage(user_id, id)
    }

    /// Rewrite positions to follow `ids`, which must list every stage once.
    pub fn reorder_stages(&self, user_id: i64, ids: &[i64]) -> Result<Vec<DealStage>> {
        let mut current: Vec<i64> = self.list_stages(user_id)?.iter().map(|s| s.id).collect();
        let mut requested = ids.to_vec();
        current.sort_unstable();
        requested.sort_unstable();
        if current != requested {
            return Err(CrmError::InvalidStageOrder.into());
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        for (position, id) in ids.iter().enumerate() {
            tx.execute(
                "UPDATE deal_stages SET position = ?1 WHERE id = ?2 AND user_id = ?3",
                params![position as i32, id, user_id],
            )
            .context("Failed to update stage position")?;
        }
        tx.commit().context("Failed to commit stage reorder")?;
        self.list_stages(user_id)
    }

    pub fn count_deals_in_stage(&self, user_id: i64, stage_id: i64) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM deals WHERE user_id = ?1 AND stage_id = ?2",
                params![user_id, stage_id],
                |row| row.get(0),
            )
            .context("Failed to count deals in stage")
    }

    /// Delete an empty stage and close the gap in positions.
    pub fn delete_stage(&self, user_id: i64, id: i64) -> Result<()> {
        let stage = self.get_stage(user_id, id)?;
        let count = self.count_deals_in_stage(user_id, id)?;
        if count > 0 {
            return Err(CrmError::StageInUse {
                name: stage.name,
                count,
            }
            .into());
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "DELETE FROM deal_stages WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )
        .context("Failed to delete stage")?;
        tx.execute(
            "UPDATE deal_stages SET position = position - 1 WHERE user_id = ?1 AND position > ?2",
            params![user_id, stage.position],
        )
        .context("Failed to compact stage positions")?;
        tx.commit().context("Failed to commit stage delete")?;
        Ok(())
    }

    /// Lowest-position stage that is neither won nor lost.
    pub fn first_open_stage(&self, user_id: i64) -> Result<DealStage> {
        self.list_stages(user_id)?
            .into_iter()
            .find(|s| !s.is_terminal())
            .ok_or_else(|| CrmError::NoOpenStage.into())
    }

    // ── Deals ─────────────────────────────────────────────────────────

    pub fn create_deal(&self, user_id: i64, input: &DealInput) -> Result<Deal> {
        let stage = match input.stage_id {
            Some(id) => self.get_stage(user_id, id)?,
            None => self.first_open_stage(user_id)?,
        };
        self.ensure_refs(user_id, input.contact_id, input.company_id, None)?;
        let closed_at = stage.is_terminal().then(now_sql);
        self.conn
            .execute(
                "INSERT INTO deals (user_id, title, value, stage_id, contact_id, company_id,
                        probability, expected_close_date, close_reason, description, closed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    user_id,
                    input.title,
                    input.value,
                    stage.id,
                    input.contact_id,
                    input.company_id,
                    input.probability,
                    input.expected_close_date,
                    input.close_reason,
                    input.description,
                    closed_at,
                ],
            )
            .context("Failed to insert deal")?;
        self.get_deal(user_id, self.conn.last_insert_rowid())
    }

    pub fn get_deal(&self, user_id: i64, id: i64) -> Result<Deal> {
        self.conn
            .query_row(
                &format!("SELECT {DEAL_COLUMNS} FROM deals WHERE id = ?1 AND user_id = ?2"),
                params![id, user_id],
                read_deal,
            )
            .optional()
            .context("Failed to query deal")?
            .ok_or_else(|| CrmError::not_found(Entity::Deal, id).into())
    }

    /// Deals newest first.
    pub fn list_deals(&self, user_id: i64) -> Result<Vec<Deal>> {
        self.query_all(
            &format!(
                "SELECT {DEAL_COLUMNS} FROM deals WHERE user_id = ?1 ORDER BY created_at DESC, id DESC"
            ),
            params![user_id],
            read_deal,
        )
    }

    fn deals_related(&self, user_id: i64, related: RelatedTo) -> Result<Vec<Deal>> {
        if let RelatedTo::Deal(id) = related {
            return Ok(vec![self.get_deal(user_id, id)?]);
        }
        self.query_all(
            &format!(
                "SELECT {DEAL_COLUMNS} FROM deals WHERE user_id = ?1 AND {} = ?2
                 ORDER BY created_at DESC, id DESC",
                related.column()
            ),
            params![user_id, related.id()],
            read_deal,
        )
    }

    /// Attach stage, contact and company to each deal.
    fn with_relations(&self, user_id: i64, deals: Vec<Deal>) -> Result<Vec<DealWithRelations>> {
        let stages = self.list_stages(user_id)?;
        let mut out = Vec::with_capacity(deals.len());
        for deal in deals {
            let stage = stages
                .iter()
                .find(|s| s.id == deal.stage_id)
                .cloned()
                .ok_or_else(|| CrmError::not_found(Entity::Stage, deal.stage_id))?;
            let contact = match deal.contact_id {
                Some(id) => Some(self.get_contact(user_id, id)?),
                None => None,
            };
            let company = match deal.company_id {
                Some(id) => Some(self.get_company(user_id, id)?),
                None => None,
            };
            out.push(DealWithRelations {
                deal,
                stage,
                contact,
                company,
            });
        }
        Ok(out)
    }

    pub fn list_deals_with_relations(&self, user_id: i64) -> Result<Vec<DealWithRelations>> {
        let deals = self.list_deals(user_id)?;
        self.with_relations(user_id, deals)
    }

    pub fn deal_with_relations(&self, user_id: i64, id: i64) -> Result<DealWithRelations> {
        let deal = self.get_deal(user_id, id)?;
        let mut all = self.with_relations(user_id, vec![deal])?;
        all.pop()
            .ok_or_else(|| CrmError::not_found(Entity::Deal, id).into())
    }

    pub fn deal_detail(&self, user_id: i64, id: i64) -> Result<DealDetail> {
        let deal = self.deal_with_relations(user_id, id)?;
        let related = RelatedTo::Deal(id);
        Ok(DealDetail {
            deal,
            activities: self.list_activities(user_id, &ActivityFilter::related(related))?,
            notes: self.list_notes(user_id, Some(related))?,
        })
    }

    /// Replace a deal's editable fields. `stage_id: None` keeps the current stage.
    pub fn update_deal(&self, user_id: i64, id: i64, input: &DealInput) -> Result<Deal> {
        let current = self.get_deal(user_id, id)?;
        self.ensure_refs(user_id, input.contact_id, input.company_id, None)?;
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "UPDATE deals SET title = ?1, value = ?2, contact_id = ?3, company_id = ?4,
                    probability = ?5, expected_close_date = ?6, close_reason = ?7,
                    description = ?8, updated_at = datetime('now')
             WHERE id = ?9 AND user_id = ?10",
            params![
                input.title,
                input.value,
                input.contact_id,
                input.company_id,
                input.probability,
                input.expected_close_date,
                input.close_reason,
                input.description,
                id,
                user_id,
            ],
        )
        .context("Failed to update deal")?;
        if let Some(stage_id) = input.stage_id.filter(|s| *s != current.stage_id) {
            self.set_deal_stage(user_id, id, stage_id)?;
        }
        tx.commit().context("Failed to commit deal update")?;
        self.get_deal(user_id, id)
    }

    /// Persist a stage reassignment. Entering a terminal stage stamps
    /// `closed_at`; leaving for an open stage re-opens the deal. A won deal
    /// carries no close reason.
    pub fn set_deal_stage(&self, user_id: i64, id: i64, stage_id: i64) -> Result<Deal> {
        let deal = self.get_deal(user_id, id)?;
        let stage = self.get_stage(user_id, stage_id)?;
        if stage.is_terminal() {
            self.conn
                .execute(
                    "UPDATE deals SET stage_id = ?1, closed_at = COALESCE(closed_at, datetime('now')),
                            close_reason = CASE WHEN ?4 THEN NULL ELSE close_reason END,
                            updated_at = datetime('now')
                     WHERE id = ?2 AND user_id = ?3",
                    params![stage.id, deal.id, user_id, stage.role == StageRole::Won],
                )
                .context("Failed to move deal")?;
        } else {
            self.conn
                .execute(
                    "UPDATE deals SET stage_id = ?1, closed_at = NULL, close_reason = NULL,
                            updated_at = datetime('now')
                     WHERE id = ?2 AND user_id = ?3",
                    params![stage.id, deal.id, user_id],
                )
                .context("Failed to move deal")?;
        }
        self.get_deal(user_id, id)
    }

    /// Move a deal into the first won or lost stage and stamp the closure.
    /// A reason is kept only for losses.
    pub fn close_deal(
        &self,
        user_id: i64,
        id: i64,
        outcome: CloseOutcome,
        reason: Option<&str>,
    ) -> Result<Deal> {
        self.ensure_owned("deals", Entity::Deal, user_id, id)?;
        let role = outcome.role();
        let stage = self
            .list_stages(user_id)?
            .into_iter()
            .find(|s| s.role == role)
            .ok_or_else(|| CrmError::NoTerminalStage {
                outcome: outcome.as_str().to_string(),
            })?;
        let reason = match outcome {
            CloseOutcome::Lost => reason.map(str::trim).filter(|r| !r.is_empty()),
            CloseOutcome::Won => None,
        };
        self.conn
            .execute(
                "UPDATE deals SET stage_id = ?1, closed_at = datetime('now'), close_reason = ?2,
                        updated_at = datetime('now')
                 WHERE id = ?3 AND user_id = ?4",
                params![stage.id, reason, id, user_id],
            )
            .context("Failed to close deal")?;
        self.get_deal(user_id, id)
    }

    pub fn delete_deal(&self, user_id: i64, id: i64) -> Result<()> {
        let count = self
            .conn
            .execute(
                "DELETE FROM deals WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .context("Failed to delete deal")?;
        if count == 0 {
            return Err(CrmError::not_found(Entity::Deal, id).into());
        }
        Ok(())
    }

    // ── Board view ────────────────────────────────────────────────────

    pub fn get_board(&self, user_id: i64) -> Result<BoardView> {
        let stages = self.list_stages(user_id)?;
        let mut deals = self.list_deals_with_relations(user_id)?;
        // Oldest first within a column.
        deals.reverse();

        let columns = stages
            .into_iter()
            .map(|stage| {
                let col_deals: Vec<DealWithRelations> = deals
                    .iter()
                    .filter(|d| d.deal.stage_id == stage.id)
                    .cloned()
                    .collect();
                let total_value = col_deals.iter().filter_map(|d| d.deal.value).sum();
                StageColumnView {
                    accent: stage.role.accent().to_string(),
                    stage,
                    deals: col_deals,
                    total_value,
                }
            })
            .collect();
        Ok(BoardView { columns })
    }

    // ── Activities ────────────────────────────────────────────────────

    pub fn create_activity(&self, user_id: i64, input: &ActivityInput) -> Result<Activity> {
        self.ensure_refs(user_id, input.contact_id, input.company_id, input.deal_id)?;
        let completed_at = input.is_completed.then(now_sql);
        self.conn
            .execute(
                "INSERT INTO activities (user_id, type, title, description, contact_id, company_id,
                        deal_id, due_date, is_completed, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    user_id,
                    input.kind.as_str(),
                    input.title,
                    input.description,
                    input.contact_id,
                    input.company_id,
                    input.deal_id,
                    input.due_date,
                    input.is_completed,
                    completed_at,
                ],
            )
            .context("Failed to insert activity")?;
        self.get_activity(user_id, self.conn.last_insert_rowid())
    }

    pub fn get_activity(&self, user_id: i64, id: i64) -> Result<Activity> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {ACTIVITY_COLUMNS} FROM activities WHERE id = ?1 AND user_id = ?2"),
                params![id, user_id],
                ActivityRow::read,
            )
            .optional()
            .context("Failed to query activity")?;
        match row {
            Some(r) => r.into_activity(),
            None => Err(CrmError::not_found(Entity::Activity, id).into()),
        }
    }

    /// Activities newest first, optionally narrowed by type or related record.
    pub fn list_activities(&self, user_id: i64, filter: &ActivityFilter) -> Result<Vec<Activity>> {
        let (column, related_id) = match filter.related {
            Some(r) => (r.column(), Some(r.id())),
            None => ("id", None),
        };
        let rows = self.query_all(
            &format!(
                "SELECT {ACTIVITY_COLUMNS} FROM activities
                 WHERE user_id = ?1
                   AND (?2 IS NULL OR type = ?2)
                   AND (?3 IS NULL OR {column} = ?3)
                 ORDER BY created_at DESC, id DESC"
            ),
            params![user_id, filter.kind.map(|k| k.as_str()), related_id],
            ActivityRow::read,
        )?;
        rows.into_iter().map(ActivityRow::into_activity).collect()
    }

    /// Tasks: open ones first, each group by due date with undated last.
    pub fn list_tasks(&self, user_id: i64) -> Result<Vec<ActivityWithRelations>> {
        let rows = self.query_all(
            &format!(
                "SELECT {ACTIVITY_COLUMNS} FROM activities
                 WHERE user_id = ?1 AND type = 'task'
                 ORDER BY is_completed, due_date IS NULL, due_date, id"
            ),
            params![user_id],
            ActivityRow::read,
        )?;
        let activities = rows
            .into_iter()
            .map(ActivityRow::into_activity)
            .collect::<Result<Vec<_>>>()?;
        self.activities_with_relations(user_id, activities)
    }

    pub fn activities_with_relations(
        &self,
        user_id: i64,
        activities: Vec<Activity>,
    ) -> Result<Vec<ActivityWithRelations>> {
        let mut out = Vec::with_capacity(activities.len());
        for activity in activities {
            let contact = match activity.contact_id {
                Some(id) => Some(self.get_contact(user_id, id)?),
                None => None,
            };
            let company = match activity.company_id {
                Some(id) => Some(self.get_company(user_id, id)?),
                None => None,
            };
            let deal = match activity.deal_id {
                Some(id) => Some(self.get_deal(user_id, id)?),
                None => None,
            };
            out.push(ActivityWithRelations {
                activity,
                contact,
                company,
                deal,
            });
        }
        Ok(out)
    }

    pub fn update_activity(
        &self,
        user_id: i64,
        id: i64,
        input: &ActivityInput,
    ) -> Result<Activity> {
        let current = self.get_activity(user_id, id)?;
        self.ensure_refs(user_id, input.contact_id, input.company_id, input.deal_id)?;
        let completed_at = match (current.is_completed, input.is_completed) {
            (true, true) => current.completed_at,
            (false, true) => Some(now_sql()),
            (_, false) => None,
        };
        self.conn
            .execute(
                "UPDATE activities SET type = ?1, title = ?2, description = ?3, contact_id = ?4,
                        company_id = ?5, deal_id = ?6, due_date = ?7, is_completed = ?8,
                        completed_at = ?9, updated_at = datetime('now')
                 WHERE id = ?10 AND user_id = ?11",
                params![
                    input.kind.as_str(),
                    input.title,
                    input.description,
                    input.contact_id,
                    input.company_id,
                    input.deal_id,
                    input.due_date,
                    input.is_completed,
                    completed_at,
                    id,
                    user_id,
                ],
            )
            .context("Failed to update activity")?;
        self.get_activity(user_id, id)
    }

    pub fn set_activity_completed(&self, user_id: i64, id: i64, completed: bool) -> Result<Activity> {
        self.ensure_owned("activities", Entity::Activity, user_id, id)?;
        if completed {
            self.conn
                .execute(
                    "UPDATE activities SET is_completed = 1, completed_at = datetime('now'),
                            updated_at = datetime('now')
                     WHERE id = ?1 AND user_id = ?2",
                    params![id, user_id],
                )
                .context("Failed to complete activity")?;
        } else {
            self.conn
                .execute(
                    "UPDATE activities SET is_completed = 0, completed_at = NULL,
                            updated_at = datetime('now')
                     WHERE id = ?1 AND user_id = ?2",
                    params![id, user_id],
                )
                .context("Failed to reopen activity")?;
        }
        self.get_activity(user_id, id)
    }

    pub fn delete_activity(&self, user_id: i64, id: i64) -> Result<()> {
        let count = self
            .conn
            .execute(
                "DELETE FROM activities WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .context("Failed to delete activity")?;
        if count == 0 {
            return Err(CrmError::not_found(Entity::Activity, id).into());
        }
        Ok(())
    }

    // ── Notes ─────────────────────────────────────────────────────────

    pub fn create_note(&self, user_id: i64, input: &NoteInput) -> Result<Note> {
        self.ensure_refs(user_id, input.contact_id, input.company_id, input.deal_id)?;
        self.conn
            .execute(
                "INSERT INTO notes (user_id, content, contact_id, company_id, deal_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user_id,
                    input.content,
                    input.contact_id,
                    input.company_id,
                    input.deal_id,
                ],
            )
            .context("Failed to insert note")?;
        self.get_note(user_id, self.conn.last_insert_rowid())
    }

    pub fn get_note(&self, user_id: i64, id: i64) -> Result<Note> {
        self.conn
            .query_row(
                &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?1 AND user_id = ?2"),
                params![id, user_id],
                read_note,
            )
            .optional()
            .context("Failed to query note")?
            .ok_or_else(|| CrmError::not_found(Entity::Note, id).into())
    }

    pub fn list_notes(&self, user_id: i64, related: Option<RelatedTo>) -> Result<Vec<Note>> {
        let (column, related_id) = match related {
            Some(r) => (r.column(), Some(r.id())),
            None => ("id", None),
        };
        self.query_all(
            &format!(
                "SELECT {NOTE_COLUMNS} FROM notes
                 WHERE user_id = ?1 AND (?2 IS NULL OR {column} = ?2)
                 ORDER BY created_at DESC, id DESC"
            ),
            params![user_id, related_id],
            read_note,
        )
    }

    pub fn update_note(&self, user_id: i64, id: i64, content: &str) -> Result<Note> {
        self.ensure_owned("notes", Entity::Note, user_id, id)?;
        self.conn
            .execute(
                "UPDATE notes SET content = ?1, updated_at = datetime('now')
                 WHERE id = ?2 AND user_id = ?3",
                params![content, id, user_id],
            )
            .context("Failed to update note")?;
        self.get_note(user_id, id)
    }

    pub fn delete_note(&self, user_id: i64, id: i64) -> Result<()> {
        let count = self
            .conn
            .execute(
                "DELETE FROM notes WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .context("Failed to delete note")?;
        if count == 0 {
            return Err(CrmError::not_found(Entity::Note, id).into());
        }
        Ok(())
    }

    // ── Dashboard ─────────────────────────────────────────────────────

    /// Aggregates for the week (Monday to Sunday) containing `today`.
    pub fn dashboard(&self, user_id: i64, today: NaiveDate) -> Result<DashboardView> {
        let contacts_count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM contacts WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .context("Failed to count contacts")?;

        let stages = self.list_stages(user_id)?;
        let deals = self.list_deals(user_id)?;
        let open_stage = |stage_id: i64| {
            stages
                .iter()
                .find(|s| s.id == stage_id)
                .is_some_and(|s| !s.is_terminal())
        };
        let active: Vec<&Deal> = deals.iter().filter(|d| open_stage(d.stage_id)).collect();
        let pipeline_value = active.iter().filter_map(|d| d.value).sum();

        let pipeline_data = stages
            .iter()
            .filter(|s| !s.is_terminal())
            .map(|s| StageCount {
                name: s.name.clone(),
                count: deals.iter().filter(|d| d.stage_id == s.id).count() as i64,
                color: if s.color.is_empty() {
                    DEFAULT_STAGE_COLOR.to_string()
                } else {
                    s.color.clone()
                },
            })
            .collect();

        let week_start = today - Duration::days(today.weekday().num_days_from_monday() as i64);
        let week_end = week_start + Duration::days(6);
        let activities_this_week: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM activities
                 WHERE user_id = ?1 AND created_at >= ?2 AND created_at <= ?3",
                params![
                    user_id,
                    format!("{week_start} 00:00:00"),
                    format!("{week_end} 23:59:59"),
                ],
                |row| row.get(0),
            )
            .context("Failed to count activities this week")?;

        let recent = self.query_all(
            &format!(
                "SELECT {ACTIVITY_COLUMNS} FROM activities WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT 10"
            ),
            params![user_id],
            ActivityRow::read,
        )?;
        let upcoming = self.query_all(
            &format!(
                "SELECT {ACTIVITY_COLUMNS} FROM activities
                 WHERE user_id = ?1 AND type = 'task' AND is_completed = 0
                 ORDER BY due_date IS NULL, due_date, id LIMIT 5"
            ),
            params![user_id],
            ActivityRow::read,
        )?;
        let recent = recent
            .into_iter()
            .map(ActivityRow::into_activity)
            .collect::<Result<Vec<_>>>()?;
        let upcoming = upcoming
            .into_iter()
            .map(ActivityRow::into_activity)
            .collect::<Result<Vec<_>>>()?;

        Ok(DashboardView {
            contacts_count,
            active_deals_count: active.len() as i64,
            pipeline_value,
            activities_this_week,
            pipeline_data,
            recent_activities: self.activities_with_relations(user_id, recent)?,
            upcoming_tasks: self.activities_with_relations(user_id, upcoming)?,
        })
    }
}

/// Narrowing for activity listings.
#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    pub kind: Option<ActivityType>,
    pub related: Option<RelatedTo>,
}

impl ActivityFilter {
    pub fn related(related: RelatedTo) -> Self {
        Self {
            kind: None,
            related: Some(related),
        }
    }
}

fn now_sql() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// `%term%` with LIKE wildcards escaped; `None` for an absent or blank term.
fn like_pattern(search: Option<&str>) -> Option<String> {
    let term = search.map(str::trim).filter(|s| !s.is_empty())?;
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    Some(format!("%{escaped}%"))
}

fn to_json<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>> {
    value
        .as_ref()
        .map(|v| serde_json::to_string(v).context("Failed to encode JSON column"))
        .transpose()
}

fn from_json<T: serde::de::DeserializeOwned>(raw: Option<String>, what: &str) -> Result<Option<T>> {
    raw.map(|s| {
        serde_json::from_str(&s).with_context(|| format!("Failed to parse {what} JSON"))
    })
    .transpose()
}

fn parse_enum<T: FromStr<Err = String>>(raw: &str, what: &str) -> Result<T> {
    T::from_str(raw)
        .map_err(|e| anyhow::anyhow!(e))
        .with_context(|| format!("Failed to parse {what}"))
}

fn read_profile(row: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: row.get(0)?,
        full_name: row.get(1)?,
        email: row.get(2)?,
        avatar_url: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn read_deal(row: &Row<'_>) -> rusqlite::Result<Deal> {
    Ok(Deal {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        value: row.get(3)?,
        stage_id: row.get(4)?,
        contact_id: row.get(5)?,
        company_id: row.get(6)?,
        probability: row.get(7)?,
        expected_close_date: row.get(8)?,
        closed_at: row.get(9)?,
        close_reason: row.get(10)?,
        description: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn read_note(row: &Row<'_>) -> rusqlite::Result<Note> {
    Ok(Note {
        id: row.get(0)?,
        user_id: row.get(1)?,
        content: row.get(2)?,
        contact_id: row.get(3)?,
        company_id: row.get(4)?,
        deal_id: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Intermediate row structs: text columns holding enums or JSON are
/// decoded after the row is read.
struct CompanyRow {
    id: i64,
    user_id: i64,
    name: String,
    domain: Option<String>,
    industry: Option<String>,
    size: Option<String>,
    address: Option<String>,
    phone: Option<String>,
    website: Option<String>,
    logo_url: Option<String>,
    created_at: String,
    updated_at: String,
}

impl CompanyRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            domain: row.get(3)?,
            industry: row.get(4)?,
            size: row.get(5)?,
            address: row.get(6)?,
            phone: row.get(7)?,
            website: row.get(8)?,
            logo_url: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn into_company(self) -> Result<Company> {
        let size = self
            .size
            .as_deref()
            .map(|s| parse_enum::<CompanySize>(s, "company size"))
            .transpose()?;
        Ok(Company {
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            domain: self.domain,
            industry: self.industry,
            size,
            address: from_json(self.address, "company address")?,
            phone: self.phone,
            website: self.website,
            logo_url: self.logo_url,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct ContactRow {
    id: i64,
    user_id: i64,
    first_name: String,
    last_name: String,
    email: Option<String>,
    phone: Option<String>,
    company_id: Option<i64>,
    position: Option<String>,
    address: Option<String>,
    social_links: Option<String>,
    notes: Option<String>,
    avatar_url: Option<String>,
    status: String,
    created_at: String,
    updated_at: String,
}

impl ContactRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            first_name: row.get(2)?,
            last_name: row.get(3)?,
            email: row.get(4)?,
            phone: row.get(5)?,
            company_id: row.get(6)?,
            position: row.get(7)?,
            address: row.get(8)?,
            social_links: row.get(9)?,
            notes: row.get(10)?,
            avatar_url: row.get(11)?,
            status: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    fn into_contact(self) -> Result<Contact> {
        Ok(Contact {
            id: self.id,
            user_id: self.user_id,
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            phone: self.phone,
            company_id: self.company_id,
            position: self.position,
            address: from_json(self.address, "contact address")?,
            social_links: from_json(self.social_links, "social links")?,
            notes: self.notes,
            avatar_url: self.avatar_url,
            status: parse_enum(&self.status, "contact status")?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct StageRow {
    id: i64,
    user_id: i64,
    name: String,
    color: String,
    position: i32,
    role: String,
    is_won: bool,
    is_lost: bool,
    created_at: String,
}

impl StageRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            color: row.get(3)?,
            position: row.get(4)?,
            role: row.get(5)?,
            is_won: row.get(6)?,
            is_lost: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn into_stage(self) -> Result<DealStage> {
        Ok(DealStage {
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            color: self.color,
            position: self.position,
            role: parse_enum(&self.role, "stage role")?,
            is_won: self.is_won,
            is_lost: self.is_lost,
            created_at: self.created_at,
        })
    }
}

struct ActivityRow {
    id: i64,
    user_id: i64,
    kind: String,
    title: String,
    description: Option<String>,
    contact_id: Option<i64>,
    company_id: Option<i64>,
    deal_id: Option<i64>,
    due_date: Option<String>,
    completed_at: Option<String>,
    is_completed: bool,
    created_at: String,
    updated_at: String,
}

impl ActivityRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            kind: row.get(2)?,
            title: row.get(3)?,
            description: row.get(4)?,
            contact_id: row.get(5)?,
            company_id: row.get(6)?,
            deal_id: row.get(7)?,
            due_date: row.get(8)?,
            completed_at: row.get(9)?,
            is_completed: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    fn into_activity(self) -> Result<Activity> {
        Ok(Activity {
            id: self.id,
            user_id: self.user_id,
            kind: parse_enum(&self.kind, "activity type")?,
            title: self.title,
            description: self.description,
            contact_id: self.contact_id,
            company_id: self.company_id,
            deal_id: self.deal_id,
            due_date: self.due_date,
            completed_at: self.completed_at,
            is_completed: self.is_completed,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
