use std::collections::HashSet;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::{Deserialize, Serialize};
use thread_kernel_core::{
    Account, AccountId, Block, Filter, FilterAction, FilterContext, FilterKeyword, Follow,
    InteractionPolicy, PolicyConditions, PolicyEntry, Status, StatusId, UserMute, Visibility,
};
use time::OffsetDateTime;

const LATEST_SCHEMA_VERSION: i64 = 2;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS accounts (
  id TEXT PRIMARY KEY,
  username TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS statuses (
  id TEXT PRIMARY KEY,
  account_id TEXT NOT NULL,
  in_reply_to_id TEXT,
  in_reply_to_account_id TEXT,
  boost_of_id TEXT,
  visibility INTEGER NOT NULL,
  content TEXT NOT NULL,
  spoiler_text TEXT NOT NULL,
  sensitive INTEGER NOT NULL CHECK (sensitive IN (0, 1)),
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  interaction_policy_json TEXT,
  FOREIGN KEY (account_id) REFERENCES accounts(id)
);

CREATE TABLE IF NOT EXISTS status_mentions (
  status_id TEXT NOT NULL,
  position INTEGER NOT NULL,
  account_id TEXT NOT NULL,
  PRIMARY KEY (status_id, position),
  FOREIGN KEY (status_id) REFERENCES statuses(id)
);

CREATE TABLE IF NOT EXISTS follows (
  account_id TEXT NOT NULL,
  target_account_id TEXT NOT NULL,
  PRIMARY KEY (account_id, target_account_id),
  FOREIGN KEY (account_id) REFERENCES accounts(id),
  FOREIGN KEY (target_account_id) REFERENCES accounts(id)
);

CREATE TABLE IF NOT EXISTS blocks (
  account_id TEXT NOT NULL,
  target_account_id TEXT NOT NULL,
  PRIMARY KEY (account_id, target_account_id),
  FOREIGN KEY (account_id) REFERENCES accounts(id),
  FOREIGN KEY (target_account_id) REFERENCES accounts(id)
);

CREATE INDEX IF NOT EXISTS idx_statuses_in_reply_to_id ON statuses(in_reply_to_id);
CREATE INDEX IF NOT EXISTS idx_statuses_account_id ON statuses(account_id);
CREATE INDEX IF NOT EXISTS idx_blocks_target ON blocks(target_account_id);
";

const MIGRATION_002_SQL: &str = r"
CREATE TABLE IF NOT EXISTS user_mutes (
  account_id TEXT NOT NULL,
  target_account_id TEXT NOT NULL,
  expires_at TEXT,
  PRIMARY KEY (account_id, target_account_id),
  FOREIGN KEY (account_id) REFERENCES accounts(id),
  FOREIGN KEY (target_account_id) REFERENCES accounts(id)
);

CREATE TABLE IF NOT EXISTS filters (
  id TEXT PRIMARY KEY,
  account_id TEXT NOT NULL,
  title TEXT NOT NULL,
  action TEXT NOT NULL CHECK (action IN ('warn','hide')),
  contexts_json TEXT NOT NULL,
  expires_at TEXT,
  FOREIGN KEY (account_id) REFERENCES accounts(id)
);

CREATE TABLE IF NOT EXISTS filter_keywords (
  filter_id TEXT NOT NULL,
  position INTEGER NOT NULL,
  keyword TEXT NOT NULL,
  whole_word INTEGER NOT NULL CHECK (whole_word IN (0, 1)),
  PRIMARY KEY (filter_id, position),
  FOREIGN KEY (filter_id) REFERENCES filters(id)
);

CREATE INDEX IF NOT EXISTS idx_filters_account_id ON filters(account_id);
";

const MIGRATIONS: [(i64, &str); 2] = [(1, MIGRATION_001_SQL), (2, MIGRATION_002_SQL)];

const STATUS_COLUMNS: &str = "id, account_id, in_reply_to_id, in_reply_to_account_id, boost_of_id,
    visibility, content, spoiler_text, sensitive, created_at, updated_at, interaction_policy_json";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
}

// Policies are persisted as entry ordinals so renaming a variant never
// changes stored data.
#[derive(Debug, Serialize, Deserialize)]
struct StoredConditions {
    yes: Vec<u8>,
    with_approval: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredPolicy {
    can_like: StoredConditions,
    can_reply: StoredConditions,
    can_announce: StoredConditions,
}

struct StatusRow {
    id: String,
    account_id: String,
    in_reply_to_id: Option<String>,
    in_reply_to_account_id: Option<String>,
    boost_of_id: Option<String>,
    visibility: i64,
    content: String,
    spoiler_text: String,
    sensitive: bool,
    created_at: String,
    updated_at: String,
    interaction_policy_json: Option<String>,
}

impl SqliteStore {
    /// Open a SQLite-backed thread store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let current = current_schema_version(&self.conn)?;
        if current > LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {current}; expected at most {LATEST_SCHEMA_VERSION}"
            ));
        }

        for (version, sql) in MIGRATIONS {
            if version <= current {
                continue;
            }
            let tx = self
                .conn
                .transaction()
                .with_context(|| format!("failed to start migration v{version} transaction"))?;
            tx.execute_batch(sql).with_context(|| format!("failed to apply migration v{version}"))?;
            record_schema_version(&tx, version)?;
            tx.commit().with_context(|| format!("failed to commit migration v{version}"))?;
            tracing::info!(version, "applied schema migration");
        }

        Ok(())
    }

    /// Run quick-check, foreign-key-check, and schema status health probes.
    ///
    /// # Errors
    /// Returns an error when any integrity probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            schema_status,
        })
    }

    /// # Errors
    /// Returns an error when the username is empty or already taken.
    pub fn write_account(&mut self, account: &Account) -> Result<()> {
        if account.username.trim().is_empty() {
            return Err(anyhow!("account validation failed: username MUST be non-empty"));
        }
        self.conn
            .execute(
                "INSERT INTO accounts(id, username) VALUES (?1, ?2)",
                params![account.id.as_str(), account.username],
            )
            .with_context(|| format!("failed to insert account {}", account.id))?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when the account row cannot be read.
    pub fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        self.conn
            .query_row(
                "SELECT id, username FROM accounts WHERE id = ?1",
                params![account_id.as_str()],
                |row| {
                    Ok(Account {
                        id: AccountId(row.get(0)?),
                        username: row.get(1)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("failed to load account {account_id}"))
    }

    /// Persist one validated status and its mentions.
    ///
    /// # Errors
    /// Returns an error when validation fails or any write in the transaction fails.
    pub fn write_status(&mut self, status: &Status) -> Result<()> {
        status.validate().map_err(|err| anyhow!("status validation failed: {err}"))?;

        let policy_json = status
            .interaction_policy
            .as_ref()
            .map(encode_policy)
            .transpose()?;

        let tx = self.conn.transaction().context("failed to start transaction")?;
        tx.execute(
            "INSERT INTO statuses(
                id, account_id, in_reply_to_id, in_reply_to_account_id, boost_of_id,
                visibility, content, spoiler_text, sensitive, created_at, updated_at,
                interaction_policy_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                status.id.as_str(),
                status.account_id.as_str(),
                status.in_reply_to_id.as_ref().map(StatusId::as_str),
                status.in_reply_to_account_id.as_ref().map(AccountId::as_str),
                status.boost_of_id.as_ref().map(StatusId::as_str),
                i64::from(status.visibility.ordinal()),
                status.content,
                status.spoiler_text,
                status.sensitive,
                rfc3339(status.created_at)?,
                rfc3339(status.updated_at)?,
                policy_json,
            ],
        )
        .with_context(|| format!("failed to insert status {}", status.id))?;

        Self::insert_mentions(&tx, status)?;

        tx.commit().context("failed to commit status write")?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when the row cannot be read or holds undecodable data.
    pub fn get_status(&self, status_id: &StatusId) -> Result<Option<Status>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {STATUS_COLUMNS} FROM statuses WHERE id = ?1"),
                params![status_id.as_str()],
                read_status_row,
            )
            .optional()
            .with_context(|| format!("failed to load status {status_id}"))?;

        row.map(|row| self.decode_status(row)).transpose()
    }

    /// The reply chain above `status`, nearest parent first.
    ///
    /// The walk stops at the first parent missing from storage, and at the first
    /// id seen twice.
    ///
    /// # Errors
    /// Returns an error when a parent row cannot be read or decoded.
    pub fn status_parents(&self, status: &Status) -> Result<Vec<Status>> {
        let mut parents = Vec::new();
        let mut seen = HashSet::from([status.id.clone()]);
        let mut next = status.in_reply_to_id.clone();

        while let Some(parent_id) = next {
            if !seen.insert(parent_id.clone()) {
                tracing::warn!(status_id = %status.id, %parent_id, "reply chain loops back on itself");
                break;
            }
            let Some(parent) = self.get_status(&parent_id)? else {
                break;
            };
            next = parent.in_reply_to_id.clone();
            parents.push(parent);
        }

        Ok(parents)
    }

    /// Every status below `status_id` in the reply tree, excluding `status_id` itself.
    ///
    /// # Errors
    /// Returns an error when descendant rows cannot be read or decoded.
    pub fn status_children(&self, status_id: &StatusId) -> Result<Vec<Status>> {
        // UNION (not UNION ALL) discards revisited ids, so cyclic data terminates.
        let sql = format!(
            "WITH RECURSIVE descendants(id) AS (
                SELECT id FROM statuses WHERE in_reply_to_id = ?1
                UNION
                SELECT statuses.id FROM statuses
                JOIN descendants ON statuses.in_reply_to_id = descendants.id
            )
            SELECT {STATUS_COLUMNS} FROM statuses
            WHERE id IN (SELECT id FROM descendants) AND id <> ?1
            ORDER BY id ASC"
        );

        let mut stmt = self.conn.prepare(&sql).context("failed to prepare descendant query")?;
        let rows = stmt
            .query_map(params![status_id.as_str()], read_status_row)
            .with_context(|| format!("failed to query descendants of {status_id}"))?;

        let mut children = Vec::new();
        for row in rows {
            children.push(self.decode_status(row?)?);
        }
        Ok(children)
    }

    /// # Errors
    /// Returns an error when the follow edge cannot be inserted.
    pub fn write_follow(&mut self, follow: &Follow) -> Result<()> {
        insert_edge(&self.conn, "follows", &follow.account_id, &follow.target_account_id)
    }

    /// # Errors
    /// Returns an error when the block edge cannot be inserted.
    pub fn write_block(&mut self, block: &Block) -> Result<()> {
        insert_edge(&self.conn, "blocks", &block.account_id, &block.target_account_id)
    }

    /// # Errors
    /// Returns an error when the follow lookup fails.
    pub fn is_following(&self, account_id: &AccountId, target_account_id: &AccountId) -> Result<bool> {
        let exists = self
            .conn
            .query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM follows WHERE account_id = ?1 AND target_account_id = ?2
                )",
                params![account_id.as_str(), target_account_id.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .context("failed to look up follow")?;
        Ok(exists == 1)
    }

    /// Whether either account blocks the other.
    ///
    /// # Errors
    /// Returns an error when the block lookup fails.
    pub fn is_blocked_either_way(&self, lhs: &AccountId, rhs: &AccountId) -> Result<bool> {
        let exists = self
            .conn
            .query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM blocks
                    WHERE (account_id = ?1 AND target_account_id = ?2)
                       OR (account_id = ?2 AND target_account_id = ?1)
                )",
                params![lhs.as_str(), rhs.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .context("failed to look up blocks")?;
        Ok(exists == 1)
    }

    /// Insert or replace the mute from `account_id` to `target_account_id`.
    ///
    /// # Errors
    /// Returns an error when the mute cannot be written.
    pub fn write_mute(&mut self, mute: &UserMute) -> Result<()> {
        let expires_at = mute.expires_at.map(rfc3339).transpose()?;
        self.conn
            .execute(
                "INSERT INTO user_mutes(account_id, target_account_id, expires_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(account_id, target_account_id) DO UPDATE SET expires_at = excluded.expires_at",
                params![mute.account_id.as_str(), mute.target_account_id.as_str(), expires_at],
            )
            .context("failed to write user mute")?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when mute rows cannot be read or decoded.
    pub fn account_mutes(&self, account_id: &AccountId) -> Result<Vec<UserMute>> {
        let mut stmt = self.conn.prepare(
            "SELECT target_account_id, expires_at FROM user_mutes
             WHERE account_id = ?1
             ORDER BY target_account_id ASC",
        )?;
        let rows = stmt.query_map(params![account_id.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;

        let mut mutes = Vec::new();
        for row in rows {
            let (target, expires_at) = row?;
            mutes.push(UserMute {
                account_id: account_id.clone(),
                target_account_id: AccountId(target),
                expires_at: expires_at.as_deref().map(parse_rfc3339).transpose()?,
            });
        }
        Ok(mutes)
    }

    /// Persist one validated filter and its keywords.
    ///
    /// # Errors
    /// Returns an error when validation fails or any write in the transaction fails.
    pub fn write_filter(&mut self, filter: &Filter) -> Result<()> {
        filter.validate().map_err(|err| anyhow!("filter validation failed: {err}"))?;
        let contexts = filter.contexts.iter().map(|context| context.as_str()).collect::<Vec<_>>();

        let tx = self.conn.transaction().context("failed to start transaction")?;
        tx.execute(
            "INSERT INTO filters(id, account_id, title, action, contexts_json, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                filter.id,
                filter.account_id.as_str(),
                filter.title,
                filter.action.as_str(),
                serde_json::to_string(&contexts).context("failed to serialize filter contexts")?,
                filter.expires_at.map(rfc3339).transpose()?,
            ],
        )
        .with_context(|| format!("failed to insert filter {}", filter.id))?;

        for (position, keyword) in filter.keywords.iter().enumerate() {
            tx.execute(
                "INSERT INTO filter_keywords(filter_id, position, keyword, whole_word)
                 VALUES (?1, ?2, ?3, ?4)",
                params![filter.id, i64::try_from(position)?, keyword.keyword, keyword.whole_word],
            )
            .with_context(|| format!("failed to insert keyword for filter {}", filter.id))?;
        }

        tx.commit().context("failed to commit filter write")?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when filter rows cannot be read or decoded.
    pub fn account_filters(&self, account_id: &AccountId) -> Result<Vec<Filter>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, action, contexts_json, expires_at FROM filters
             WHERE account_id = ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![account_id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut filters = Vec::new();
        for row in rows {
            let (id, title, action_raw, contexts_json, expires_at) = row?;
            let action = FilterAction::parse(&action_raw)
                .ok_or_else(|| anyhow!("unknown filter action: {action_raw}"))?;
            let context_names: Vec<String> = serde_json::from_str(&contexts_json)
                .with_context(|| format!("invalid contexts for filter {id}"))?;
            let contexts = context_names
                .iter()
                .map(|name| {
                    FilterContext::parse(name).ok_or_else(|| anyhow!("unknown filter context: {name}"))
                })
                .collect::<Result<Vec<_>>>()?;
            let keywords = self.load_keywords(&id)?;

            filters.push(Filter {
                id,
                account_id: account_id.clone(),
                title,
                keywords,
                contexts,
                action,
                expires_at: expires_at.as_deref().map(parse_rfc3339).transpose()?,
            });
        }
        Ok(filters)
    }

    fn insert_mentions(tx: &Transaction<'_>, status: &Status) -> Result<()> {
        for (position, account_id) in status.mentions.iter().enumerate() {
            tx.execute(
                "INSERT INTO status_mentions(status_id, position, account_id) VALUES (?1, ?2, ?3)",
                params![status.id.as_str(), i64::try_from(position)?, account_id.as_str()],
            )
            .with_context(|| format!("failed to insert mention for status {}", status.id))?;
        }
        Ok(())
    }

    fn load_mentions(&self, status_id: &str) -> Result<Vec<AccountId>> {
        let mut stmt = self.conn.prepare(
            "SELECT account_id FROM status_mentions WHERE status_id = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![status_id], |row| row.get::<_, String>(0))?;

        let mut mentions = Vec::new();
        for row in rows {
            mentions.push(AccountId(row?));
        }
        Ok(mentions)
    }

    fn load_keywords(&self, filter_id: &str) -> Result<Vec<FilterKeyword>> {
        let mut stmt = self.conn.prepare(
            "SELECT keyword, whole_word FROM filter_keywords
             WHERE filter_id = ?1
             ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![filter_id], |row| {
            Ok(FilterKeyword { keyword: row.get(0)?, whole_word: row.get(1)? })
        })?;

        let mut keywords = Vec::new();
        for row in rows {
            keywords.push(row?);
        }
        Ok(keywords)
    }

    fn decode_status(&self, row: StatusRow) -> Result<Status> {
        let visibility = u8::try_from(row.visibility)
            .ok()
            .and_then(Visibility::from_ordinal)
            .ok_or_else(|| {
                anyhow!("status {} has unknown visibility ordinal {}", row.id, row.visibility)
            })?;
        let interaction_policy = row
            .interaction_policy_json
            .as_deref()
            .map(decode_policy)
            .transpose()
            .with_context(|| format!("invalid interaction policy on status {}", row.id))?;
        let mentions = self.load_mentions(&row.id)?;

        Ok(Status {
            id: StatusId(row.id),
            account_id: AccountId(row.account_id),
            in_reply_to_id: row.in_reply_to_id.map(StatusId),
            in_reply_to_account_id: row.in_reply_to_account_id.map(AccountId),
            boost_of_id: row.boost_of_id.map(StatusId),
            visibility,
            content: row.content,
            spoiler_text: row.spoiler_text,
            sensitive: row.sensitive,
            mentions,
            created_at: parse_rfc3339(&row.created_at)?,
            updated_at: parse_rfc3339(&row.updated_at)?,
            interaction_policy,
        })
    }
}

fn read_status_row(row: &Row<'_>) -> rusqlite::Result<StatusRow> {
    Ok(StatusRow {
        id: row.get(0)?,
        account_id: row.get(1)?,
        in_reply_to_id: row.get(2)?,
        in_reply_to_account_id: row.get(3)?,
        boost_of_id: row.get(4)?,
        visibility: row.get(5)?,
        content: row.get(6)?,
        spoiler_text: row.get(7)?,
        sensitive: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
        interaction_policy_json: row.get(11)?,
    })
}

fn insert_edge(
    conn: &Connection,
    table: &str,
    account_id: &AccountId,
    target_account_id: &AccountId,
) -> Result<()> {
    if account_id == target_account_id {
        return Err(anyhow!("{table} edge MUST connect two different accounts"));
    }
    conn.execute(
        &format!("INSERT OR IGNORE INTO {table}(account_id, target_account_id) VALUES (?1, ?2)"),
        params![account_id.as_str(), target_account_id.as_str()],
    )
    .with_context(|| format!("failed to insert {table} edge {account_id} -> {target_account_id}"))?;
    Ok(())
}

fn encode_conditions(conditions: &PolicyConditions) -> StoredConditions {
    StoredConditions {
        yes: conditions.yes.iter().map(|entry| entry.ordinal()).collect(),
        with_approval: conditions.with_approval.iter().map(|entry| entry.ordinal()).collect(),
    }
}

fn encode_policy(policy: &InteractionPolicy) -> Result<String> {
    let stored = StoredPolicy {
        can_like: encode_conditions(&policy.can_like),
        can_reply: encode_conditions(&policy.can_reply),
        can_announce: encode_conditions(&policy.can_announce),
    };
    serde_json::to_string(&stored).context("failed to serialize interaction policy")
}

fn decode_entries(ordinals: &[u8]) -> Result<Vec<PolicyEntry>> {
    ordinals
        .iter()
        .map(|ordinal| {
            PolicyEntry::from_ordinal(*ordinal)
                .ok_or_else(|| anyhow!("unknown policy entry ordinal {ordinal}"))
        })
        .collect()
}

fn decode_conditions(stored: &StoredConditions) -> Result<PolicyConditions> {
    Ok(PolicyConditions {
        yes: decode_entries(&stored.yes)?,
        with_approval: decode_entries(&stored.with_approval)?,
    })
}

fn decode_policy(raw: &str) -> Result<InteractionPolicy> {
    let stored: StoredPolicy =
        serde_json::from_str(raw).context("failed to parse interaction policy")?;
    Ok(InteractionPolicy {
        can_like: decode_conditions(&stored.can_like)?,
        can_reply: decode_conditions(&stored.can_reply)?,
        can_announce: decode_conditions(&stored.can_announce)?,
    })
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = rfc3339(OffsetDateTime::now_utc())?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}
