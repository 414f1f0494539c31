use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, ToSql};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid SQL identifier {0:?}")]
    InvalidIdentifier(String),
    #[error("natural key for {0} is empty")]
    EmptyKey(String),
    #[error("insert into {0} was ignored but no row matches its natural key")]
    MissingRow(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Outcome of website validation, stored as an integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WebsiteStatus {
    Unset = 0,
    Unreachable = 1,
    Reachable = 2,
    HostedPlatform = 3,
    LinkRedirector = 4,
    ThirdPartyCms = 5,
}

impl WebsiteStatus {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Unset),
            1 => Some(Self::Unreachable),
            2 => Some(Self::Reachable),
            3 => Some(Self::HostedPlatform),
            4 => Some(Self::LinkRedirector),
            5 => Some(Self::ThirdPartyCms),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Unreachable => "unreachable",
            Self::Reachable => "reachable",
            Self::HostedPlatform => "hosted platform",
            Self::LinkRedirector => "link redirector",
            Self::ThirdPartyCms => "third-party CMS",
        }
    }
}

impl ToSql for WebsiteStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for WebsiteStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code = i64::column_result(value)?;
        Self::from_code(code).ok_or(FromSqlError::OutOfRange(code))
    }
}

// ── Rows ──

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrganizationRow {
    pub name: String,
    pub district: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub website_original: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersonRow {
    pub name: String,
    pub phone: Option<String>,
    pub mobile: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MembershipRow {
    pub organization_id: i64,
    pub person_id: i64,
}

/// A row that can be upserted by its natural key.
pub trait Record {
    const TABLE: &'static str;
    const NATURAL_KEY: &'static [&'static str];

    /// Column/value pairs to insert; absent optional fields are simply omitted.
    fn fields(&self) -> Vec<(&'static str, SqlValue)>;
}

fn push_opt(fields: &mut Vec<(&'static str, SqlValue)>, column: &'static str, value: &Option<String>) {
    if let Some(v) = value {
        fields.push((column, SqlValue::Text(v.clone())));
    }
}

impl Record for OrganizationRow {
    const TABLE: &'static str = "organizations";
    const NATURAL_KEY: &'static [&'static str] = &["name", "district", "city", "region"];

    fn fields(&self) -> Vec<(&'static str, SqlValue)> {
        let mut f = vec![("name", SqlValue::Text(self.name.clone()))];
        push_opt(&mut f, "district", &self.district);
        push_opt(&mut f, "address", &self.address);
        push_opt(&mut f, "city", &self.city);
        push_opt(&mut f, "region", &self.region);
        push_opt(&mut f, "postal_code", &self.postal_code);
        push_opt(&mut f, "phone", &self.phone);
        push_opt(&mut f, "email", &self.email);
        push_opt(&mut f, "website", &self.website);
        push_opt(&mut f, "website_original", &self.website_original);
        f
    }
}

impl Record for PersonRow {
    const TABLE: &'static str = "persons";
    const NATURAL_KEY: &'static [&'static str] = &["name", "phone", "mobile", "email"];

    fn fields(&self) -> Vec<(&'static str, SqlValue)> {
        let mut f = vec![("name", SqlValue::Text(self.name.clone()))];
        push_opt(&mut f, "phone", &self.phone);
        push_opt(&mut f, "mobile", &self.mobile);
        push_opt(&mut f, "email", &self.email);
        f
    }
}

impl Record for MembershipRow {
    const TABLE: &'static str = "memberships";
    const NATURAL_KEY: &'static [&'static str] = &["organization_id", "person_id"];

    fn fields(&self) -> Vec<(&'static str, SqlValue)> {
        vec![
            ("organization_id", SqlValue::Integer(self.organization_id)),
            ("person_id", SqlValue::Integer(self.person_id)),
        ]
    }
}

/// Website candidate for the sweep passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebsiteRow {
    pub id: i64,
    pub website: String,
}

/// Row selections used by the probing passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebsiteFilter {
    /// Never probed, or probed and found unreachable.
    Unprobed,
    Reachable,
    ReachableUntagged,
    ReachableOrVendor,
}

impl WebsiteFilter {
    fn condition(self) -> &'static str {
        match self {
            Self::Unprobed => "website_status IN (0, 1)",
            Self::Reachable => "website_status = 2",
            Self::ReachableUntagged => "website_status = 2 AND website_platform IS NULL",
            Self::ReachableOrVendor => "website_status IN (2, 5)",
        }
    }
}

// ── Store ──

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS organizations (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        name             TEXT NOT NULL,
        district         TEXT,
        address          TEXT,
        city             TEXT,
        region           TEXT,
        postal_code      TEXT,
        phone            TEXT,
        email            TEXT,
        website          TEXT,
        website_original TEXT,
        website_status   INTEGER NOT NULL DEFAULT 0,
        website_platform TEXT,
        UNIQUE(name, district, city, region) ON CONFLICT IGNORE
    );
    CREATE INDEX IF NOT EXISTS idx_organizations_status ON organizations(website_status);

    CREATE TABLE IF NOT EXISTS persons (
        id     INTEGER PRIMARY KEY AUTOINCREMENT,
        name   TEXT NOT NULL,
        phone  TEXT,
        mobile TEXT,
        email  TEXT,
        UNIQUE(name, phone, mobile, email) ON CONFLICT IGNORE
    );

    CREATE TABLE IF NOT EXISTS memberships (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        organization_id INTEGER NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
        person_id       INTEGER NOT NULL REFERENCES persons(id) ON DELETE CASCADE,
        UNIQUE(organization_id, person_id) ON CONFLICT IGNORE
    );
    CREATE INDEX IF NOT EXISTS idx_memberships_person ON memberships(person_id);
";

/// Owned handle over the SQLite connection. Dropping it closes the connection.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(SCHEMA)
            .context("Failed to create schema")?;
        Ok(())
    }

    #[cfg(test)]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn save<R: Record>(&self, record: &R) -> Result<i64, StoreError> {
        self.upsert(R::TABLE, &record.fields(), R::NATURAL_KEY)
    }

    /// Return the id of the row matching `key` in `table`, inserting `fields`
    /// when no such row exists. Existing rows are never updated.
    ///
    /// Key columns missing from `fields` (or NULL) are matched and stored as
    /// the empty string so that lookups and the UNIQUE constraint agree.
    pub fn upsert(
        &self,
        table: &str,
        fields: &[(&str, SqlValue)],
        key: &[&str],
    ) -> Result<i64, StoreError> {
        check_identifier(table)?;
        if key.is_empty() {
            return Err(StoreError::EmptyKey(table.to_string()));
        }
        for column in key.iter().chain(fields.iter().map(|(c, _)| c)) {
            check_identifier(column)?;
        }

        let key_values: Vec<SqlValue> = key
            .iter()
            .map(|k| {
                match fields.iter().find(|(c, _)| c == k).map(|(_, v)| v) {
                    Some(SqlValue::Null) | None => SqlValue::Text(String::new()),
                    Some(v) => v.clone(),
                }
            })
            .collect();

        if let Some(id) = self.find_by_key(table, key, &key_values)? {
            return Ok(id);
        }

        let mut columns: Vec<&str> = Vec::with_capacity(fields.len() + key.len());
        let mut values: Vec<SqlValue> = Vec::with_capacity(fields.len() + key.len());
        for (column, value) in fields {
            if key.contains(column) {
                continue;
            }
            columns.push(*column);
            values.push(value.clone());
        }
        for (column, value) in key.iter().zip(&key_values) {
            columns.push(*column);
            values.push(value.clone());
        }

        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders.join(", ")
        );
        let inserted = self.conn.execute(&sql, params_from_iter(values.iter()))?;
        if inserted == 1 {
            let id = self.conn.last_insert_rowid();
            debug!(table, id, "inserted row");
            return Ok(id);
        }

        // ON CONFLICT IGNORE swallowed the insert.
        self.find_by_key(table, key, &key_values)?
            .ok_or_else(|| StoreError::MissingRow(table.to_string()))
    }

    fn find_by_key(
        &self,
        table: &str,
        key: &[&str],
        values: &[SqlValue],
    ) -> Result<Option<i64>, StoreError> {
        let conditions: Vec<String> = key
            .iter()
            .enumerate()
            .map(|(i, k)| format!("{} = ?{}", k, i + 1))
            .collect();
        let sql = format!(
            "SELECT id FROM {} WHERE {} LIMIT 1",
            table,
            conditions.join(" AND ")
        );
        let id = self
            .conn
            .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))
            .optional()?;
        Ok(id)
    }

    // ── Sweep ──

    /// Null out websites that are known not to belong to an organization.
    pub fn clear_denied_websites(&self, exact: &[&str], patterns: &[&str]) -> Result<usize> {
        let mut cleared = 0;
        {
            let mut stmt = self
                .conn
                .prepare("UPDATE organizations SET website = NULL WHERE website = ?1")?;
            for url in exact {
                cleared += stmt.execute(params![url])?;
            }
        }
        cleared += self.clear_matching(patterns)?;
        Ok(cleared)
    }

    fn clear_matching(&self, patterns: &[&str]) -> Result<usize> {
        let mut stmt = self.conn.prepare(
            "UPDATE organizations SET website = NULL WHERE website LIKE '%' || ?1 || '%'",
        )?;
        let mut cleared = 0;
        for p in patterns {
            cleared += stmt.execute(params![p])?;
        }
        Ok(cleared)
    }

    /// Flag websites containing any of `patterns` with `status`, leaving rows
    /// that already carry a flag untouched.
    pub fn flag_websites(&self, patterns: &[&str], status: WebsiteStatus) -> Result<usize> {
        let mut stmt = self.conn.prepare(
            "UPDATE organizations SET website_status = ?1
             WHERE website LIKE '%' || ?2 || '%' AND website_status < 3",
        )?;
        let mut flagged = 0;
        for p in patterns {
            flagged += stmt.execute(params![status, p])?;
        }
        Ok(flagged)
    }

    pub fn fetch_websites(&self, filter: WebsiteFilter) -> Result<Vec<WebsiteRow>> {
        let sql = format!(
            "SELECT id, website FROM organizations
             WHERE website IS NOT NULL AND website != '' AND {}
             ORDER BY id",
            filter.condition()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(WebsiteRow {
                    id: row.get(0)?,
                    website: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Record a liveness result unless the row has been flagged in the meantime.
    pub fn set_liveness(&self, id: i64, status: WebsiteStatus) -> Result<bool> {
        let n = self.conn.execute(
            "UPDATE organizations SET website_status = ?1
             WHERE id = ?2 AND website_status IN (0, 1)",
            params![status, id],
        )?;
        Ok(n == 1)
    }

    pub fn set_vendor(&self, id: i64, vendor: &str) -> Result<bool> {
        let n = self.conn.execute(
            "UPDATE organizations SET website_status = ?1, website_platform = ?2 WHERE id = ?3",
            params![WebsiteStatus::ThirdPartyCms, vendor, id],
        )?;
        Ok(n == 1)
    }

    // ── Stats ──

    pub fn get_stats(&self) -> Result<Stats> {
        let count = |sql: &str| -> Result<usize> {
            Ok(self.conn.query_row(sql, [], |r| r.get(0))?)
        };
        let organizations = count("SELECT COUNT(*) FROM organizations")?;
        let persons = count("SELECT COUNT(*) FROM persons")?;
        let memberships = count("SELECT COUNT(*) FROM memberships")?;
        let with_website =
            count("SELECT COUNT(*) FROM organizations WHERE website IS NOT NULL AND website != ''")?;

        let mut stmt = self.conn.prepare(
            "SELECT website_status, COUNT(*) FROM organizations
             GROUP BY website_status ORDER BY website_status",
        )?;
        let by_status = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT website_platform, COUNT(*) FROM organizations
             WHERE website_platform IS NOT NULL
             GROUP BY website_platform ORDER BY website_platform",
        )?;
        let by_platform = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Stats {
            organizations,
            persons,
            memberships,
            with_website,
            by_status,
            by_platform,
        })
    }
}

fn check_identifier(ident: &str) -> Result<(), StoreError> {
    let valid = !ident.is_empty() && ident.chars().all(|c| c.is_ascii_lowercase() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(ident.to_string()))
    }
}

pub struct Stats {
    pub organizations: usize,
    pub persons: usize,
    pub memberships: usize,
    pub with_website: usize,
    pub by_status: Vec<(WebsiteStatus, usize)>,
    pub by_platform: Vec<(String, usize)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn church(name: &str, city: Option<&str>) -> OrganizationRow {
        OrganizationRow {
            name: name.to_string(),
            district: Some("Presbitério Paulistano".into()),
            city: city.map(str::to_string),
            region: Some("SP".into()),
            website: Some("https://ipb.example.org/".into()),
            ..Default::default()
        }
    }

    fn count(store: &Store, table: &str) -> i64 {
        store
            .conn()
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn upsert_same_key_returns_same_id() {
        let store = Store::open_in_memory().unwrap();
        let a = store.save(&church("IP Central", Some("São Paulo"))).unwrap();
        let b = store.save(&church("IP Central", Some("São Paulo"))).unwrap();
        assert_eq!(a, b);
        assert_eq!(count(&store, "organizations"), 1);
    }

    #[test]
    fn upsert_keeps_existing_fields() {
        let store = Store::open_in_memory().unwrap();
        let id = store.save(&church("IP Central", Some("São Paulo"))).unwrap();
        let mut changed = church("IP Central", Some("São Paulo"));
        changed.phone = Some("(11) 1234-5678".into());
        assert_eq!(store.save(&changed).unwrap(), id);

        let phone: Option<String> = store
            .conn()
            .query_row("SELECT phone FROM organizations WHERE id = ?1", [id], |r| r.get(0))
            .unwrap();
        assert_eq!(phone, None);
    }

    #[test]
    fn missing_key_fields_match_as_empty() {
        let store = Store::open_in_memory().unwrap();
        let a = store.save(&church("IP Vila Nova", None)).unwrap();
        let b = store.save(&church("IP Vila Nova", None)).unwrap();
        assert_eq!(a, b);

        let city: String = store
            .conn()
            .query_row("SELECT city FROM organizations WHERE id = ?1", [a], |r| r.get(0))
            .unwrap();
        assert_eq!(city, "");
    }

    #[test]
    fn distinct_keys_insert_distinct_rows() {
        let store = Store::open_in_memory().unwrap();
        let a = store.save(&church("IP Central", Some("São Paulo"))).unwrap();
        let b = store.save(&church("IP Central", Some("Campinas"))).unwrap();
        assert_ne!(a, b);
        assert_eq!(count(&store, "organizations"), 2);
    }

    #[test]
    fn persons_and_memberships() {
        let store = Store::open_in_memory().unwrap();
        let org = store.save(&church("IP Central", Some("São Paulo"))).unwrap();
        let pastor = PersonRow {
            name: "Rev. João Silva".into(),
            mobile: Some("(11) 98888-7777".into()),
            ..Default::default()
        };
        let p1 = store.save(&pastor).unwrap();
        let p2 = store.save(&pastor).unwrap();
        assert_eq!(p1, p2);

        let link = MembershipRow { organization_id: org, person_id: p1 };
        let l1 = store.save(&link).unwrap();
        let l2 = store.save(&link).unwrap();
        assert_eq!(l1, l2);
        assert_eq!(count(&store, "memberships"), 1);
    }

    #[test]
    fn deleting_parent_cascades_membership() {
        let store = Store::open_in_memory().unwrap();
        let org = store.save(&church("IP Central", Some("São Paulo"))).unwrap();
        let person = store
            .save(&PersonRow { name: "Rev. Ana".into(), ..Default::default() })
            .unwrap();
        store
            .save(&MembershipRow { organization_id: org, person_id: person })
            .unwrap();

        store
            .conn()
            .execute("DELETE FROM persons WHERE id = ?1", [person])
            .unwrap();
        assert_eq!(count(&store, "memberships"), 0);
        assert_eq!(count(&store, "organizations"), 1);
    }

    #[test]
    fn rejects_bad_identifiers() {
        let store = Store::open_in_memory().unwrap();
        let err = store
            .upsert("persons; DROP TABLE persons", &[("name", SqlValue::Text("x".into()))], &["name"])
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidIdentifier(_)));

        let err = store
            .upsert("persons", &[("name", SqlValue::Text("x".into()))], &[])
            .unwrap_err();
        assert!(matches!(err, StoreError::EmptyKey(_)));
    }

    #[test]
    fn constraint_violation_surfaces() {
        let store = Store::open_in_memory().unwrap();
        let err = store
            .save(&MembershipRow { organization_id: 41, person_id: 42 })
            .unwrap_err();
        assert!(matches!(err, StoreError::Sqlite(_)));
    }

    #[test]
    fn website_cleanup_and_flags() {
        let store = Store::open_in_memory().unwrap();
        let mut fb = church("IP Facebook", Some("Recife"));
        fb.website = Some("https://www.facebook.com/ipfb".into());
        let fb_id = store.save(&fb).unwrap();
        let mut wix = church("IP Wix", Some("Natal"));
        wix.website = Some("https://ipwix.wixsite.com/home".into());
        let wix_id = store.save(&wix).unwrap();
        let mut gmail = church("IP Gmail", Some("Olinda"));
        gmail.website = Some("http://gmail.com/".into());
        store.save(&gmail).unwrap();
        store.save(&church("IP Central", Some("São Paulo"))).unwrap();

        let cleared = store
            .clear_denied_websites(&["http://gmail.com/"], &["facebook"])
            .unwrap();
        assert_eq!(cleared, 2);
        assert_eq!(store.flag_websites(&["wixsite"], WebsiteStatus::HostedPlatform).unwrap(), 1);

        let remaining = store.fetch_websites(WebsiteFilter::Unprobed).unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining.iter().all(|r| r.id != fb_id && r.id != wix_id));

        let status: WebsiteStatus = store
            .conn()
            .query_row("SELECT website_status FROM organizations WHERE id = ?1", [wix_id], |r| r.get(0))
            .unwrap();
        assert_eq!(status, WebsiteStatus::HostedPlatform);
    }

    #[test]
    fn liveness_does_not_override_flags() {
        let store = Store::open_in_memory().unwrap();
        let id = store.save(&church("IP Central", Some("São Paulo"))).unwrap();
        assert!(store.set_liveness(id, WebsiteStatus::Unreachable).unwrap());
        assert!(store.set_liveness(id, WebsiteStatus::Reachable).unwrap());
        assert!(store.set_vendor(id, "Inovaki").unwrap());
        assert!(!store.set_liveness(id, WebsiteStatus::Unreachable).unwrap());

        let stats = store.get_stats().unwrap();
        assert_eq!(stats.by_status, vec![(WebsiteStatus::ThirdPartyCms, 1)]);
        assert_eq!(stats.by_platform, vec![("Inovaki".to_string(), 1)]);
    }

    #[test]
    fn schema_is_rerunnable() {
        let store = Store::open_in_memory().unwrap();
        store.init_schema().unwrap();
        store.init_schema().unwrap();
    }
}
