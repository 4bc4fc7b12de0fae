//! SQLite policy adapter implementation.

use crate::rule::{MAX_FIELDS, Rule};
use crate::{Error, Result};
use async_trait::async_trait;
use casbin::{Adapter, Filter, Model};
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

const IN_MEMORY: &str = ":memory:";

/// SQLite-backed policy adapter.
pub struct SqliteAdapter {
    conn: Mutex<Connection>,
    filtered: bool,
}

impl SqliteAdapter {
    /// Open a policy database at the given path.
    ///
    /// With `create` unset the database file must already exist. The
    /// `casbin_rule` table is created either way.
    pub fn open(path: impl AsRef<Path>, create: bool) -> Result<Self> {
        let path = path.as_ref();
        if !create && path != Path::new(IN_MEMORY) && !path.exists() {
            return Err(Error::NotFound(path.display().to_string()));
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            filtered: false,
        })
    }

    fn conn(&mut self) -> &mut Connection {
        self.conn.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load every stored rule.
    pub fn rules(&mut self) -> Result<Vec<Rule>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT ptype, v0, v1, v2, v3, v4, v5 FROM casbin_rule ORDER BY id",
        )?;
        let rules = stmt
            .query_map([], |row| {
                let ptype: String = row.get(0)?;
                let columns: [String; MAX_FIELDS] = [
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ];
                Ok(Rule::from_columns(ptype, columns))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rules)
    }

    /// Replace every stored rule in one transaction.
    pub fn replace_all(&mut self, rules: &[Rule]) -> Result<()> {
        let tx = self.conn().transaction()?;
        tx.execute("DELETE FROM casbin_rule", [])?;
        for rule in rules {
            insert(&tx, rule)?;
        }
        tx.commit()?;
        debug!(count = rules.len(), "saved policy rules");
        Ok(())
    }

    /// Insert rules, skipping duplicates. Returns whether anything changed.
    pub fn insert_all(&mut self, rules: &[Rule]) -> Result<bool> {
        let tx = self.conn().transaction()?;
        let mut changed = 0;
        for rule in rules {
            changed += insert(&tx, rule)?;
        }
        tx.commit()?;
        Ok(changed > 0)
    }

    /// Delete exact rules. Returns whether anything changed.
    pub fn delete_all(&mut self, rules: &[Rule]) -> Result<bool> {
        let tx = self.conn().transaction()?;
        let mut changed = 0;
        for rule in rules {
            let [v0, v1, v2, v3, v4, v5] = rule.columns();
            changed += tx.execute(
                "DELETE FROM casbin_rule WHERE ptype = ?1 AND v0 = ?2 AND v1 = ?3 \
                 AND v2 = ?4 AND v3 = ?5 AND v4 = ?6 AND v5 = ?7",
                params![rule.ptype, v0, v1, v2, v3, v4, v5],
            )?;
        }
        tx.commit()?;
        Ok(changed > 0)
    }

    /// Delete rules whose fields starting at `field_index` match the given
    /// values, where empty values match anything.
    pub fn delete_filtered(
        &mut self,
        ptype: &str,
        field_index: usize,
        field_values: &[String],
    ) -> Result<bool> {
        let doomed: Vec<Rule> = self
            .rules()?
            .into_iter()
            .filter(|rule| rule.ptype == ptype)
            .filter(|rule| {
                field_values.iter().enumerate().all(|(i, want)| {
                    want.is_empty()
                        || rule.values.get(field_index + i).map(String::as_str) == Some(want.as_str())
                })
            })
            .collect();
        if doomed.is_empty() {
            return Ok(false);
        }
        self.delete_all(&doomed)
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS casbin_rule (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ptype TEXT NOT NULL,
            v0 TEXT NOT NULL DEFAULT '',
            v1 TEXT NOT NULL DEFAULT '',
            v2 TEXT NOT NULL DEFAULT '',
            v3 TEXT NOT NULL DEFAULT '',
            v4 TEXT NOT NULL DEFAULT '',
            v5 TEXT NOT NULL DEFAULT ''
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_casbin_rule_unique
            ON casbin_rule(ptype, v0, v1, v2, v3, v4, v5);
        "#,
    )?;
    Ok(())
}

fn insert(conn: &Connection, rule: &Rule) -> Result<usize> {
    let [v0, v1, v2, v3, v4, v5] = rule.columns();
    let changed = conn.execute(
        "INSERT OR IGNORE INTO casbin_rule (ptype, v0, v1, v2, v3, v4, v5) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![rule.ptype, v0, v1, v2, v3, v4, v5],
    )?;
    Ok(changed)
}

/// Collect every rule held by a model.
fn model_rules(m: &dyn Model) -> Result<Vec<Rule>> {
    let mut rules = Vec::new();
    for sec in ["p", "g"] {
        let Some(assertions) = m.get_model().get(sec) else {
            continue;
        };
        let mut ptypes: Vec<&String> = assertions.keys().collect();
        ptypes.sort();
        for ptype in ptypes {
            for values in m.get_policy(sec, ptype) {
                rules.push(Rule::new(ptype.as_str(), values)?);
            }
        }
    }
    Ok(rules)
}

fn to_rules(ptype: &str, rules: Vec<Vec<String>>) -> Result<Vec<Rule>> {
    rules.into_iter().map(|values| Rule::new(ptype, values)).collect()
}

// Several enforcers may share one database, so a row that a sibling already
// added or removed still counts as applied for the caller's model.
#[async_trait]
impl Adapter for SqliteAdapter {
    async fn load_policy(&mut self, m: &mut dyn Model) -> casbin::Result<()> {
        let rules = self.rules()?;
        debug!(count = rules.len(), "loading policy rules");
        for rule in rules {
            let sec = rule.section().to_string();
            m.add_policy(&sec, &rule.ptype, rule.values);
        }
        self.filtered = false;
        Ok(())
    }

    async fn load_filtered_policy<'a>(
        &mut self,
        m: &mut dyn Model,
        f: Filter<'a>,
    ) -> casbin::Result<()> {
        for rule in self.rules()? {
            let filter = match rule.section() {
                "p" => &f.p,
                "g" => &f.g,
                _ => continue,
            };
            if rule.matches(filter) {
                let sec = rule.section().to_string();
                m.add_policy(&sec, &rule.ptype, rule.values);
            }
        }
        self.filtered = true;
        Ok(())
    }

    async fn save_policy(&mut self, m: &mut dyn Model) -> casbin::Result<()> {
        let rules = model_rules(m)?;
        self.replace_all(&rules)?;
        Ok(())
    }

    async fn clear_policy(&mut self) -> casbin::Result<()> {
        self.replace_all(&[])?;
        Ok(())
    }

    fn is_filtered(&self) -> bool {
        self.filtered
    }

    async fn add_policy(
        &mut self,
        _sec: &str,
        ptype: &str,
        rule: Vec<String>,
    ) -> casbin::Result<bool> {
        self.insert_all(&[Rule::new(ptype, rule)?])?;
        Ok(true)
    }

    async fn add_policies(
        &mut self,
        _sec: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> casbin::Result<bool> {
        self.insert_all(&to_rules(ptype, rules)?)?;
        Ok(true)
    }

    async fn remove_policy(
        &mut self,
        _sec: &str,
        ptype: &str,
        rule: Vec<String>,
    ) -> casbin::Result<bool> {
        self.delete_all(&[Rule::new(ptype, rule)?])?;
        Ok(true)
    }

    async fn remove_policies(
        &mut self,
        _sec: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> casbin::Result<bool> {
        self.delete_all(&to_rules(ptype, rules)?)?;
        Ok(true)
    }

    async fn remove_filtered_policy(
        &mut self,
        _sec: &str,
        ptype: &str,
        field_index: usize,
        field_values: Vec<String>,
    ) -> casbin::Result<bool> {
        self.delete_filtered(ptype, field_index, &field_values)?;
        Ok(true)
    }
}
