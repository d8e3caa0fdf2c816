//! Integration tests for `SqliteStore` against an in-memory database.

mod union;

use chrono::{DateTime, Duration, TimeZone, Utc};
use checkuser_core::{range_key::RangeKey, source::EventSource};
use rusqlite::types::Value;

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

/// A fixed reference instant; fixtures are placed relative to it.
fn t0() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() }

fn at(offset_secs: i64) -> DateTime<Utc> { t0() + Duration::seconds(offset_secs) }

// ─── Event fixtures ──────────────────────────────────────────────────────────

struct NewEvent {
  source:     EventSource,
  at:         DateTime<Utc>,
  actor:      i64,
  ip:         Option<&'static str>,
  xff:        Option<&'static str>,
  comment_id: Option<i64>,
  /// `cuc_this_oldid` / `cule_log_id`; private events reference themselves.
  reference:  Option<i64>,
}

impl NewEvent {
  fn new(source: EventSource, at: DateTime<Utc>) -> Self {
    Self {
      source,
      at,
      actor: 1,
      ip: Some("10.0.0.1"),
      xff: None,
      comment_id: None,
      reference: None,
    }
  }

  fn actor(mut self, actor: i64) -> Self {
    self.actor = actor;
    self
  }

  fn ip(mut self, ip: &'static str) -> Self {
    self.ip = Some(ip);
    self
  }

  fn xff(mut self, xff: &'static str) -> Self {
    self.xff = Some(xff);
    self
  }

  fn comment(mut self, comment_id: i64) -> Self {
    self.comment_id = Some(comment_id);
    self
  }

  fn reference(mut self, reference: i64) -> Self {
    self.reference = Some(reference);
    self
  }
}

fn hex(addr: Option<&str>) -> Value {
  addr
    .map(|a| RangeKey::encode_str(a).unwrap().as_str().to_owned())
    .into()
}

/// Insert one event row and return its id.
async fn insert(store: &SqliteStore, event: NewEvent) -> i64 {
  let mut values: Vec<Value> = vec![
    crate::encode::encode_dt(event.at).into(),
    event.actor.into(),
    event.ip.map(str::to_owned).into(),
    hex(event.ip),
    event.xff.map(str::to_owned).into(),
    hex(event.xff),
    Value::from("Mozilla/5.0".to_owned()),
    event.comment_id.into(),
  ];

  let sql = match event.source {
    EventSource::Change => {
      values.push("Main_Page".to_owned().into());
      values.push(event.reference.into());
      "INSERT INTO cu_changes (cuc_timestamp, cuc_actor, cuc_ip, cuc_ip_hex,
         cuc_xff, cuc_xff_hex, cuc_agent, cuc_comment_id, cuc_title, cuc_this_oldid)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
    }
    EventSource::LogEvent => {
      values.push(event.reference.unwrap_or(0).into());
      "INSERT INTO cu_log_event (cule_timestamp, cule_actor, cule_ip, cule_ip_hex,
         cule_xff, cule_xff_hex, cule_agent, cule_comment_id, cule_log_id)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
    }
    EventSource::PrivateEvent => {
      "INSERT INTO cu_private_event (cupe_timestamp, cupe_actor, cupe_ip,
         cupe_ip_hex, cupe_xff, cupe_xff_hex, cupe_agent, cupe_comment_id,
         cupe_log_type, cupe_log_action, cupe_params)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'checkuser-private-event',
         'login-failure', '{\"4::target\":\"Example\"}')"
    }
  };

  store
    .primary
    .call(move |conn| {
      conn.execute(sql, rusqlite::params_from_iter(values))?;
      Ok(conn.last_insert_rowid())
    })
    .await
    .unwrap()
}

async fn insert_actor(store: &SqliteStore, id: i64, name: &'static str) {
  store
    .primary
    .call(move |conn| {
      conn.execute(
        "INSERT INTO actor (actor_id, actor_name) VALUES (?1, ?2)",
        rusqlite::params![id, name],
      )?;
      Ok(())
    })
    .await
    .unwrap();
}

async fn insert_comment(store: &SqliteStore, id: i64, text: &'static str) {
  store
    .primary
    .call(move |conn| {
      conn.execute(
        "INSERT INTO comment (comment_id, comment_text) VALUES (?1, ?2)",
        rusqlite::params![id, text],
      )?;
      Ok(())
    })
    .await
    .unwrap();
}

async fn count_rows(store: &SqliteStore, table: &'static str) -> i64 {
  store
    .primary
    .call(move |conn| {
      Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get(0)
      })?)
    })
    .await
    .unwrap()
}
