use checkuser_core::{
  Error as CoreError,
  column::Column,
  config::CidrLimits,
  event::{ActorId, EventCursor, FieldValue},
  range_key::{KeyRange, RangeKey},
  source::EventSource,
  target::{Target, TargetResolver},
};

use super::{NewEvent, at, insert, insert_actor, insert_comment, store, t0};
use crate::{Dialect, Error, SortOrder};

fn actor(id: i64) -> Target { Target::Actor(ActorId(id)) }

// ─── Target resolution ───────────────────────────────────────────────────────

#[tokio::test]
async fn resolver_uses_store_identities() {
  let s = store().await;
  insert_actor(&s, 42, "Example").await;
  let resolver = TargetResolver::new(s.clone(), CidrLimits::default());

  assert_eq!(resolver.resolve("Example").await.unwrap(), actor(42));
  assert!(resolver.resolve("Nobody").await.unwrap_err().is_invalid_target());

  let resolved = resolver
    .resolve_all(["Example", "10.0.0.0/8", "10.1.0.0/16", "Nobody"])
    .await
    .unwrap();
  let inputs: Vec<&str> = resolved.iter().map(|(input, _)| input.as_str()).collect();
  assert_eq!(inputs, ["Example", "10.1.0.0/16"]);
}

// ─── Ordering and limits ─────────────────────────────────────────────────────

#[tokio::test]
async fn one_event_per_source_newest_first() {
  let s = store().await;
  insert(&s, NewEvent::new(EventSource::Change, at(-3))).await;
  insert(&s, NewEvent::new(EventSource::LogEvent, at(-2))).await;
  insert(&s, NewEvent::new(EventSource::PrivateEvent, at(-1))).await;

  let rows = s
    .union_query(actor(1))
    .since(at(-10))
    .until(t0())
    .limit(2)
    .fetch_all()
    .await
    .unwrap();

  let got: Vec<_> = rows.iter().map(|r| (r.source, r.timestamp)).collect();
  assert_eq!(got, [
    (EventSource::PrivateEvent, at(-1)),
    (EventSource::LogEvent, at(-2)),
  ]);
}

/// Sort every matching row in memory and keep the first `limit`.
fn naive(
  events: &[(EventSource, i64, i64, i64)],
  wanted_actor: i64,
  limit: usize,
) -> Vec<(i64, i64, EventSource)> {
  let mut rows: Vec<_> = events
    .iter()
    .filter(|(_, _, actor, _)| *actor == wanted_actor)
    .map(|(source, id, _, ts)| (*ts, *id, *source))
    .collect();
  rows.sort_by(|a, b| (b.0, b.1, b.2.tag()).cmp(&(a.0, a.1, a.2.tag())));
  rows.truncate(limit);
  rows
}

#[tokio::test]
async fn union_matches_merge_of_every_source() {
  let s = store().await;
  let mut events = Vec::new();
  for i in 0..30_i64 {
    let source = EventSource::ALL[(i % 3) as usize];
    // Coarse timestamps so rows in different logs tie on time.
    let ts = (i * 7) % 11;
    let who = if i % 4 == 0 { 2 } else { 1 };
    let id = insert(&s, NewEvent::new(source, at(ts)).actor(who)).await;
    events.push((source, id, who, ts));
  }
  let total = events.iter().filter(|e| e.2 == 1).count();

  for limit in [0, 1, total, total + 5] {
    let rows = s.union_query(actor(1)).limit(limit).fetch_all().await.unwrap();
    let got: Vec<_> = rows
      .iter()
      .map(|r| ((r.timestamp - t0()).num_seconds(), r.id, r.source))
      .collect();
    assert_eq!(got, naive(&events, 1, limit), "limit {limit}");
  }
}

#[tokio::test]
async fn oldest_first_reverses_the_order() {
  let s = store().await;
  insert(&s, NewEvent::new(EventSource::Change, at(3))).await;
  insert(&s, NewEvent::new(EventSource::LogEvent, at(1))).await;
  insert(&s, NewEvent::new(EventSource::PrivateEvent, at(2))).await;

  let rows = s
    .union_query(actor(1))
    .order(SortOrder::OldestFirst)
    .fetch_all()
    .await
    .unwrap();
  let times: Vec<_> = rows.iter().map(|r| r.timestamp).collect();
  assert_eq!(times, [at(1), at(2), at(3)]);
}

#[tokio::test]
async fn every_branch_is_limited() {
  let s = store().await;
  for i in 0..20 {
    insert(&s, NewEvent::new(EventSource::Change, at(100 + i))).await;
  }
  insert(&s, NewEvent::new(EventSource::LogEvent, at(1))).await;
  insert(&s, NewEvent::new(EventSource::PrivateEvent, at(2))).await;

  let query = s.union_query(actor(1)).limit(3);
  let sql = query.to_sql(Dialect::Sqlite).unwrap().unwrap();
  assert_eq!(sql.matches("LIMIT").count(), 4, "{sql}");

  let rows = query.fetch_all().await.unwrap();
  assert_eq!(rows.len(), 3);
  assert!(rows.iter().all(|r| r.source == EventSource::Change));
  assert_eq!(rows[0].timestamp, at(119));
}

#[tokio::test]
async fn empty_store_and_empty_source_list() {
  let s = store().await;
  assert!(s.union_query(actor(1)).fetch_all().await.unwrap().is_empty());
  assert_eq!(s.union_query(actor(1)).fetch_row_count().await.unwrap(), 0);

  insert(&s, NewEvent::new(EventSource::Change, at(0))).await;
  let none = s.union_query(actor(1)).sources(Vec::new());
  assert_eq!(none.to_sql(Dialect::Sqlite).unwrap(), None);
  assert!(none.fetch_all().await.unwrap().is_empty());
  assert_eq!(none.fetch_row().await.unwrap(), None);
}

#[tokio::test]
async fn source_subset_and_time_window() {
  let s = store().await;
  insert(&s, NewEvent::new(EventSource::Change, at(-30))).await;
  insert(&s, NewEvent::new(EventSource::Change, at(-5))).await;
  insert(&s, NewEvent::new(EventSource::LogEvent, at(-4))).await;
  insert(&s, NewEvent::new(EventSource::PrivateEvent, at(-3))).await;

  let rows = s
    .union_query(actor(1))
    .sources([EventSource::PrivateEvent, EventSource::Change])
    .since(at(-10))
    .fetch_all()
    .await
    .unwrap();
  let got: Vec<_> = rows.iter().map(|r| r.source).collect();
  assert_eq!(got, [EventSource::PrivateEvent, EventSource::Change]);
}

// ─── Targets ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn range_and_single_ip_targets() {
  let s = store().await;
  insert(&s, NewEvent::new(EventSource::Change, at(1)).ip("10.0.0.1")).await;
  insert(&s, NewEvent::new(EventSource::LogEvent, at(2)).ip("10.0.0.255")).await;
  insert(&s, NewEvent::new(EventSource::PrivateEvent, at(3)).ip("10.0.1.0")).await;
  insert(&s, NewEvent::new(EventSource::Change, at(4)).ip("2001:db8::1")).await;

  let range = Target::Range(KeyRange::encode_str("10.0.0.0/24").unwrap());
  let rows = s.union_query(range).fetch_all().await.unwrap();
  let ips: Vec<_> = rows.iter().filter_map(|r| r.ip.as_deref()).collect();
  assert_eq!(ips, ["10.0.0.255", "10.0.0.1"]);

  let single = Target::SingleIp(RangeKey::encode_str("2001:db8::1").unwrap());
  let rows = s.union_query(single).fetch_all().await.unwrap();
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].ip_hex, Some(RangeKey::encode_str("2001:db8::1").unwrap()));
}

#[tokio::test]
async fn forwarded_for_searches_the_xff_key() {
  let s = store().await;
  insert(&s, NewEvent::new(EventSource::Change, at(1)).ip("10.0.0.1")).await;
  insert(
    &s,
    NewEvent::new(EventSource::LogEvent, at(2))
      .ip("192.0.2.1")
      .xff("10.0.0.1"),
  )
  .await;

  let target = Target::SingleIp(RangeKey::encode_str("10.0.0.1").unwrap());
  let direct = s.union_query(target.clone()).fetch_all().await.unwrap();
  assert_eq!(direct.len(), 1);
  assert_eq!(direct[0].source, EventSource::Change);

  let forwarded = s
    .union_query(target)
    .forwarded_for(true)
    .fetch_all()
    .await
    .unwrap();
  assert_eq!(forwarded.len(), 1);
  assert_eq!(forwarded[0].source, EventSource::LogEvent);
  assert_eq!(forwarded[0].xff.as_deref(), Some("10.0.0.1"));
}

// ─── Projection ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_columns_come_back_null() {
  let s = store().await;
  insert(&s, NewEvent::new(EventSource::Change, at(3)).reference(77)).await;
  insert(&s, NewEvent::new(EventSource::LogEvent, at(2)).reference(9)).await;
  insert(&s, NewEvent::new(EventSource::PrivateEvent, at(1))).await;

  let rows = s.union_query(actor(1)).fetch_all().await.unwrap();
  let [change, log, private] = rows.as_slice() else {
    panic!("expected three rows, got {}", rows.len());
  };

  assert_eq!(change.title.as_deref(), Some("Main_Page"));
  assert_eq!(change.this_oldid, Some(77));
  assert_eq!(change.log_id, None);
  assert_eq!(change.minor, Some(false));

  assert_eq!(log.log_id, Some(9));
  assert_eq!(log.title, None);
  assert_eq!(log.log_type, None);

  assert_eq!(private.log_action.as_deref(), Some("login-failure"));
  assert_eq!(private.log_params.as_ref().unwrap()["4::target"], "Example");
  assert_eq!(private.this_oldid, None);
  assert_eq!(private.agent.as_deref(), Some("Mozilla/5.0"));
}

#[tokio::test]
async fn joins_are_opt_in() {
  let s = store().await;
  insert_actor(&s, 1, "Example").await;
  insert_comment(&s, 5, "fix typo").await;
  insert(&s, NewEvent::new(EventSource::Change, at(1)).comment(5)).await;

  let query = s.union_query(actor(1));
  assert!(!query.needs_actor_join());
  let plain = query.fetch_row().await.unwrap().unwrap();
  assert_eq!(plain.actor_name, None);
  assert_eq!(plain.comment_text, None);

  let joined = s
    .union_query(actor(1))
    .with_actor_join()
    .with_comment_join()
    .fetch_row()
    .await
    .unwrap()
    .unwrap();
  assert_eq!(joined.actor_name.as_deref(), Some("Example"));
  assert_eq!(joined.comment_text.as_deref(), Some("fix typo"));

  let by_field = s.union_query(actor(1)).fields([Column::ActorName]);
  assert!(by_field.needs_actor_join());
  assert!(!by_field.needs_comment_join());
  let row = by_field.fetch_row().await.unwrap().unwrap();
  assert_eq!(row.actor_name.as_deref(), Some("Example"));
  assert_eq!(row.title, None);
}

#[tokio::test]
async fn mismatched_source_projections_fail() {
  let s = store().await;
  let query = s
    .union_query(actor(1))
    .fields([Column::Title])
    .source_fields(EventSource::LogEvent, [Column::LogId, Column::Agent]);

  let err = query.fetch_all().await.unwrap_err();
  assert!(
    matches!(
      err,
      Error::Core(CoreError::MalformedProjection {
        event_source: EventSource::LogEvent,
        expected: 4,
        found: 5,
      })
    ),
    "{err}"
  );
}

#[tokio::test]
async fn source_overrides_line_up_positionally() {
  let s = store().await;
  insert(&s, NewEvent::new(EventSource::Change, at(2))).await;
  insert(&s, NewEvent::new(EventSource::LogEvent, at(1))).await;

  let query = s
    .union_query(actor(1))
    .sources([EventSource::Change, EventSource::LogEvent])
    .fields([Column::Title])
    .source_fields(EventSource::LogEvent, [Column::Agent]);

  assert_eq!(query.fetch_field_values(Column::Ip).await.unwrap().len(), 2);
  // Title is projected by one branch only; the fetched column is separate.
  assert_eq!(
    query.fetch_field_values(Column::Title).await.unwrap(),
    [FieldValue::Text("Main_Page".into()), FieldValue::Null]
  );
  assert_eq!(
    query.fetch_field(Column::Agent).await.unwrap(),
    Some(FieldValue::Text("Mozilla/5.0".into()))
  );

  let rows = query.fetch_all().await.unwrap();
  assert_eq!(rows[0].title.as_deref(), Some("Main_Page"));
  // The log branch's agent arrives under the first branch's alias.
  assert_eq!(rows[1].source, EventSource::LogEvent);
  assert_eq!(rows[1].title.as_deref(), Some("Mozilla/5.0"));
  assert_eq!(rows[1].agent, None);
}

// ─── Terminal operations ─────────────────────────────────────────────────────

#[tokio::test]
async fn scalar_fetches() {
  let s = store().await;
  insert(&s, NewEvent::new(EventSource::Change, at(1)).ip("10.0.0.1")).await;
  insert(&s, NewEvent::new(EventSource::PrivateEvent, at(2)).ip("10.0.0.2")).await;
  insert(&s, NewEvent::new(EventSource::LogEvent, at(3)).ip("10.0.0.3")).await;

  let query = s.union_query(actor(1));
  assert_eq!(
    query.fetch_field(Column::Ip).await.unwrap(),
    Some(FieldValue::Text("10.0.0.3".into()))
  );
  assert_eq!(
    query.fetch_field(Column::Title).await.unwrap(),
    Some(FieldValue::Null)
  );
  assert_eq!(
    query.fetch_field_values(Column::Ip).await.unwrap(),
    ["10.0.0.3", "10.0.0.2", "10.0.0.1"].map(|ip| FieldValue::Text(ip.into()))
  );
  assert_eq!(s.union_query(actor(9)).fetch_field(Column::Ip).await.unwrap(), None);

  let first = query.fetch_row().await.unwrap().unwrap();
  assert_eq!(first.source, EventSource::LogEvent);

  assert_eq!(query.fetch_row_count().await.unwrap(), 3);
  assert_eq!(query.clone().limit(2).fetch_row_count().await.unwrap(), 2);
}

#[tokio::test]
async fn continuation_walks_every_row_once() {
  let s = store().await;
  let mut expected = Vec::new();
  for i in 0..25_i64 {
    let source = EventSource::ALL[(i % 3) as usize];
    let id = insert(&s, NewEvent::new(source, at(i / 4))).await;
    expected.push((source, id));
  }

  for order in [SortOrder::NewestFirst, SortOrder::OldestFirst] {
    let mut seen = Vec::new();
    let mut cursor: Option<EventCursor> = None;
    loop {
      let mut query = s.union_query(actor(1)).order(order).limit(4);
      if let Some(c) = cursor {
        query = query.continue_after(c);
      }
      let page = query.fetch_all().await.unwrap();
      let Some(last) = page.last() else { break };
      cursor = Some(last.cursor());
      seen.extend(page.iter().map(|r| (r.source, r.id)));
    }

    assert_eq!(seen.len(), expected.len(), "{order:?}");
    let mut sorted = seen.clone();
    sorted.sort_by_key(|(source, id)| (source.tag(), *id));
    sorted.dedup();
    assert_eq!(sorted.len(), expected.len(), "{order:?}");
  }
}

#[tokio::test]
async fn postgres_rendering() {
  let s = store().await;
  let sql = s
    .union_query(actor(1))
    .fields([Column::Title])
    .limit(10)
    .to_sql(Dialect::Postgres)
    .unwrap()
    .unwrap();

  assert!(sql.contains("CAST(NULL AS TEXT) AS title"), "{sql}");
  assert!(sql.contains("UNION ALL"), "{sql}");
  assert!(!sql.contains("INDEXED BY"), "{sql}");
  assert!(sql.ends_with("LIMIT $7"), "{sql}");
}
