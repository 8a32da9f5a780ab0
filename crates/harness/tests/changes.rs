use crrlite_core::consts::CAUSAL_LENGTH_SENTINEL;
use crrlite_core::{Changeset, ColumnValue};
use crrlite_engine::{ChangeFilter, SiteFilter};
use crrlite_harness::{TestNetwork, TestPeer};

fn peer_with_foo_and_bar() -> Result<TestPeer, Box<dyn std::error::Error>> {
    let peer = TestPeer::new()?;
    peer.create_crr("foo", "CREATE TABLE foo (a PRIMARY KEY, b)")?;
    peer.create_crr("bar", "CREATE TABLE bar (x PRIMARY KEY, y)")?;
    Ok(peer)
}

#[test]
fn changes_come_back_in_clock_order_with_values() -> Result<(), Box<dyn std::error::Error>> {
    let peer = peer_with_foo_and_bar()?;
    peer.exec("INSERT INTO bar VALUES ('k', 10)")?;
    peer.exec("INSERT INTO foo VALUES (1, 'one')")?;
    peer.exec("UPDATE bar SET y = 11 WHERE x = 'k'")?;

    let changes = peer.crr.changes(&ChangeFilter::default())?;
    assert!(changes.windows(2).all(|w| (w[0].db_version, w[0].seq) <= (w[1].db_version, w[1].seq)));

    // The causal length and the column edit of one update share a slot.
    let mut summary: Vec<(i64, &str, &str, Option<ColumnValue>)> = changes
        .iter()
        .map(|c| (c.db_version, c.table.as_str(), c.cid.as_str(), c.value.clone()))
        .collect();
    summary.sort_by(|x, y| (x.0, x.2).cmp(&(y.0, y.2)));
    assert_eq!(
        summary,
        vec![
            (2, "foo", "b", Some(ColumnValue::from("one"))),
            (3, "bar", "__crsql_cl", None),
            (3, "bar", "y", Some(ColumnValue::Integer(11))),
        ]
    );
    assert!(changes.iter().all(|c| c.site_id.is_none()));

    let y = changes.iter().find(|c| c.cid == "y").ok_or("missing")?;
    assert_eq!(y.primary_key()?, vec![ColumnValue::from("k")]);
    Ok(())
}

#[test]
fn since_filter_is_exclusive() -> Result<(), Box<dyn std::error::Error>> {
    let peer = peer_with_foo_and_bar()?;
    peer.exec("INSERT INTO foo VALUES (1, 'one')")?;
    peer.exec("INSERT INTO foo VALUES (2, 'two')")?;
    peer.exec("INSERT INTO bar VALUES (3, 'three')")?;

    let changes = peer.crr.changes(&ChangeFilter::since(1))?;
    let versions: Vec<i64> = changes.iter().map(|c| c.db_version).collect();
    assert_eq!(versions, vec![2, 3]);

    let limited = peer.crr.changes(&ChangeFilter {
        limit: Some(1),
        ..ChangeFilter::since(1)
    })?;
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].db_version, 2);
    Ok(())
}

#[test]
fn table_filter_restricts_the_union() -> Result<(), Box<dyn std::error::Error>> {
    let peer = peer_with_foo_and_bar()?;
    peer.exec("INSERT INTO foo VALUES (1, 'one'); INSERT INTO bar VALUES (1, 'one');")?;

    let changes = peer.crr.changes(&ChangeFilter {
        tables: Some(vec!["bar".to_string(), "unknown".to_string()]),
        ..ChangeFilter::default()
    })?;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].table, "bar");

    let none = peer.crr.changes(&ChangeFilter {
        tables: Some(vec!["unknown".to_string()]),
        ..ChangeFilter::default()
    })?;
    assert!(none.is_empty());
    Ok(())
}

#[test]
fn deleted_rows_ship_a_valueless_tombstone() -> Result<(), Box<dyn std::error::Error>> {
    let peer = peer_with_foo_and_bar()?;
    peer.exec("INSERT INTO foo VALUES (1, 'one')")?;
    peer.exec("DELETE FROM foo WHERE a = 1")?;

    let changes = peer.crr.changes(&ChangeFilter::default())?;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].cid, CAUSAL_LENGTH_SENTINEL);
    assert!(changes[0].is_sentinel());
    assert_eq!(changes[0].col_version, 2);
    assert_eq!(changes[0].value, None);
    Ok(())
}

#[test]
fn changeset_round_trips_through_msgpack() -> Result<(), Box<dyn std::error::Error>> {
    let peer = peer_with_foo_and_bar()?;
    peer.exec("INSERT INTO foo VALUES (1, x'00ff'); INSERT INTO bar VALUES (2.5, NULL);")?;

    let changeset = peer.crr.changeset(&ChangeFilter::default())?;
    assert_eq!(changeset.site_id, peer.site_id()?);
    assert_eq!(changeset.max_db_version(), Some(2));

    let decoded = Changeset::from_msgpack(&changeset.to_msgpack()?)?;
    assert_eq!(decoded, changeset);
    Ok(())
}

#[test]
fn replayed_changes_are_attributed_to_the_sender() -> Result<(), Box<dyn std::error::Error>> {
    let mut network = TestNetwork::new();
    let a = network.add_peer()?;
    let b = network.add_peer()?;
    for i in [a, b] {
        network
            .peer(i)
            .create_crr("foo", "CREATE TABLE foo (a PRIMARY KEY, b)")?;
    }

    network.peer(a).exec("INSERT INTO foo VALUES (1, 'from a')")?;
    network.peer(a).exec("INSERT INTO foo VALUES (2, 'doomed')")?;
    network.peer(a).exec("DELETE FROM foo WHERE a = 2")?;
    assert_eq!(network.sync(a, b)?, 2);

    let receiver = network.peer(b);
    assert!(!receiver.crr.sync_bit()?);
    assert_eq!(receiver.value("foo", 1, "b")?, Some(ColumnValue::from("from a")));
    assert_eq!(receiver.value("foo", 2, "b")?, None);

    let sender_site = network.peer(a).site_id()?;
    let rows = receiver.clock_rows("foo")?;
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.site_id == Some(sender_site)));

    let local = receiver.crr.changes(&ChangeFilter {
        sites: SiteFilter::LocalOnly,
        ..ChangeFilter::default()
    })?;
    assert!(local.is_empty());

    let echo = receiver
        .crr
        .changes(&ChangeFilter::for_peer(sender_site, 0))?;
    assert!(echo.is_empty(), "receiver would echo the sender's own changes");

    let from_a = receiver.crr.changes(&ChangeFilter {
        sites: SiteFilter::Only(sender_site),
        ..ChangeFilter::default()
    })?;
    assert_eq!(from_a.len(), 2);
    Ok(())
}

#[test]
fn local_edit_after_replay_is_local_again() -> Result<(), Box<dyn std::error::Error>> {
    let mut network = TestNetwork::new();
    let a = network.add_peer()?;
    let b = network.add_peer()?;
    for i in [a, b] {
        network
            .peer(i)
            .create_crr("foo", "CREATE TABLE foo (a PRIMARY KEY, b)")?;
    }
    network.peer(a).exec("INSERT INTO foo VALUES (1, 'a')")?;
    network.sync(a, b)?;

    network.peer(b).exec("UPDATE foo SET b = 'b' WHERE a = 1")?;
    let row = network.peer(b).clock_row("foo", 1, "b")?.ok_or("missing")?;
    assert_eq!(row.site_id, None);
    assert_eq!(row.col_version, 2);

    assert_eq!(network.sync(b, a)?, 2);
    assert_eq!(
        network.peer(a).value("foo", 1, "b")?,
        Some(ColumnValue::from("b"))
    );
    Ok(())
}
