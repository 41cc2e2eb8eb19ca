use std::any::Any;
use std::sync::Arc;
use std::thread;
use parking_lot::Mutex;
use rowbridge::backend::SqliteConnector;
use rowbridge::cache::IndexChanged;
use rowbridge::dialect::{MySqlDialect, SqlDialect};
use rowbridge::query::{field, list, OrderBy};
use rowbridge::schema::{ColumnBuilder, DatabaseBuilder, DatabaseDefinition, DatabaseType, DefaultValue, HostType, TableBuilder};
use rowbridge::{DataSource, ErrorKind, MutableRow, PrimaryKeys, Result, RowData, TransactionState, Value};
use tempfile::TempDir;

fn definition() -> DatabaseDefinition {
    DatabaseBuilder::new("app")
        .table(
            TableBuilder::new("teams")
                .model("Team")
                .column(ColumnBuilder::new("id", HostType::Int64).primary_key().auto_increment())
                .column(ColumnBuilder::new("name", HostType::String).db_type(DatabaseType::Default, "varchar(50)")),
        )
        .table(
            TableBuilder::new("users")
                .model("User")
                .column(
                    ColumnBuilder::new("id", HostType::Uuid)
                        .primary_key()
                        .default_value(DefaultValue::NewUuidV7),
                )
                .column(ColumnBuilder::new("name", HostType::String).db_type(DatabaseType::Default, "varchar(50)"))
                .column(ColumnBuilder::new("role", HostType::Enum(vec!["Admin".into(), "User".into()])))
                .column(ColumnBuilder::new("team_id", HostType::Int64).nullable())
                .foreign_key("team_id", "teams", "id", "team", "members"),
        )
        .build()
        .unwrap()
}

struct Fixture {
    _dir: TempDir,
    source: DataSource,
}

fn open() -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let connector = SqliteConnector::open(dir.path().join("app.db")).unwrap();
    let source = DataSource::open(Arc::new(definition()), Arc::new(connector)).unwrap();
    source.create_schema().unwrap();
    Fixture { _dir: dir, source }
}

fn user(source: &DataSource, name: &str, role: &str) -> MutableRow {
    MutableRow::new(source.table("User").unwrap().clone())
        .with("name", name)
        .unwrap()
        .with("role", role)
        .unwrap()
}

fn seed_users(source: &DataSource) -> Vec<Arc<RowData>> {
    let mut tx = source.transaction().unwrap();
    let rows = [("ada", "Admin"), ("bob", "User"), ("cy", "Admin")]
        .into_iter()
        .map(|(name, role)| tx.insert(user(source, name, role)).unwrap())
        .collect();
    tx.commit().unwrap();
    rows
}

fn names(rows: &[Arc<RowData>]) -> Vec<String> {
    let mut names: Vec<String> = rows
        .iter()
        .map(|r| r.get("name").unwrap().as_str().unwrap().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn users_by_role_follow_inserts_and_deletes() {
    let fx = open();
    let source = &fx.source;
    let users = seed_users(source);

    let admins = source.query("users").unwrap().filter(field("role").equals("Admin")).to_rows().unwrap();
    assert_eq!(names(&admins), vec!["ada", "cy"]);

    let mut tx = source.transaction().unwrap();
    assert!(tx.delete(&users[0]).unwrap());
    tx.commit().unwrap();

    let admins = source.query("users").unwrap().filter(field("role").equals("Admin")).to_rows().unwrap();
    assert_eq!(names(&admins), vec!["cy"]);
    let cache = source.cache().table_by_name("users").unwrap();
    assert!(cache.peek(users[0].keys()).is_none());
    assert!(source.get("users", users[0].keys()).unwrap().is_none());
}

#[test]
fn rollback_leaves_cache_and_table_untouched() {
    let fx = open();
    let source = &fx.source;
    seed_users(source);
    let before = source.cache_stats().table("users").unwrap().rows;

    let mut tx = source.transaction().unwrap();
    let ghost = tx.insert(user(source, "ghost", "User")).unwrap();
    tx.rollback().unwrap();
    assert_eq!(tx.state(), TransactionState::RolledBack);

    assert_eq!(source.cache_stats().table("users").unwrap().rows, before);
    assert!(source.get("users", ghost.keys()).unwrap().is_none());
    assert_eq!(source.query("users").unwrap().count().unwrap(), 3);

    let err = tx.commit().unwrap_err();
    assert!(err.is(ErrorKind::InvalidState));
}

#[test]
fn committed_insert_is_visible_immediately() {
    let fx = open();
    let source = &fx.source;
    let mut tx = source.transaction().unwrap();
    let dee = tx.insert(user(source, "dee", "User")).unwrap();
    assert!(matches!(dee.get("id").unwrap(), Value::Uuid(_)));
    tx.commit().unwrap();

    let read = source.get("users", dee.keys()).unwrap().unwrap();
    assert!(Arc::ptr_eq(&read, &dee));
    let listed = source.query("users").unwrap().to_rows().unwrap();
    assert!(listed.iter().any(|r| Arc::ptr_eq(r, &dee)));
}

#[test]
fn negated_membership_excludes_exactly_the_listed_keys() {
    let fx = open();
    let source = &fx.source;
    let users = seed_users(source);
    let excluded: Vec<Value> = users[..2].iter().map(|u| u.get("id").unwrap().clone()).collect();

    let total = source.query("users").unwrap().count().unwrap();
    let rest = source
        .query("users")
        .unwrap()
        .filter(!list(excluded).contains(field("id")))
        .to_rows()
        .unwrap();
    assert_eq!(rest.len() as u64, total - 2);
    assert_eq!(names(&rest), vec!["cy"]);

    let nobody = source
        .query("users")
        .unwrap()
        .filter(list(Vec::<Value>::new()).contains(field("id")))
        .count()
        .unwrap();
    assert_eq!(nobody, 0);
}

#[test]
fn negated_group_is_not_split() {
    let fx = open();
    let source = &fx.source;
    seed_users(source);
    // not (admin and named ada)
    let rows = source
        .query("users")
        .unwrap()
        .filter(!(field("role").equals("Admin") & field("name").equals("ada")))
        .order_by(OrderBy::asc(field("name")))
        .to_rows()
        .unwrap();
    assert_eq!(names(&rows), vec!["bob", "cy"]);
}

struct Listener {
    seen: Mutex<Vec<IndexChanged>>,
}

fn on_team_change(listener: &Listener, _sender: &dyn Any, change: &IndexChanged) -> Result<()> {
    listener.seen.lock().push(change.clone());
    Ok(())
}

#[test]
fn moving_a_member_invalidates_both_teams() {
    let fx = open();
    let source = &fx.source;
    let teams = source.table("teams").unwrap().clone();

    let mut tx = source.transaction().unwrap();
    let red = tx.insert(MutableRow::new(teams.clone()).with("name", "red").unwrap()).unwrap();
    let blue = tx.insert(MutableRow::new(teams).with("name", "blue").unwrap()).unwrap();
    let member = tx
        .insert(user(source, "eve", "User").with("team_id", red.get("id").unwrap().clone()).unwrap())
        .unwrap();
    tx.commit().unwrap();

    assert_eq!(names(&source.related(&red, "members").unwrap()), vec!["eve"]);
    assert!(source.related(&blue, "members").unwrap().is_empty());
    let team = source.related(&member, "team").unwrap();
    assert!(Arc::ptr_eq(&team[0], &red));

    let listener = Arc::new(Listener { seen: Mutex::new(Vec::new()) });
    let users = source.cache().table_by_name("users").unwrap();
    assert!(users.events().subscribe("team_id", &listener, on_team_change));

    let mut tx = source.transaction().unwrap();
    let moved = tx
        .update(member.mutate().with("team_id", blue.get("id").unwrap().clone()).unwrap())
        .unwrap();
    tx.commit().unwrap();

    let seen: Vec<Value> = listener.seen.lock().iter().map(|c| c.value.clone()).collect();
    assert_eq!(seen, vec![red.get("id").unwrap().clone(), blue.get("id").unwrap().clone()]);
    assert!(source.related(&red, "members").unwrap().is_empty());
    let blue_members = source.related(&blue, "members").unwrap();
    assert_eq!(blue_members.len(), 1);
    assert!(Arc::ptr_eq(&blue_members[0], &moved));

    drop(listener);
    let mut tx = source.transaction().unwrap();
    tx.delete(&moved).unwrap();
    tx.commit().unwrap();
    assert_eq!(users.events().subscriber_count("team_id"), 0);
}

#[test]
fn concurrent_readers_share_one_instance() {
    let fx = open();
    let source = &fx.source;
    let users = seed_users(source);
    source.cache().clear();
    let key: PrimaryKeys = users[1].keys().clone();

    let rows: Vec<Arc<RowData>> = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| source.get("users", &key).unwrap().unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(rows.iter().all(|r| Arc::ptr_eq(r, &rows[0])));
    assert!(Arc::ptr_eq(&rows[0], &source.get("users", &key).unwrap().unwrap()));
}

#[test]
fn mariadb_ddl_keeps_native_uuid() {
    let def = definition();
    let users = def.table("users").unwrap();
    let mariadb = MySqlDialect::new(DatabaseType::MariaDb).create_table_sql(&def, users).unwrap();
    assert!(mariadb.contains("`id` UUID NOT NULL"));
    assert!(!mariadb.contains("BINARY(16)"));
    assert!(mariadb.contains("`name` VARCHAR(50) NOT NULL"));
    assert!(mariadb.contains("ENUM('Admin','User')"));

    let mysql = MySqlDialect::new(DatabaseType::MySql).create_table_sql(&def, users).unwrap();
    assert!(mysql.contains("`id` BINARY(16) NOT NULL"));
}
