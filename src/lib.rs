pub mod backend;
pub mod cache;
pub mod core;
pub mod dialect;
pub mod events;
pub mod query;
pub mod schema;

pub use crate::core::database::DataSource;
pub use crate::core::error::{Error, ErrorKind, Result};
pub use crate::core::transaction::{Transaction, TransactionState};
pub use crate::core::types::{MutableRow, PrimaryKeys, RowData, Value};

/*
┌──────────────────────────────── ROWBRIDGE LAYOUT ────────────────────────────────┐
│                                                                                    │
│  DataSource ── definition: Arc<DatabaseDefinition>   (schema::*)                   │
│     │        ── connector:  Arc<dyn Connector>       (backend::*)                  │
│     │        ── dialect:    Arc<dyn SqlDialect>      (dialect::*)                  │
│     │        ── cache:      Arc<DatabaseCache>       (cache::*)                    │
│     │                                                                              │
│     ├── query(table) ─► Select ─► translator ─► WhereGroup ─► SelectQuery ─► Sql   │
│     │                      │                                                       │
│     │                      └─► keys ─► TableCache::get_rows_by_keys ─► RowData     │
│     │                                                                              │
│     ├── related(row, name) ─► TableCache::get_rows ─► IndexCache ─► RowData        │
│     │                                                                              │
│     └── transaction() ─► Transaction                                               │
│              insert / update / delete ─► BackendTransaction (runs at once)         │
│              commit ─► backend commit ─► TableCache::apply_change                  │
│                                            └─► WeakEventManager<IndexChanged>      │
│                                                                                    │
│  DatabaseCache ── TableCache per table ── rows: DashMap<PrimaryKeys, RowData>      │
│        │                               └─ IndexCache per FK/indexed column         │
│        └── CleanupWorker thread: age, row and byte limits every interval           │
└────────────────────────────────────────────────────────────────────────────────────┘
*/
