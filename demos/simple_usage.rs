/// rowbridge walkthrough
///
/// Declares a small blog schema, then shows:
/// - schema creation on SQLite
/// - inserts, updates and deletes inside transactions
/// - predicate queries served through the row cache
/// - relation navigation in both directions
/// - cache statistics and a manual cleanup run

use rowbridge::query::{field, list, OrderBy};
use rowbridge::schema::{
    ColumnBuilder, DatabaseBuilder, DatabaseDefinition, DatabaseModel, DefaultValue, DefinitionRegistry, HostType,
    TableBuilder,
};
use rowbridge::{DataSource, MutableRow, Value};

struct Blog;

impl DatabaseModel for Blog {
    fn definition() -> rowbridge::Result<DatabaseDefinition> {
        DatabaseBuilder::new("blog")
            .model_type("Blog")
            .table(
                TableBuilder::new("authors")
                    .model("Author")
                    .column(ColumnBuilder::new("id", HostType::Uuid).primary_key().default_value(DefaultValue::NewUuidV7))
                    .column(ColumnBuilder::new("name", HostType::String))
                    .column(ColumnBuilder::new("role", HostType::Enum(vec!["Admin".into(), "Writer".into()]))),
            )
            .table(
                TableBuilder::new("posts")
                    .model("Post")
                    .column(ColumnBuilder::new("id", HostType::Int64).primary_key().auto_increment())
                    .column(ColumnBuilder::new("author_id", HostType::Uuid))
                    .column(ColumnBuilder::new("title", HostType::String))
                    .column(ColumnBuilder::new("published", HostType::DateTime).default_value(DefaultValue::CurrentTimestamp))
                    .foreign_key("author_id", "authors", "id", "author", "posts"),
            )
            .build()
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let dir = tempfile::tempdir()?;
    let registry = DefinitionRegistry::new();

    println!("Opening blog.db...");
    let source = DataSource::open_sqlite::<Blog>(&registry, dir.path().join("blog.db"))?;
    source.create_schema()?;
    println!("Done!\n");

    println!("Step 1: INSERT");
    let authors = source.table("Author")?.clone();
    let posts = source.table("Post")?.clone();
    let mut tx = source.transaction()?;
    let ada = tx.insert(MutableRow::new(authors.clone()).with("name", "Ada")?.with("role", "Admin")?)?;
    let bob = tx.insert(MutableRow::new(authors).with("name", "Bob")?.with("role", "Writer")?)?;
    for (author, title) in [(&ada, "Hello"), (&ada, "Caching rows"), (&bob, "First post")] {
        let post = MutableRow::new(posts.clone())
            .with("author_id", author.get("id")?.clone())?
            .with("title", title)?;
        tx.insert(post)?;
    }
    tx.commit()?;
    println!("  2 authors, 3 posts\n");

    println!("Step 2: QUERY");
    let admins = source.query("authors")?.filter(field("role").equals("Admin")).to_rows()?;
    println!("  admins: {}", admins.len());
    let titled = source
        .query("posts")?
        .filter(field("title").starts_with("C") | field("title").ends_with("post"))
        .order_by(OrderBy::asc(field("id")));
    println!("  sql: {}", titled.to_sql()?.text);
    for post in titled.to_rows()? {
        println!("  post {} '{}'", post.get("id")?, post.get("title")?.as_str().unwrap_or_default());
    }
    let others = source
        .query("posts")?
        .filter(!list([Value::Int(1), Value::Int(2)]).contains(field("id")))
        .count()?;
    println!("  posts other than 1 and 2: {}\n", others);

    println!("Step 3: RELATIONS");
    for post in source.related(&ada, "posts")? {
        let author = source.related(&post, "author")?;
        println!("  '{}' by {}", post.get("title")?.as_str().unwrap_or_default(), author.len());
    }

    println!("\nStep 4: UPDATE and DELETE");
    let first = source.query("posts")?.order_by(OrderBy::asc(field("id"))).first()?;
    let mut tx = source.transaction()?;
    if let Some(first) = first {
        tx.update(first.mutate().with("author_id", bob.get("id")?.clone())?)?;
    }
    tx.commit()?;
    println!("  Ada now has {} posts, Bob has {}", source.related(&ada, "posts")?.len(), source.related(&bob, "posts")?.len());

    let mut tx = source.transaction()?;
    tx.insert(MutableRow::new(posts).with("author_id", ada.get("id")?.clone())?.with("title", "Draft")?)?;
    tx.rollback()?;
    println!("  after rollback: {} posts\n", source.query("posts")?.count()?);

    println!("Step 5: CACHE");
    source.cache().run_cleanup_now();
    let stats = source.cache_stats();
    println!("  rows cached: {}", stats.total.rows);
    println!("  bytes cached: {}", stats.total.bytes);
    println!("  hit rate: {:.2}", stats.total.hit_rate());
    println!("{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}
