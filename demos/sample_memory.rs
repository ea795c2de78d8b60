//! Library service over the in-memory broker.
//!
//! Server and client share one process and one in-memory hub.
//!
//! Run with: cargo run --example sample_memory
mod common;

use std::sync::Arc;

use common::{Book, Library, LibraryService};
use queue_rpc::{ConnectionBuilder, RpcConfig, RpcHost};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let connection = ConnectionBuilder::new()
        .uri("memory://library")
        .connection_name("library-demo")
        .build()
        .await?;

    let mut host = RpcHost::new(connection);
    host.start_server::<dyn LibraryService>(Arc::new(Library::default()))
        .await?;

    let client = host
        .client::<dyn LibraryService>(RpcConfig::default())
        .await?;

    let tolkien = client
        .call(|library| async move { library.get_books_by_author("J.R.R.Tolkien".into()).await })
        .await?;
    for book in &tolkien {
        println!("{}", book.name);
    }

    let book = Book {
        isbn: "0553293370".into(),
        name: "Foundation and Empire".into(),
        author: "Isaac Asimov".into(),
        published_on: "1991-10-01".into(),
    };
    client
        .call(|library| async move { library.add_book(book).await })
        .await?;

    let found = client
        .call(|library| async move { library.get_book("0553293370".into()).await })
        .await?;
    println!("added: {found:?}");

    client
        .call(|library| async move { library.delete_book("0553293370".into()).await })
        .await?;

    let gone = client
        .call(|library| async move { library.get_book("0553293370".into()).await })
        .await?;
    println!("after delete: {gone:?}");

    host.shutdown().await?;
    Ok(())
}
