//! Shared contract and wire types for the library examples.
//!
//! This demonstrates the recommended pattern for production applications:
//! declare the contract in a separate module (or crate) that both client and
//! server depend on.
//!
//! For real applications, create a dedicated crate:
//! ```text
//! my-app/
//! ├── library-contract/  # rpc_contract! + shared types
//! ├── library-server/    # Depends on library-contract
//! └── library-client/    # Depends on library-contract
//! ```
#![allow(dead_code)]

use std::sync::Mutex;

use queue_rpc::{rpc_contract, Result};
use serde::{Deserialize, Serialize};

/// A catalogued book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub isbn: String,
    pub name: String,
    pub author: String,
    /// Publication date, `YYYY-MM-DD`.
    pub published_on: String,
}

impl Book {
    fn new(isbn: &str, name: &str, author: &str, published: &str) -> Self {
        Self {
            isbn: isbn.into(),
            name: name.into(),
            author: author.into(),
            published_on: published.into(),
        }
    }
}

rpc_contract! {
    /// A small book catalogue.
    pub trait LibraryService = "example.contract.LibraryService" {
        fn get_book(isbn: String) -> Option<Book>;
        fn get_books_by_author(author: String) -> Vec<Book>;
        fn add_book(book: Book);
        fn delete_book(isbn: String);
    }
}

/// In-process catalogue served by the example servers.
pub struct Library {
    books: Mutex<Vec<Book>>,
}

impl Default for Library {
    fn default() -> Self {
        Self {
            books: Mutex::new(vec![
                Book::new(
                    "0345339703",
                    "The Lord of the Rings: The Fellowship of the Ring",
                    "J.R.R.Tolkien",
                    "1986-08-12",
                ),
                Book::new(
                    "0345339711",
                    "The Lord of the Rings: The Two Towers",
                    "J.R.R.Tolkien",
                    "1986-08-12",
                ),
                Book::new(
                    "0345339738",
                    "The Lord of the Rings: The Return of the King",
                    "J.R.R.Tolkien",
                    "1986-07-12",
                ),
                Book::new("0553293354", "Foundation", "Isaac Asimov", "1991-10-01"),
            ]),
        }
    }
}

#[queue_rpc::async_trait]
impl LibraryService for Library {
    async fn get_book(&self, isbn: String) -> Result<Option<Book>> {
        let books = self.books.lock().map_err(queue_rpc::RpcError::implementation)?;
        Ok(books.iter().find(|book| book.isbn == isbn).cloned())
    }

    async fn get_books_by_author(&self, author: String) -> Result<Vec<Book>> {
        let books = self.books.lock().map_err(queue_rpc::RpcError::implementation)?;
        Ok(books.iter().filter(|book| book.author == author).cloned().collect())
    }

    async fn add_book(&self, book: Book) -> Result<()> {
        self.books
            .lock()
            .map_err(queue_rpc::RpcError::implementation)?
            .push(book);
        Ok(())
    }

    async fn delete_book(&self, isbn: String) -> Result<()> {
        self.books
            .lock()
            .map_err(queue_rpc::RpcError::implementation)?
            .retain(|book| book.isbn != isbn);
        Ok(())
    }
}
