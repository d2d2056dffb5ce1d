//! Minimal end-to-end walkthrough: a `Session` serving a `Memory` store
//! over a loopback `TcpStream`, and a client running one transaction
//! against it through the real `client::run` retry loop.

use std::sync::Arc;
use metakv::client::{self, Transaction};
use metakv::conn::Connection;
use metakv::error::Error;
use metakv::server::Session;
use metakv::storage::memory::Memory;
use metakv::store::Store;
use tokio::net::{TcpListener, TcpStream};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let store = Arc::new(Store::new(Memory::new()));

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        Session::new(store).serve(stream).await;
    });

    let stream = TcpStream::connect(addr).await?;
    let conn = Connection::spawn(stream);

    client::run(conn.clone(), 10, |tx: &mut Transaction| Box::pin(async move {
        tx.set(b"greeting", b"hello".to_vec());
        Ok(())
    }))
    .await?;

    let value = client::run(conn, 10, |tx: &mut Transaction| Box::pin(async move { tx.get(b"greeting").await })).await?;
    println!("greeting = {:?}", value.map(|v| String::from_utf8_lossy(&v).into_owned()));

    Ok(())
}
