//! Interactive soak-testing client for `latchtree`: opens a database file
//! and accepts `get`/`put`/`delete`/`checkpoint` commands on stdin, one
//! index ("default") per session. A thin REPL wired straight to the
//! library's public API, with no protocol or server in between.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use latchtree::{Config, Database};
use latchtree::page_array::FilePageArray;

fn main() {
    latchtree::log::init_log();

    let path = std::env::args().nth(1).unwrap_or_else(|| {
        eprintln!("usage: latchtree-cli <path-to-db-file>");
        std::process::exit(1);
    });

    let page_array = FilePageArray::open(&path, Config::default().page_size)
        .unwrap_or_else(|e| {
            eprintln!("failed to open {path}: {e}");
            std::process::exit(1);
        });
    let db = Database::open(Config::default(), Arc::new(page_array)).unwrap_or_else(|e| {
        eprintln!("failed to initialise database: {e}");
        std::process::exit(1);
    });
    let index = db.open_index("default").unwrap_or_else(|e| {
        eprintln!("failed to open index: {e}");
        std::process::exit(1);
    });

    println!("latchtree-cli: {path}");
    println!("commands: get <key> | put <key> <value> | delete <key> | scan | checkpoint | exit");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("latchtree> ");
        stdout.flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let mut parts = line.trim().split_whitespace();
        match parts.next() {
            None => continue,
            Some("exit") | Some("quit") => break,
            Some("get") => {
                let Some(key) = parts.next() else {
                    eprintln!("usage: get <key>");
                    continue;
                };
                match db.get(index, key.as_bytes()) {
                    Ok(Some(value)) => println!("{}", String::from_utf8_lossy(&value)),
                    Ok(None) => println!("(not found)"),
                    Err(e) => eprintln!("error: {e}"),
                }
            }
            Some("put") => {
                let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                    eprintln!("usage: put <key> <value>");
                    continue;
                };
                let result = (|| -> latchtree::Result<()> {
                    let mut txn = db.begin()?;
                    txn.insert(index, key.as_bytes().to_vec(), value.as_bytes().to_vec())?;
                    txn.commit()
                })();
                match result {
                    Ok(()) => println!("OK"),
                    Err(e) => eprintln!("error: {e}"),
                }
            }
            Some("delete") => {
                let Some(key) = parts.next() else {
                    eprintln!("usage: delete <key>");
                    continue;
                };
                let result = (|| -> latchtree::Result<bool> {
                    let mut txn = db.begin()?;
                    let existed = txn.delete(index, key.as_bytes())?;
                    txn.commit()?;
                    Ok(existed)
                })();
                match result {
                    Ok(true) => println!("OK"),
                    Ok(false) => println!("(not found)"),
                    Err(e) => eprintln!("error: {e}"),
                }
            }
            Some("scan") => match db.open_cursor(index) {
                Ok(mut cursor) => loop {
                    match cursor.next() {
                        Ok(Some((key, value))) => {
                            if let latchtree::node::EntryValue::Normal(value) = value {
                                println!(
                                    "{} = {}",
                                    String::from_utf8_lossy(&key),
                                    String::from_utf8_lossy(&value)
                                );
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            eprintln!("error: {e}");
                            break;
                        }
                    }
                },
                Err(e) => eprintln!("error: {e}"),
            },
            Some("checkpoint") => match db.checkpoint() {
                Ok(report) => println!("wrote {} page(s)", report.pages_written),
                Err(e) => eprintln!("error: {e}"),
            },
            Some(other) => eprintln!("unknown command: {other}"),
        }
    }
}
