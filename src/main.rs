use std::io::{BufRead, Write};
use std::sync::Arc;

use littledb::config::DbConfig;
use littledb::database::Database;
use littledb::executor::exec_query;
use littledb::utils::init_log;

/// Connect to the server with
/// `psql -h localhost -p 54321 -d littledb -U postgres`
#[tokio::main]
pub async fn main() {
    init_log();

    let config = DbConfig::from_env();
    let db = Database::open(config).expect("cannot open database");

    if std::env::args().any(|arg| arg == "--terminal") {
        run_terminal(db);
    } else {
        littledb::server::serve(db).await.expect("server failed");
    }
}

/// A bare-bones local client: statements are read until a `;` shows up,
/// then executed against the embedded engine.
fn run_terminal(db: Arc<Database>) {
    let stdin = std::io::stdin();
    let mut query = String::new();
    print!("> ");
    std::io::stdout().flush().ok();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        query.push_str(&line);
        query.push(' ');
        if !line.contains(';') {
            print!("> ");
            std::io::stdout().flush().ok();
            continue;
        }

        let sql = query.trim().trim_end_matches(';').to_string();
        query.clear();
        match exec_query(&db, &sql) {
            Ok(result) => println!("{}", result),
            Err(e) => println!("{}", e),
        }
        print!("> ");
        std::io::stdout().flush().ok();
    }
}
