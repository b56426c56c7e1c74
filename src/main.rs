//! topicgate - terminal client for a password-gated, live topic list.
//!
//! Usage:
//!
//! - `topicgate` starts an interactive session
//! - `topicgate set-hash <field> <password>` stores a password fingerprint in
//!   the credential record (e.g. `passwordHash` or `adminHash`)

use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use topicgate::{
    provision, render_text, App, Config, IdentityProvider, Page, SledSession, SledStore,
    StdinInput,
};

const HELP: &str = "\
Commands:
  add <title> | <text>   add a topic (admin)
  rm <id>                delete a topic (admin)
  undo                   restore the last deleted topic (admin)
  admin                  toggle admin mode
  list                   show the list again
  lock                   lock this session
  help                   show this help
  quit                   exit";

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("topicgate=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env();
    let db = sled::open(&config.db_path).expect("Failed to open database");
    let store = SledStore::new(db);

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("set-hash") {
        set_hash(&store, &config, &args[1..]).await;
        return;
    }

    let session = Arc::new(SledSession::temporary().expect("Failed to create session store"));
    let input = Arc::new(StdinInput::new());
    let store = Arc::new(store);
    let app = App::new(config, store.clone(), store, session, input.clone());

    // Status line
    let mut status_rx = app.status().subscribe();
    tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let message = status_rx.borrow_and_update().message.clone();
            if !message.is_empty() {
                println!("» {}", message);
            }
        }
    });

    // Live list
    let mut frames = app.list().frames();
    tokio::spawn(async move {
        while frames.changed().await.is_ok() {
            let frame = frames.borrow_and_update().clone();
            println!("{}", render_text(&frame));
        }
    });

    println!("Database: {}", app.config().db_path.display());
    if app.start().await == Page::Protected {
        println!("{}", HELP);
    }

    while let Some(raw) = input.next_line().await {
        if app.page() == Page::Locked {
            // Errors are already on the status line.
            if app.unlock(&raw).await.is_ok() {
                println!("{}", HELP);
            }
            continue;
        }

        let line = raw.trim();

        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "" => {}
            "add" => match rest.split_once('|') {
                Some((title, text)) => {
                    app.add_topic(title, text).await.ok();
                }
                None => println!("usage: add <title> | <text>"),
            },
            "rm" | "delete" => {
                app.remove_topic(rest.trim()).await.ok();
            }
            "undo" => {
                app.undo_remove().await.ok();
            }
            "admin" => {
                app.toggle_admin().await.ok();
            }
            "list" => app.list().refresh(),
            "lock" => app.lock(),
            "help" => println!("{}", HELP),
            "quit" | "exit" => break,
            other => println!("unknown command: {} (try help)", other),
        }
    }

    app.list().unsubscribe();
}

async fn set_hash(store: &SledStore, config: &Config, args: &[String]) {
    let (field, password) = match args {
        [field, password] => (field, password),
        _ => {
            eprintln!("usage: topicgate set-hash <field> <password>");
            std::process::exit(2);
        }
    };

    if let Err(e) = store.sign_in_anonymously().await {
        eprintln!("sign-in failed: {}", e);
        std::process::exit(1);
    }
    match provision(store, &config.credential, field, password).await {
        Ok(()) => println!("Stored {} in {}", field, config.credential),
        Err(e) => {
            eprintln!("write failed: {}", e);
            std::process::exit(1);
        }
    }
}
