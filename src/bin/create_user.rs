use std::io::{self, Write};

use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use newsdesk_api::auth::PasswordService;
use newsdesk_api::auth::accounts::{AccountStore, normalize_email};
use newsdesk_api::db::MIGRATOR;
use newsdesk_api::models::{MAX_EMAIL_LEN, MAX_NAME_LEN, NewAccount};

#[derive(Parser, Debug)]
#[command(
    name = "create_user",
    about = "Create a password account on the newsdesk API"
)]
struct Args {
    /// Email address for the account (case insensitive).
    #[arg(long)]
    email: String,

    /// Plaintext password to hash and store for this account.
    #[arg(long)]
    password: String,

    /// Display name; defaults to the part of the email before '@'.
    #[arg(long)]
    name: Option<String>,

    /// Grant administrator rights.
    #[arg(long)]
    admin: bool,

    /// Mark the account as a verified author.
    #[arg(long)]
    verified: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();
    let email = normalize_email(&args.email);

    if !email.contains('@') {
        writeln!(io::stderr(), "error: email must contain '@'")?;
        std::process::exit(1);
    }
    if email.chars().count() > MAX_EMAIL_LEN {
        writeln!(io::stderr(), "error: email must be at most {MAX_EMAIL_LEN} characters")?;
        std::process::exit(1);
    }
    if args.password.is_empty() {
        writeln!(io::stderr(), "error: password must not be empty")?;
        std::process::exit(1);
    }

    let name = args
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
    if name.chars().count() > MAX_NAME_LEN {
        writeln!(io::stderr(), "error: name must be at most {MAX_NAME_LEN} characters")?;
        std::process::exit(1);
    }

    let database_url = std::env::var("DATABASE_URL")?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await?;
    MIGRATOR.run(&pool).await?;

    let accounts = AccountStore;
    let mut tx = pool.begin().await?;

    if accounts.find_by_email(&mut *tx, &email).await?.is_some() {
        writeln!(
            io::stderr(),
            "error: an account with email '{email}' already exists."
        )?;
        std::process::exit(1);
    }

    let password_hash = PasswordService::new()?.hash_password(&args.password)?;
    let account = accounts
        .insert(
            &mut *tx,
            &NewAccount {
                name,
                email,
                password_hash: Some(password_hash),
                avatar: None,
                external_id: None,
                is_verified_author: args.verified,
                is_admin: args.admin,
            },
        )
        .await?;

    tx.commit().await?;

    let role = if account.is_admin { "admin" } else { "user" };
    println!(
        "Created {role} account '{}' with id {}",
        account.email, account.id
    );
    Ok(())
}
